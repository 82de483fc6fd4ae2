//! Core IR data model: modules, functions, blocks, instructions.
//!
//! Identity is index-based: `BlockId`, `ValueId` and `SlotId` are indices
//! into per-function tables, so a `Function` owns everything it refers to
//! and cloning a function snapshots it completely (the pipeline relies on
//! this for restore-on-failure).

use std::collections::HashMap;

use veil_utils::errors::IrError;

/// Index of a basic block within its function; `BlockId(0)` is the entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub u32);

/// Index of a value (function parameter, block parameter, or instruction
/// result) in the function's value table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ValueId(pub u32);

/// Index of a stack slot in the function's slot table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotId(pub u32);

impl BlockId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl ValueId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl SlotId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Integer width of a value or slot. All arithmetic wraps modulo 2^width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Width {
    /// Single-bit, used for comparison results and branch conditions.
    W1,
    W8,
    W16,
    W32,
    W64,
}

impl Width {
    pub fn bits(self) -> u32 {
        match self {
            Self::W1 => 1,
            Self::W8 => 8,
            Self::W16 => 16,
            Self::W32 => 32,
            Self::W64 => 64,
        }
    }

    /// All-ones mask for this width.
    pub fn mask(self) -> u64 {
        match self {
            Self::W64 => u64::MAX,
            w => (1u64 << w.bits()) - 1,
        }
    }
}

/// An instruction or terminator operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand {
    Value(ValueId),
    /// Immediate constant, already masked to the width of its context.
    Const(u64),
}

impl From<ValueId> for Operand {
    fn from(v: ValueId) -> Self {
        Self::Value(v)
    }
}

/// Binary integer operations. Division and remainder are unsigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    UDiv,
    URem,
    And,
    Or,
    Xor,
    Shl,
    LShr,
}

/// Comparison predicates; signed variants sign-extend from the operand
/// width before comparing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Pred {
    Eq,
    Ne,
    Ult,
    Ule,
    Slt,
    Sle,
}

/// A non-terminator instruction. Every result-producing instruction names
/// its destination value explicitly, so a rewrite can replace an
/// instruction without touching any of its uses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inst {
    Bin {
        dest: ValueId,
        width: Width,
        op: BinOp,
        lhs: Operand,
        rhs: Operand,
    },
    /// Bitwise complement within the width.
    Not {
        dest: ValueId,
        width: Width,
        src: Operand,
    },
    /// Produces a `W1` value.
    Cmp {
        dest: ValueId,
        width: Width,
        pred: Pred,
        lhs: Operand,
        rhs: Operand,
    },
    Select {
        dest: ValueId,
        width: Width,
        cond: Operand,
        on_true: Operand,
        on_false: Operand,
    },
    Load {
        dest: ValueId,
        width: Width,
        slot: SlotId,
    },
    Store {
        slot: SlotId,
        width: Width,
        value: Operand,
    },
}

impl Inst {
    /// The value this instruction defines, if any.
    pub fn dest(&self) -> Option<ValueId> {
        match self {
            Self::Bin { dest, .. }
            | Self::Not { dest, .. }
            | Self::Cmp { dest, .. }
            | Self::Select { dest, .. }
            | Self::Load { dest, .. } => Some(*dest),
            Self::Store { .. } => None,
        }
    }

    /// Mutable access to every operand, for use-rewriting.
    pub fn operands_mut(&mut self) -> Vec<&mut Operand> {
        match self {
            Self::Bin { lhs, rhs, .. } | Self::Cmp { lhs, rhs, .. } => vec![lhs, rhs],
            Self::Not { src, .. } => vec![src],
            Self::Select {
                cond,
                on_true,
                on_false,
                ..
            } => vec![cond, on_true, on_false],
            Self::Load { .. } => Vec::new(),
            Self::Store { value, .. } => vec![value],
        }
    }

    pub fn operands(&self) -> Vec<Operand> {
        match self {
            Self::Bin { lhs, rhs, .. } | Self::Cmp { lhs, rhs, .. } => vec![*lhs, *rhs],
            Self::Not { src, .. } => vec![*src],
            Self::Select {
                cond,
                on_true,
                on_false,
                ..
            } => vec![*cond, *on_true, *on_false],
            Self::Load { .. } => Vec::new(),
            Self::Store { value, .. } => vec![*value],
        }
    }
}

/// Block terminator; a structurally valid block has exactly one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Terminator {
    Br {
        target: BlockId,
        args: Vec<Operand>,
    },
    CondBr {
        cond: Operand,
        then_dest: BlockId,
        then_args: Vec<Operand>,
        else_dest: BlockId,
        else_args: Vec<Operand>,
    },
    /// Multi-way dispatch. Switch edges carry no block arguments.
    Switch {
        width: Width,
        value: Operand,
        cases: Vec<(u64, BlockId)>,
        default: BlockId,
    },
    Ret {
        value: Option<Operand>,
    },
    /// Abort; reaching this at runtime is a state-corruption signal.
    Trap,
}

impl Terminator {
    /// Successor blocks in edge order.
    pub fn targets(&self) -> Vec<BlockId> {
        match self {
            Self::Br { target, .. } => vec![*target],
            Self::CondBr {
                then_dest,
                else_dest,
                ..
            } => vec![*then_dest, *else_dest],
            Self::Switch { cases, default, .. } => {
                let mut t: Vec<BlockId> = cases.iter().map(|&(_, b)| b).collect();
                t.push(*default);
                t
            }
            Self::Ret { .. } | Self::Trap => Vec::new(),
        }
    }

    /// Mutable access to every operand, for use-rewriting.
    pub fn operands_mut(&mut self) -> Vec<&mut Operand> {
        match self {
            Self::Br { args, .. } => args.iter_mut().collect(),
            Self::CondBr {
                cond,
                then_args,
                else_args,
                ..
            } => {
                let mut ops = vec![cond];
                ops.extend(then_args.iter_mut());
                ops.extend(else_args.iter_mut());
                ops
            }
            Self::Switch { value, .. } => vec![value],
            Self::Ret { value } => value.iter_mut().collect(),
            Self::Trap => Vec::new(),
        }
    }

    pub fn operands(&self) -> Vec<Operand> {
        match self {
            Self::Br { args, .. } => args.clone(),
            Self::CondBr {
                cond,
                then_args,
                else_args,
                ..
            } => {
                let mut ops = vec![*cond];
                ops.extend(then_args.iter().copied());
                ops.extend(else_args.iter().copied());
                ops
            }
            Self::Switch { value, .. } => vec![*value],
            Self::Ret { value } => value.iter().copied().collect(),
            Self::Trap => Vec::new(),
        }
    }
}

/// A basic block: parameters (phi-equivalents), straight-line body,
/// optional terminator. `term == None` only while a block is under
/// construction; `verify` rejects it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BasicBlock {
    pub name: String,
    pub params: Vec<ValueId>,
    pub insts: Vec<Inst>,
    pub term: Option<Terminator>,
}

/// A function: declaration-ordered blocks plus the value and slot tables
/// they index into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Function {
    pub name: String,
    params: Vec<ValueId>,
    pub ret: Option<Width>,
    pub blocks: Vec<BasicBlock>,
    values: Vec<Width>,
    slots: Vec<Width>,
}

impl Function {
    /// Create an empty function; parameters get the first value ids.
    pub fn new(name: impl Into<String>, param_widths: &[Width], ret: Option<Width>) -> Self {
        let values: Vec<Width> = param_widths.to_vec();
        let params = (0..values.len() as u32).map(ValueId).collect();
        Self {
            name: name.into(),
            params,
            ret,
            blocks: Vec::new(),
            values,
            slots: Vec::new(),
        }
    }

    pub fn params(&self) -> &[ValueId] {
        &self.params
    }

    pub fn entry(&self) -> BlockId {
        BlockId(0)
    }

    pub fn block_ids(&self) -> impl Iterator<Item = BlockId> {
        (0..self.blocks.len() as u32).map(BlockId)
    }

    pub fn block(&self, id: BlockId) -> &BasicBlock {
        &self.blocks[id.index()]
    }

    pub fn block_mut(&mut self, id: BlockId) -> &mut BasicBlock {
        &mut self.blocks[id.index()]
    }

    /// The block's terminator, or a `MissingTerminator` error for a block
    /// left half-built.
    pub fn terminator(&self, id: BlockId) -> Result<&Terminator, IrError> {
        self.blocks[id.index()]
            .term
            .as_ref()
            .ok_or_else(|| IrError::MissingTerminator(self.blocks[id.index()].name.clone()))
    }

    pub fn new_value(&mut self, width: Width) -> ValueId {
        let id = ValueId(self.values.len() as u32);
        self.values.push(width);
        id
    }

    pub fn value_width(&self, v: ValueId) -> Width {
        self.values[v.index()]
    }

    pub fn num_values(&self) -> usize {
        self.values.len()
    }

    pub fn new_slot(&mut self, width: Width) -> SlotId {
        let id = SlotId(self.slots.len() as u32);
        self.slots.push(width);
        id
    }

    pub fn slot_width(&self, s: SlotId) -> Width {
        self.slots[s.index()]
    }

    pub fn num_slots(&self) -> usize {
        self.slots.len()
    }

    pub fn add_block(&mut self, name: impl Into<String>) -> BlockId {
        let id = BlockId(self.blocks.len() as u32);
        self.blocks.push(BasicBlock {
            name: name.into(),
            params: Vec::new(),
            insts: Vec::new(),
            term: None,
        });
        id
    }

    /// Append a parameter to `block`, registering a fresh value for it.
    pub fn add_block_param(&mut self, block: BlockId, width: Width) -> ValueId {
        let v = self.new_value(width);
        self.blocks[block.index()].params.push(v);
        v
    }

    /// Duplicate a block's parameters, body and terminator under `name`,
    /// giving every result a fresh value id and remapping intra-block
    /// references onto the fresh ids. References to values defined outside
    /// the source block are kept as-is.
    pub fn clone_block(&mut self, src: BlockId, name: impl Into<String>) -> BlockId {
        let source = self.blocks[src.index()].clone();
        let mut remap: HashMap<ValueId, ValueId> = HashMap::new();

        let dst = self.add_block(name);
        for &p in &source.params {
            let w = self.value_width(p);
            let fresh = self.add_block_param(dst, w);
            remap.insert(p, fresh);
        }

        let map_op = |remap: &HashMap<ValueId, ValueId>, op: &mut Operand| {
            if let Operand::Value(v) = op {
                if let Some(&fresh) = remap.get(v) {
                    *op = Operand::Value(fresh);
                }
            }
        };

        let mut insts = Vec::with_capacity(source.insts.len());
        for inst in &source.insts {
            let mut inst = inst.clone();
            for op in inst.operands_mut() {
                map_op(&remap, op);
            }
            if let Some(old) = inst.dest() {
                let fresh = self.new_value(self.values[old.index()]);
                remap.insert(old, fresh);
                match &mut inst {
                    Inst::Bin { dest, .. }
                    | Inst::Not { dest, .. }
                    | Inst::Cmp { dest, .. }
                    | Inst::Select { dest, .. }
                    | Inst::Load { dest, .. } => *dest = fresh,
                    Inst::Store { .. } => {}
                }
            }
            insts.push(inst);
        }

        let term = source.term.map(|mut t| {
            for op in t.operands_mut() {
                map_op(&remap, op);
            }
            t
        });

        let block = &mut self.blocks[dst.index()];
        block.insts = insts;
        block.term = term;
        dst
    }
}

/// A translation unit: functions in stable declaration order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Module {
    pub name: String,
    functions: Vec<Function>,
}

impl Module {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            functions: Vec::new(),
        }
    }

    pub fn push(&mut self, func: Function) {
        self.functions.push(func);
    }

    pub fn functions(&self) -> &[Function] {
        &self.functions
    }

    pub fn functions_mut(&mut self) -> &mut [Function] {
        &mut self.functions
    }

    pub fn get(&self, name: &str) -> Option<&Function> {
        self.functions.iter().find(|f| f.name == name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Function> {
        self.functions.iter_mut().find(|f| f.name == name)
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}
