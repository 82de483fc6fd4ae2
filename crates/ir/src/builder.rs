//! Convenience builder for authoring functions block by block.

use veil_utils::errors::IrError;

use crate::module::{
    BinOp, BlockId, Function, Inst, Operand, Pred, SlotId, Terminator, ValueId, Width,
};

/// Cursor-style function builder. Instructions append to the current
/// block; terminator helpers seal it.
#[derive(Debug)]
pub struct FuncBuilder {
    func: Function,
    cur: BlockId,
}

impl FuncBuilder {
    /// Start a function with an `entry` block selected.
    pub fn new(name: impl Into<String>, params: &[Width], ret: Option<Width>) -> Self {
        let mut func = Function::new(name, params, ret);
        let cur = func.add_block("entry");
        Self { func, cur }
    }

    pub fn param(&self, idx: usize) -> ValueId {
        self.func.params()[idx]
    }

    pub fn block(&mut self, name: impl Into<String>) -> BlockId {
        self.func.add_block(name)
    }

    pub fn block_param(&mut self, block: BlockId, width: Width) -> ValueId {
        self.func.add_block_param(block, width)
    }

    pub fn switch_to(&mut self, block: BlockId) {
        self.cur = block;
    }

    pub fn current(&self) -> BlockId {
        self.cur
    }

    pub fn slot(&mut self, width: Width) -> SlotId {
        self.func.new_slot(width)
    }

    pub fn bin(
        &mut self,
        width: Width,
        op: BinOp,
        lhs: impl Into<Operand>,
        rhs: impl Into<Operand>,
    ) -> ValueId {
        let dest = self.func.new_value(width);
        self.push(Inst::Bin {
            dest,
            width,
            op,
            lhs: lhs.into(),
            rhs: rhs.into(),
        });
        dest
    }

    pub fn not(&mut self, width: Width, src: impl Into<Operand>) -> ValueId {
        let dest = self.func.new_value(width);
        self.push(Inst::Not {
            dest,
            width,
            src: src.into(),
        });
        dest
    }

    pub fn cmp(
        &mut self,
        width: Width,
        pred: Pred,
        lhs: impl Into<Operand>,
        rhs: impl Into<Operand>,
    ) -> ValueId {
        let dest = self.func.new_value(Width::W1);
        self.push(Inst::Cmp {
            dest,
            width,
            pred,
            lhs: lhs.into(),
            rhs: rhs.into(),
        });
        dest
    }

    pub fn select(
        &mut self,
        width: Width,
        cond: impl Into<Operand>,
        on_true: impl Into<Operand>,
        on_false: impl Into<Operand>,
    ) -> ValueId {
        let dest = self.func.new_value(width);
        self.push(Inst::Select {
            dest,
            width,
            cond: cond.into(),
            on_true: on_true.into(),
            on_false: on_false.into(),
        });
        dest
    }

    pub fn load(&mut self, slot: SlotId) -> ValueId {
        let width = self.func.slot_width(slot);
        let dest = self.func.new_value(width);
        self.push(Inst::Load { dest, width, slot });
        dest
    }

    pub fn store(&mut self, slot: SlotId, value: impl Into<Operand>) {
        let width = self.func.slot_width(slot);
        self.push(Inst::Store {
            slot,
            width,
            value: value.into(),
        });
    }

    pub fn br(&mut self, target: BlockId, args: Vec<Operand>) {
        self.seal(Terminator::Br { target, args });
    }

    pub fn cond_br(
        &mut self,
        cond: impl Into<Operand>,
        then_dest: BlockId,
        then_args: Vec<Operand>,
        else_dest: BlockId,
        else_args: Vec<Operand>,
    ) {
        self.seal(Terminator::CondBr {
            cond: cond.into(),
            then_dest,
            then_args,
            else_dest,
            else_args,
        });
    }

    pub fn switch(
        &mut self,
        width: Width,
        value: impl Into<Operand>,
        cases: Vec<(u64, BlockId)>,
        default: BlockId,
    ) {
        self.seal(Terminator::Switch {
            width,
            value: value.into(),
            cases,
            default,
        });
    }

    pub fn ret(&mut self, value: Option<Operand>) {
        self.seal(Terminator::Ret { value });
    }

    pub fn trap(&mut self) {
        self.seal(Terminator::Trap);
    }

    /// Verify and hand over the finished function.
    pub fn finish(self) -> Result<Function, IrError> {
        self.func.verify()?;
        Ok(self.func)
    }

    fn push(&mut self, inst: Inst) {
        self.func.block_mut(self.cur).insts.push(inst);
    }

    fn seal(&mut self, term: Terminator) {
        self.func.block_mut(self.cur).term = Some(term);
    }
}
