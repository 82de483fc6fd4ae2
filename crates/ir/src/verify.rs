//! Structural validation. Every pass must leave a function in a state
//! this check accepts, including on error paths.

use veil_utils::errors::IrError;

use crate::module::{BlockId, Function, Inst, Operand, SlotId, Terminator, ValueId, Width};

impl Function {
    /// Check terminator presence, operand validity, width agreement, and
    /// branch target/argument consistency.
    pub fn verify(&self) -> Result<(), IrError> {
        if self.blocks.is_empty() {
            return Err(IrError::NoEntryBlock(self.name.clone()));
        }

        for id in self.block_ids() {
            let block = self.block(id);
            for inst in &block.insts {
                self.check_inst(inst)?;
            }
            let term = self.terminator(id)?;
            self.check_term(term)?;
        }
        Ok(())
    }

    fn check_operand(&self, op: Operand, width: Width, ctx: &str) -> Result<(), IrError> {
        match op {
            Operand::Value(v) => {
                if v.index() >= self.num_values() {
                    return Err(IrError::UnknownValue(v.index()));
                }
                if self.value_width(v) != width {
                    return Err(IrError::WidthMismatch(ctx.to_owned()));
                }
            }
            Operand::Const(c) => {
                if c & !width.mask() != 0 {
                    return Err(IrError::WidthMismatch(ctx.to_owned()));
                }
            }
        }
        Ok(())
    }

    fn check_inst(&self, inst: &Inst) -> Result<(), IrError> {
        match inst {
            Inst::Bin {
                dest,
                width,
                lhs,
                rhs,
                ..
            } => {
                self.check_operand(*lhs, *width, "bin lhs")?;
                self.check_operand(*rhs, *width, "bin rhs")?;
                self.check_dest(*dest, *width, "bin dest")
            }
            Inst::Not { dest, width, src } => {
                self.check_operand(*src, *width, "not src")?;
                self.check_dest(*dest, *width, "not dest")
            }
            Inst::Cmp {
                dest,
                width,
                lhs,
                rhs,
                ..
            } => {
                self.check_operand(*lhs, *width, "cmp lhs")?;
                self.check_operand(*rhs, *width, "cmp rhs")?;
                self.check_dest(*dest, Width::W1, "cmp dest")
            }
            Inst::Select {
                dest,
                width,
                cond,
                on_true,
                on_false,
            } => {
                self.check_operand(*cond, Width::W1, "select cond")?;
                self.check_operand(*on_true, *width, "select then")?;
                self.check_operand(*on_false, *width, "select else")?;
                self.check_dest(*dest, *width, "select dest")
            }
            Inst::Load { dest, width, slot } => {
                self.check_slot(*slot, *width, "load")?;
                self.check_dest(*dest, *width, "load dest")
            }
            Inst::Store { slot, width, value } => {
                self.check_slot(*slot, *width, "store")?;
                self.check_operand(*value, *width, "store value")
            }
        }
    }

    fn check_term(&self, term: &Terminator) -> Result<(), IrError> {
        match term {
            Terminator::Br { target, args } => self.check_edge(*target, args),
            Terminator::CondBr {
                cond,
                then_dest,
                then_args,
                else_dest,
                else_args,
            } => {
                self.check_operand(*cond, Width::W1, "condbr cond")?;
                self.check_edge(*then_dest, then_args)?;
                self.check_edge(*else_dest, else_args)
            }
            Terminator::Switch {
                width,
                value,
                cases,
                default,
            } => {
                self.check_operand(*value, *width, "switch value")?;
                for &(case, target) in cases {
                    if case & !width.mask() != 0 {
                        return Err(IrError::WidthMismatch("switch case".to_owned()));
                    }
                    self.check_edge(target, &[])?;
                }
                self.check_edge(*default, &[])
            }
            Terminator::Ret { value } => match (value, self.ret) {
                (Some(v), Some(w)) => self.check_operand(*v, w, "ret value"),
                (None, None) => Ok(()),
                _ => Err(IrError::WidthMismatch("ret".to_owned())),
            },
            Terminator::Trap => Ok(()),
        }
    }

    fn check_edge(&self, target: BlockId, args: &[Operand]) -> Result<(), IrError> {
        if target.index() >= self.blocks.len() {
            return Err(IrError::UnknownBlock(target.index()));
        }
        let params = &self.block(target).params;
        if params.len() != args.len() {
            return Err(IrError::ArityMismatch {
                target: self.block(target).name.clone(),
                given: args.len(),
                expected: params.len(),
            });
        }
        for (&arg, &param) in args.iter().zip(params) {
            self.check_operand(arg, self.value_width(param), "branch arg")?;
        }
        Ok(())
    }

    fn check_dest(&self, dest: ValueId, width: Width, ctx: &str) -> Result<(), IrError> {
        if dest.index() >= self.num_values() {
            return Err(IrError::UnknownValue(dest.index()));
        }
        if self.value_width(dest) != width {
            return Err(IrError::WidthMismatch(ctx.to_owned()));
        }
        Ok(())
    }

    fn check_slot(&self, slot: SlotId, width: Width, ctx: &str) -> Result<(), IrError> {
        if slot.index() >= self.num_slots() {
            return Err(IrError::UnknownSlot(slot.index()));
        }
        if self.slot_width(slot) != width {
            return Err(IrError::WidthMismatch(ctx.to_owned()));
        }
        Ok(())
    }
}
