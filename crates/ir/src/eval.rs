//! Reference interpreter. Semantic-equivalence tests execute a function
//! before and after a transform and compare results; the traced variant
//! additionally records which blocks ran, which is how the dead-clone and
//! dispatch-shape properties are checked.

use veil_utils::errors::EvalError;

use crate::module::{BinOp, BlockId, Function, Inst, Operand, Pred, Terminator, Width};

/// Generous budget; a flattened loop burns a handful of steps per
/// dispatch round trip.
pub const STEP_LIMIT: u64 = 1 << 22;

/// Execute `func` on `args`, returning the `Ret` value.
pub fn eval(func: &Function, args: &[u64]) -> Result<Option<u64>, EvalError> {
    run(func, args, STEP_LIMIT, None)
}

/// Execute and also record every block entered, in order.
pub fn eval_traced(func: &Function, args: &[u64]) -> Result<(Option<u64>, Vec<BlockId>), EvalError> {
    let mut trace = Vec::new();
    let ret = run(func, args, STEP_LIMIT, Some(&mut trace))?;
    Ok((ret, trace))
}

fn run(
    func: &Function,
    args: &[u64],
    limit: u64,
    mut trace: Option<&mut Vec<BlockId>>,
) -> Result<Option<u64>, EvalError> {
    if args.len() != func.params().len() {
        return Err(EvalError::ArgCount {
            expected: func.params().len(),
            given: args.len(),
        });
    }

    let mut values: Vec<Option<u64>> = vec![None; func.num_values()];
    for (&param, &arg) in func.params().iter().zip(args) {
        values[param.index()] = Some(arg & func.value_width(param).mask());
    }
    // Slots are zero-initialized; passes that rely on slot contents store
    // before the first load on every path.
    let mut slots: Vec<u64> = vec![0; func.num_slots()];

    let mut steps = 0u64;
    let mut cur = func.entry();
    let mut incoming: Vec<u64> = Vec::new();

    loop {
        if let Some(trace) = trace.as_deref_mut() {
            trace.push(cur);
        }
        let block = func.block(cur);
        for (&param, &arg) in block.params.iter().zip(&incoming) {
            values[param.index()] = Some(arg);
        }

        for inst in &block.insts {
            steps += 1;
            if steps > limit {
                return Err(EvalError::StepLimit(limit));
            }
            exec_inst(func, inst, &mut values, &mut slots)?;
        }

        let term = func.terminator(cur)?;
        steps += 1;
        if steps > limit {
            return Err(EvalError::StepLimit(limit));
        }
        match term {
            Terminator::Br { target, args } => {
                incoming = read_all(func, args, &values)?;
                cur = *target;
            }
            Terminator::CondBr {
                cond,
                then_dest,
                then_args,
                else_dest,
                else_args,
            } => {
                let taken = read(func, *cond, Width::W1, &values)? != 0;
                let (dest, edge_args) = if taken {
                    (*then_dest, then_args)
                } else {
                    (*else_dest, else_args)
                };
                incoming = read_all(func, edge_args, &values)?;
                cur = dest;
            }
            Terminator::Switch {
                width,
                value,
                cases,
                default,
            } => {
                let v = read(func, *value, *width, &values)?;
                cur = cases
                    .iter()
                    .find(|&&(case, _)| case == v)
                    .map_or(*default, |&(_, target)| target);
                incoming = Vec::new();
            }
            Terminator::Ret { value } => {
                return match value {
                    Some(v) => {
                        let w = func.ret.unwrap_or(Width::W64);
                        Ok(Some(read(func, *v, w, &values)?))
                    }
                    None => Ok(None),
                };
            }
            Terminator::Trap => return Err(EvalError::Trapped),
        }
    }
}

fn exec_inst(
    func: &Function,
    inst: &Inst,
    values: &mut [Option<u64>],
    slots: &mut [u64],
) -> Result<(), EvalError> {
    match inst {
        Inst::Bin {
            dest,
            width,
            op,
            lhs,
            rhs,
        } => {
            let l = read(func, *lhs, *width, values)?;
            let r = read(func, *rhs, *width, values)?;
            values[dest.index()] = Some(bin(*op, *width, l, r)?);
        }
        Inst::Not { dest, width, src } => {
            let v = read(func, *src, *width, values)?;
            values[dest.index()] = Some(!v & width.mask());
        }
        Inst::Cmp {
            dest,
            width,
            pred,
            lhs,
            rhs,
        } => {
            let l = read(func, *lhs, *width, values)?;
            let r = read(func, *rhs, *width, values)?;
            values[dest.index()] = Some(cmp(*pred, *width, l, r) as u64);
        }
        Inst::Select {
            dest,
            width,
            cond,
            on_true,
            on_false,
        } => {
            let c = read(func, *cond, Width::W1, values)? != 0;
            let v = if c {
                read(func, *on_true, *width, values)?
            } else {
                read(func, *on_false, *width, values)?
            };
            values[dest.index()] = Some(v);
        }
        Inst::Load { dest, slot, .. } => {
            values[dest.index()] = Some(slots[slot.index()]);
        }
        Inst::Store { slot, width, value } => {
            slots[slot.index()] = read(func, *value, *width, values)?;
        }
    }
    Ok(())
}

fn read(func: &Function, op: Operand, width: Width, values: &[Option<u64>]) -> Result<u64, EvalError> {
    match op {
        Operand::Value(v) => {
            debug_assert_eq!(func.value_width(v), width);
            values[v.index()].ok_or(EvalError::UndefinedValue(v.index()))
        }
        Operand::Const(c) => Ok(c & width.mask()),
    }
}

fn read_all(func: &Function, ops: &[Operand], values: &[Option<u64>]) -> Result<Vec<u64>, EvalError> {
    ops.iter()
        .map(|&op| match op {
            Operand::Value(v) => values[v.index()].ok_or(EvalError::UndefinedValue(v.index())),
            Operand::Const(c) => Ok(c),
        })
        .collect()
}

fn bin(op: BinOp, width: Width, l: u64, r: u64) -> Result<u64, EvalError> {
    let mask = width.mask();
    let bits = width.bits() as u64;
    let v = match op {
        BinOp::Add => l.wrapping_add(r),
        BinOp::Sub => l.wrapping_sub(r),
        BinOp::Mul => l.wrapping_mul(r),
        BinOp::UDiv => {
            if r == 0 {
                return Err(EvalError::DivideByZero);
            }
            l / r
        }
        BinOp::URem => {
            if r == 0 {
                return Err(EvalError::DivideByZero);
            }
            l % r
        }
        BinOp::And => l & r,
        BinOp::Or => l | r,
        BinOp::Xor => l ^ r,
        // Shifts past the width yield zero.
        BinOp::Shl => {
            if r >= bits {
                0
            } else {
                l << r
            }
        }
        BinOp::LShr => {
            if r >= bits {
                0
            } else {
                l >> r
            }
        }
    };
    Ok(v & mask)
}

fn cmp(pred: Pred, width: Width, l: u64, r: u64) -> bool {
    match pred {
        Pred::Eq => l == r,
        Pred::Ne => l != r,
        Pred::Ult => l < r,
        Pred::Ule => l <= r,
        Pred::Slt => sign_extend(width, l) < sign_extend(width, r),
        Pred::Sle => sign_extend(width, l) <= sign_extend(width, r),
    }
}

fn sign_extend(width: Width, v: u64) -> i64 {
    let bits = width.bits();
    if bits == 64 {
        return v as i64;
    }
    let shift = 64 - bits;
    ((v << shift) as i64) >> shift
}
