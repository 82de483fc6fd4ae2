//! Mixed boolean-arithmetic substitution.
//!
//! Each eligible binary instruction is replaced in place by the
//! coefficient-weighted sum of boolean basis expressions over its original
//! operands; the coefficients come from the shared rewriter, cache-first.
//! The sum is then optionally pushed through a permutation-polynomial pair
//! whose composition is the identity at the operand width. The final
//! instruction writes the original destination, so uses stay untouched.

use veil_ir::{BinOp, BlockId, Function, Inst, Operand, ValueId, Width};
use veil_mba::{MbaOp, PolyPair};
use veil_utils::errors::{PassError, SolveError};

use crate::pass::{FunctionPass, PassContext};

/// MBA rewriting pass.
#[derive(Debug)]
pub struct MbaSubstitution;

impl FunctionPass for MbaSubstitution {
    fn name(&self) -> &'static str {
        "mba-substitution"
    }

    fn run(&self, func: &mut Function, ctx: &mut PassContext<'_>) -> Result<bool, PassError> {
        let mut rewritten = 0usize;
        for b in func.block_ids() {
            // Back to front so the splice never shifts an unvisited index.
            for idx in (0..func.block(b).insts.len()).rev() {
                if rewrite_site(func, b, idx, ctx)? {
                    rewritten += 1;
                }
            }
        }
        if rewritten > 0 {
            tracing::debug!(function = %func.name, sites = rewritten, "mba substitution");
        }
        Ok(rewritten > 0)
    }
}

fn rewrite_site(
    func: &mut Function,
    block: BlockId,
    idx: usize,
    ctx: &mut PassContext<'_>,
) -> Result<bool, PassError> {
    let Inst::Bin {
        dest,
        width,
        op,
        lhs,
        rhs,
    } = func.block(block).insts[idx].clone()
    else {
        return Ok(false);
    };
    if width == Width::W1 {
        return Ok(false);
    }
    let mba_op = match op {
        BinOp::Add => MbaOp::Add,
        BinOp::Sub => MbaOp::Sub,
        BinOp::And => MbaOp::And,
        BinOp::Or => MbaOp::Or,
        BinOp::Xor => MbaOp::Xor,
        _ => return Ok(false),
    };

    let coeffs = match ctx.mba.linear_coeffs(mba_op, width.bits()) {
        Ok(c) => c,
        Err(SolveError::Unsatisfiable) => {
            tracing::debug!(?mba_op, bits = width.bits(), "unsatisfiable, site skipped");
            return Ok(false);
        }
    };
    let poly = if width.bits() <= ctx.config.poly_width_cap {
        ctx.mba.permutation(width.bits()).ok()
    } else {
        None
    };

    let mask = width.mask();
    let mut body: Vec<Inst> = Vec::new();
    let mut sum: Option<Operand> = None;
    for (i, &c) in coeffs.iter().enumerate() {
        if c == 0 {
            continue;
        }
        let basis = emit_basis(func, &mut body, i, width, lhs, rhs);
        let scaled = func.new_value(width);
        body.push(Inst::Bin {
            dest: scaled,
            width,
            op: BinOp::Mul,
            lhs: basis,
            rhs: Operand::Const((c as u64) & mask),
        });
        sum = Some(match sum {
            None => scaled.into(),
            Some(prev) => {
                let next = func.new_value(width);
                body.push(Inst::Bin {
                    dest: next,
                    width,
                    op: BinOp::Add,
                    lhs: prev,
                    rhs: scaled.into(),
                });
                next.into()
            }
        });
    }
    let Some(sum) = sum else {
        return Ok(false);
    };

    if let Some(PolyPair { forward, inverse }) = poly {
        emit_poly_wrap(func, &mut body, width, sum, forward, inverse);
    }
    let Some(last) = body.last_mut() else {
        return Ok(false);
    };
    set_dest(last, dest);
    func.block_mut(block).insts.splice(idx..=idx, body);
    Ok(true)
}

/// The i-th boolean basis expression over `x`, `y`, in fixed truth-table
/// order. Pure operands (x, y, all-ones) emit nothing.
fn emit_basis(
    func: &mut Function,
    body: &mut Vec<Inst>,
    i: usize,
    width: Width,
    x: Operand,
    y: Operand,
) -> Operand {
    let bin = |body: &mut Vec<Inst>, func: &mut Function, op, lhs, rhs| -> Operand {
        let dest = func.new_value(width);
        body.push(Inst::Bin {
            dest,
            width,
            op,
            lhs,
            rhs,
        });
        dest.into()
    };
    let not = |body: &mut Vec<Inst>, func: &mut Function, src| -> Operand {
        let dest = func.new_value(width);
        body.push(Inst::Not { dest, width, src });
        dest.into()
    };
    match i {
        0 => bin(body, func, BinOp::And, x, y),
        1 => {
            let ny = not(body, func, y);
            bin(body, func, BinOp::And, x, ny)
        }
        2 => x,
        3 => {
            let nx = not(body, func, x);
            bin(body, func, BinOp::And, nx, y)
        }
        4 => y,
        5 => bin(body, func, BinOp::Xor, x, y),
        6 => bin(body, func, BinOp::Or, x, y),
        7 => {
            let or = bin(body, func, BinOp::Or, x, y);
            not(body, func, or)
        }
        8 => {
            let xor = bin(body, func, BinOp::Xor, x, y);
            not(body, func, xor)
        }
        9 => not(body, func, y),
        10 => {
            let ny = not(body, func, y);
            bin(body, func, BinOp::Or, x, ny)
        }
        11 => not(body, func, x),
        12 => {
            let nx = not(body, func, x);
            bin(body, func, BinOp::Or, nx, y)
        }
        13 => {
            let and = bin(body, func, BinOp::And, x, y);
            not(body, func, and)
        }
        _ => Operand::Const(width.mask()),
    }
}

/// `P⁻¹(P(sum))`: multiply-add through the forward polynomial, then the
/// inverse, leaving the value unchanged at this width.
fn emit_poly_wrap(
    func: &mut Function,
    body: &mut Vec<Inst>,
    width: Width,
    sum: Operand,
    forward: (u64, u64),
    inverse: (u64, u64),
) {
    let mask = width.mask();
    let (a0, a1) = forward;
    let (b0, b1) = inverse;
    let mut mul_add = |func: &mut Function, input: Operand, scale: u64, offset: u64| -> Operand {
        let scaled = func.new_value(width);
        body.push(Inst::Bin {
            dest: scaled,
            width,
            op: BinOp::Mul,
            lhs: input,
            rhs: Operand::Const(scale & mask),
        });
        let out = func.new_value(width);
        body.push(Inst::Bin {
            dest: out,
            width,
            op: BinOp::Add,
            lhs: scaled.into(),
            rhs: Operand::Const(offset & mask),
        });
        out.into()
    };
    let encoded = mul_add(func, sum, a1, a0);
    mul_add(func, encoded, b1, b0);
}

fn set_dest(inst: &mut Inst, dest: ValueId) {
    match inst {
        Inst::Bin { dest: d, .. }
        | Inst::Not { dest: d, .. }
        | Inst::Cmp { dest: d, .. }
        | Inst::Select { dest: d, .. }
        | Inst::Load { dest: d, .. } => *d = dest,
        Inst::Store { .. } => {}
    }
}
