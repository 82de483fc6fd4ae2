//! Bogus control flow: opaque predicates over a pair of stack cells.
//!
//! Two cells are seeded with the same prime in the entry block, so
//! `a == b` is always true at runtime but looks data-dependent to a
//! static analyzer. Each instrumented branch gains a guard on the cells
//! whose failing edge targets a cloned, never-executed copy of the real
//! target; inside the real target the second cell is pushed through an
//! affine map that fixes the prime, re-establishing equality before a
//! second guard releases control to the original terminator.

use rand::seq::SliceRandom;
use rand::Rng;
use veil_ir::{BinOp, BlockId, Function, Inst, Operand, Pred, SlotId, Terminator, Width};
use veil_utils::errors::PassError;
use veil_utils::rng::ObfRng;

use crate::pass::{FunctionPass, PassContext};

/// Opaque-predicate injection pass.
#[derive(Debug)]
pub struct BogusFlow;

impl FunctionPass for BogusFlow {
    fn name(&self) -> &'static str {
        "bogus-flow"
    }

    fn run(&self, func: &mut Function, ctx: &mut PassContext<'_>) -> Result<bool, PassError> {
        for b in func.block_ids() {
            if func.block(b).term.is_none() {
                return Err(PassError::Unsupported {
                    function: func.name.clone(),
                    reason: format!("block `{}` has no terminator", func.block(b).name),
                });
            }
        }

        // Candidate sites: blocks that branch. Ret/Switch/Trap blocks have
        // no single real successor to guard.
        let mut sites: Vec<BlockId> = func
            .block_ids()
            .filter(|&b| {
                matches!(
                    func.block(b).term,
                    Some(Terminator::Br { .. } | Terminator::CondBr { .. })
                )
            })
            .collect();

        let max_sites = ((sites.len() as f32) * ctx.config.bogus_ratio).ceil() as usize;
        if max_sites == 0 || sites.is_empty() {
            tracing::debug!(function = %func.name, "no eligible branch sites");
            return Ok(false);
        }
        let picked = ctx.rng.inner().random_range(1..=max_sites.min(sites.len()));
        sites.shuffle(ctx.rng.inner());
        sites.truncate(picked);

        tracing::debug!(function = %func.name, sites = sites.len(), "instrumenting branch sites");
        for site in sites {
            instrument_site(func, site, ctx);
        }
        Ok(true)
    }
}

fn instrument_site(func: &mut Function, site: BlockId, ctx: &mut PassContext<'_>) {
    let prime = random_prime(ctx.rng);
    let cell_a = func.new_slot(Width::W32);
    let cell_b = func.new_slot(Width::W32);
    let entry = func.entry();
    func.block_mut(entry).insts.splice(
        0..0,
        [
            Inst::Store {
                slot: cell_a,
                width: Width::W32,
                value: Operand::Const(prime),
            },
            Inst::Store {
                slot: cell_b,
                width: Width::W32,
                value: Operand::Const(prime),
            },
        ],
    );

    let Some(term) = func.block(site).term.clone() else {
        return;
    };
    match term {
        Terminator::Br { target, args } => {
            let phantom = clone_phantom(func, target);
            // Random polarity: equal-goes-real or unequal-goes-phantom.
            let guard = if ctx.rng.coin() {
                let cond = emit_cell_cmp(func, site, cell_a, cell_b, Pred::Eq);
                Terminator::CondBr {
                    cond: cond.into(),
                    then_dest: target,
                    then_args: args.clone(),
                    else_dest: phantom,
                    else_args: args,
                }
            } else {
                let cond = emit_cell_cmp(func, site, cell_a, cell_b, Pred::Ne);
                Terminator::CondBr {
                    cond: cond.into(),
                    then_dest: phantom,
                    then_args: args.clone(),
                    else_dest: target,
                    else_args: args,
                }
            };
            func.block_mut(site).term = Some(guard);
            emit_affine_rebind(func, target, cell_b, prime, ctx);
            split_behind_recheck(func, target, phantom, cell_a, cell_b);
        }
        Terminator::CondBr {
            cond,
            then_dest,
            then_args,
            else_dest,
            else_args,
        } => {
            let phantom = clone_phantom(func, then_dest);
            let site_name = func.block(site).name.clone();

            // Live path uses opposite predicates in the two arms.
            let g1 = func.add_block(format!("{site_name}.g1"));
            let c1 = emit_cell_cmp(func, g1, cell_a, cell_b, Pred::Eq);
            func.block_mut(g1).term = Some(Terminator::CondBr {
                cond: c1.into(),
                then_dest,
                then_args: then_args.clone(),
                else_dest: phantom,
                else_args: then_args.clone(),
            });

            let g2 = func.add_block(format!("{site_name}.g2"));
            let c2 = emit_cell_cmp(func, g2, cell_a, cell_b, Pred::Ne);
            func.block_mut(g2).term = Some(Terminator::CondBr {
                cond: c2.into(),
                then_dest: phantom,
                then_args,
                else_dest,
                else_args,
            });

            func.block_mut(site).term = Some(Terminator::CondBr {
                cond,
                then_dest: g1,
                then_args: Vec::new(),
                else_dest: g2,
                else_args: Vec::new(),
            });
            emit_affine_rebind(func, then_dest, cell_b, prime, ctx);
            split_behind_recheck(func, then_dest, phantom, cell_a, cell_b);
        }
        _ => {}
    }
}

/// Clone the real target into a statically reachable, dynamically dead
/// duplicate.
fn clone_phantom(func: &mut Function, target: BlockId) -> BlockId {
    let name = format!("{}.phantom", func.block(target).name);
    func.clone_block(target, name)
}

fn emit_cell_cmp(
    func: &mut Function,
    block: BlockId,
    cell_a: SlotId,
    cell_b: SlotId,
    pred: Pred,
) -> veil_ir::ValueId {
    let a = func.new_value(Width::W32);
    let b = func.new_value(Width::W32);
    let c = func.new_value(Width::W1);
    let insts = &mut func.block_mut(block).insts;
    insts.push(Inst::Load {
        dest: a,
        width: Width::W32,
        slot: cell_a,
    });
    insts.push(Inst::Load {
        dest: b,
        width: Width::W32,
        slot: cell_b,
    });
    insts.push(Inst::Cmp {
        dest: c,
        width: Width::W32,
        pred,
        lhs: a.into(),
        rhs: b.into(),
    });
    c
}

/// Append `b := (k·b + c) mod M` to `target`, with constants chosen so the
/// prime maps to itself: `c = (P − k·P) mod M`, `P < M < 2^16`, `k < 2^15`.
/// The intermediate product stays below 2^31, so nothing overflows at W32.
fn emit_affine_rebind(
    func: &mut Function,
    target: BlockId,
    cell_b: SlotId,
    prime: u64,
    ctx: &mut PassContext<'_>,
) {
    let k = ctx.rng.range_u64(2, 1 << 15);
    let modulus = ctx.rng.range_u64(prime + 1, 1 << 16);
    let c = (prime + modulus - (k * prime) % modulus) % modulus;

    let b = func.new_value(Width::W32);
    let scaled = func.new_value(Width::W32);
    let shifted = func.new_value(Width::W32);
    let reduced = func.new_value(Width::W32);
    let insts = &mut func.block_mut(target).insts;
    insts.push(Inst::Load {
        dest: b,
        width: Width::W32,
        slot: cell_b,
    });
    insts.push(Inst::Bin {
        dest: scaled,
        width: Width::W32,
        op: BinOp::Mul,
        lhs: b.into(),
        rhs: Operand::Const(k),
    });
    insts.push(Inst::Bin {
        dest: shifted,
        width: Width::W32,
        op: BinOp::Add,
        lhs: scaled.into(),
        rhs: Operand::Const(c),
    });
    insts.push(Inst::Bin {
        dest: reduced,
        width: Width::W32,
        op: BinOp::URem,
        lhs: shifted.into(),
        rhs: Operand::Const(modulus),
    });
    insts.push(Inst::Store {
        slot: cell_b,
        width: Width::W32,
        value: reduced.into(),
    });
}

/// Move `target`'s terminator into a continuation block behind a second
/// equality check whose failing edge goes to the phantom.
fn split_behind_recheck(
    func: &mut Function,
    target: BlockId,
    phantom: BlockId,
    cell_a: SlotId,
    cell_b: SlotId,
) {
    let cont = func.add_block(format!("{}.cont", func.block(target).name));
    let moved = func.block_mut(target).term.take();
    func.block_mut(cont).term = moved;

    let cond = emit_cell_cmp(func, target, cell_a, cell_b, Pred::Eq);
    let phantom_args: Vec<Operand> = func
        .block(target)
        .params
        .iter()
        .map(|&p| Operand::Value(p))
        .collect();
    func.block_mut(target).term = Some(Terminator::CondBr {
        cond: cond.into(),
        then_dest: cont,
        then_args: Vec::new(),
        else_dest: phantom,
        else_args: phantom_args,
    });
}

fn random_prime(rng: &mut ObfRng) -> u64 {
    loop {
        let candidate = rng.range_u64(3, 1 << 16) | 1;
        if is_prime(candidate) {
            return candidate;
        }
    }
}

fn is_prime(n: u64) -> bool {
    if n < 2 {
        return false;
    }
    if n % 2 == 0 {
        return n == 2;
    }
    let mut d = 3;
    while d * d <= n {
        if n % d == 0 {
            return false;
        }
        d += 2;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pass::PassConfig;
    use veil_ir::eval::{eval, eval_traced};
    use veil_ir::FuncBuilder;
    use veil_mba::MbaRewriter;

    fn apply(func: &mut Function, seed: u64) -> bool {
        let mut rng = ObfRng::seeded(seed);
        let mut mba = MbaRewriter::seeded(7);
        let config = PassConfig {
            bogus_ratio: 1.0,
            ..PassConfig::default()
        };
        let mut ctx = PassContext {
            rng: &mut rng,
            mba: &mut mba,
            config: &config,
        };
        BogusFlow.run(func, &mut ctx).unwrap()
    }

    /// abs-diff via a conditional branch into a parameterized join.
    fn absdiff() -> Function {
        let mut fb = FuncBuilder::new("absdiff", &[Width::W32, Width::W32], Some(Width::W32));
        let hi = fb.block("hi");
        let lo = fb.block("lo");
        let join = fb.block("join");
        let d = fb.block_param(join, Width::W32);
        let (a, b) = (fb.param(0), fb.param(1));
        let c = fb.cmp(Width::W32, Pred::Ult, a, b);
        fb.cond_br(c, hi, vec![], lo, vec![]);
        fb.switch_to(hi);
        let d1 = fb.bin(Width::W32, BinOp::Sub, b, a);
        fb.br(join, vec![d1.into()]);
        fb.switch_to(lo);
        let d2 = fb.bin(Width::W32, BinOp::Sub, a, b);
        fb.br(join, vec![d2.into()]);
        fb.switch_to(join);
        fb.ret(Some(d.into()));
        fb.finish().unwrap()
    }

    #[test]
    fn preserves_semantics_and_adds_dead_blocks() {
        let mut f = absdiff();
        let before = f.blocks.len();
        assert!(apply(&mut f, 42));
        f.verify().unwrap();
        assert!(f.blocks.len() > before);

        for (x, y) in [(0u64, 0u64), (3, 9), (9, 3), (u32::MAX as u64, 1)] {
            let (ret, trace) = eval_traced(&f, &[x, y]).unwrap();
            assert_eq!(ret, Some(x.abs_diff(y) & u32::MAX as u64));
            for b in trace {
                assert!(
                    !f.block(b).name.ends_with(".phantom"),
                    "phantom block executed"
                );
            }
        }
    }

    #[test]
    fn unconditional_branch_sites_are_guarded() {
        let mut fb = FuncBuilder::new("chain", &[Width::W32], Some(Width::W32));
        let tail = fb.block("tail");
        let x = fb.param(0);
        let doubled = fb.bin(Width::W32, BinOp::Add, x, x);
        fb.br(tail, vec![]);
        fb.switch_to(tail);
        let out = fb.bin(Width::W32, BinOp::Add, doubled, Operand::Const(5));
        fb.ret(Some(out.into()));
        let mut f = fb.finish().unwrap();

        assert!(apply(&mut f, 9));
        f.verify().unwrap();
        assert_eq!(eval(&f, &[10]).unwrap(), Some(25));
        // The sole Br site must now end in a guarded conditional branch.
        assert!(matches!(
            f.block(f.entry()).term,
            Some(Terminator::CondBr { .. })
        ));
    }

    #[test]
    fn same_seed_is_byte_identical() {
        let mut a = absdiff();
        let mut b = absdiff();
        apply(&mut a, 1234);
        apply(&mut b, 1234);
        assert_eq!(a, b);
    }

    #[test]
    fn no_branch_sites_means_no_change() {
        let mut fb = FuncBuilder::new("leaf", &[Width::W32], Some(Width::W32));
        let x = fb.param(0);
        fb.ret(Some(x.into()));
        let mut f = fb.finish().unwrap();
        assert!(!apply(&mut f, 42));
    }

    #[test]
    fn missing_terminator_is_unsupported() {
        let mut f = Function::new("broken", &[], None);
        f.add_block("entry");
        let mut rng = ObfRng::seeded(1);
        let mut mba = MbaRewriter::seeded(1);
        let config = PassConfig::default();
        let mut ctx = PassContext {
            rng: &mut rng,
            mba: &mut mba,
            config: &config,
        };
        assert!(matches!(
            BogusFlow.run(&mut f, &mut ctx),
            Err(PassError::Unsupported { .. })
        ));
    }

    #[test]
    fn small_primes_only() {
        let mut rng = ObfRng::seeded(3);
        for _ in 0..32 {
            let p = random_prime(&mut rng);
            assert!(p > 2 && p < (1 << 16));
            assert!(is_prime(p));
        }
    }
}
