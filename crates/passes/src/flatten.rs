//! Control-flow flattening with a dominance-derived key schedule.
//!
//! Every block's successor choice is rewritten as a store of an encrypted
//! state id followed by a jump to one central dispatcher. The encryption
//! key for a block's id lives in a per-block stack cell that is seeded at
//! entry and rotated exactly once, by the first-executing strict dominator
//! of that block; which dominator that is is a static fact of the
//! dominator tree, so the matching decryption constant can be folded into
//! the stored id at compile time. A decompiler that ignores the key cells
//! sees a switch over opaque values; one that mis-tracks a single rotation
//! lands in the trap default.

use std::collections::{HashMap, HashSet};

use veil_ir::demote::{demote_block_params, demote_cross_block_values};
use veil_ir::{BinOp, BlockId, Function, Inst, Operand, Pred, SlotId, Terminator, Width};
use veil_utils::errors::PassError;

use crate::pass::{FunctionPass, PassContext};

/// Dispatch ids start here so they never collide with small constants the
/// function itself computes on.
const STATE_FLOOR: u64 = 0x000F_0000;

/// Control-flow flattening pass.
#[derive(Debug)]
pub struct Flatten;

struct BlockKey {
    slot: SlotId,
    flag: SlotId,
    init: u64,
}

impl FunctionPass for Flatten {
    fn name(&self) -> &'static str {
        "flatten"
    }

    fn run(&self, func: &mut Function, ctx: &mut PassContext<'_>) -> Result<bool, PassError> {
        if func.blocks.len() < 2 {
            tracing::debug!(function = %func.name, "fewer than two blocks, skipping");
            return Ok(false);
        }
        for b in func.block_ids() {
            if func.block(b).term.is_none() {
                return Err(PassError::Unsupported {
                    function: func.name.clone(),
                    reason: format!("block `{}` has no terminator", func.block(b).name),
                });
            }
        }

        // Dispatch severs structural adjacency, so all cross-block value
        // flow goes through slots first.
        demote_block_params(func);
        demote_cross_block_values(func);

        let originals: Vec<BlockId> = func.block_ids().collect();
        let entry = func.entry();
        let dom = func.dominator_tree();

        let mut ids: HashMap<BlockId, u64> = HashMap::new();
        let mut used: HashSet<u64> = HashSet::new();
        for &b in &originals {
            loop {
                let id = ctx.rng.range_u64(STATE_FLOOR, 1 << 32);
                if used.insert(id) {
                    ids.insert(b, id);
                    break;
                }
            }
        }

        let mut keys: HashMap<BlockId, BlockKey> = HashMap::new();
        for &b in &originals {
            keys.insert(
                b,
                BlockKey {
                    slot: func.new_slot(Width::W32),
                    flag: func.new_slot(Width::W32),
                    init: ctx.rng.next_uint(32),
                },
            );
        }

        // One rotation constant per (dominator, dominated) pair. The entry
        // block is excluded from ownership: it executes first on every
        // path, so its rotation would mask all the others.
        let mut rot: HashMap<(BlockId, BlockId), u64> = HashMap::new();
        for &b in &originals {
            if b == entry {
                continue;
            }
            for &d in &originals {
                if dom.strictly_dominates(b, d) {
                    rot.insert((b, d), ctx.rng.next_uint(32));
                }
            }
        }

        // The key cell for `t` holds, by the time any predecessor branches
        // to `t`, its initial value xor the rotation constant of the
        // topmost non-entry strict dominator of `t` (if one exists).
        let expect = |t: BlockId| -> u64 {
            let chain = dom.strict_dominators(t);
            let init = keys[&t].init;
            if chain.len() >= 2 {
                let owner = chain[chain.len() - 2];
                init ^ rot[&(owner, t)]
            } else {
                init
            }
        };

        // Entry prologue: seed every key cell, clear every rotation flag.
        let mut prologue = Vec::with_capacity(originals.len() * 2);
        for &b in &originals {
            let k = &keys[&b];
            prologue.push(Inst::Store {
                slot: k.slot,
                width: Width::W32,
                value: Operand::Const(k.init),
            });
            prologue.push(Inst::Store {
                slot: k.flag,
                width: Width::W32,
                value: Operand::Const(0),
            });
        }
        func.block_mut(entry).insts.splice(0..0, prologue);

        // Branchless rotation: `mask = flag - 1` is all-ones exactly when
        // the flag is still clear, so only the first-executing dominator's
        // constant lands in the key cell.
        for &b in &originals {
            if b == entry {
                continue;
            }
            for &d in &originals {
                let Some(&r) = rot.get(&(b, d)) else {
                    continue;
                };
                let kd = &keys[&d];
                let flag = func.new_value(Width::W32);
                let mask = func.new_value(Width::W32);
                let gated = func.new_value(Width::W32);
                let key = func.new_value(Width::W32);
                let mixed = func.new_value(Width::W32);
                let insts = &mut func.block_mut(b).insts;
                insts.push(Inst::Load {
                    dest: flag,
                    width: Width::W32,
                    slot: kd.flag,
                });
                insts.push(Inst::Bin {
                    dest: mask,
                    width: Width::W32,
                    op: BinOp::Sub,
                    lhs: flag.into(),
                    rhs: Operand::Const(1),
                });
                insts.push(Inst::Bin {
                    dest: gated,
                    width: Width::W32,
                    op: BinOp::And,
                    lhs: mask.into(),
                    rhs: Operand::Const(r),
                });
                insts.push(Inst::Load {
                    dest: key,
                    width: Width::W32,
                    slot: kd.slot,
                });
                insts.push(Inst::Bin {
                    dest: mixed,
                    width: Width::W32,
                    op: BinOp::Xor,
                    lhs: key.into(),
                    rhs: gated.into(),
                });
                insts.push(Inst::Store {
                    slot: kd.slot,
                    width: Width::W32,
                    value: mixed.into(),
                });
                insts.push(Inst::Store {
                    slot: kd.flag,
                    width: Width::W32,
                    value: Operand::Const(1),
                });
            }
        }

        let state_slot = func.new_slot(Width::W32);
        let dispatch = func.add_block("dispatch");
        let trap = func.add_block("dispatch.trap");
        func.block_mut(trap).term = Some(Terminator::Trap);

        // Rewrite every terminator to encrypt the successor id and hand
        // control to the dispatcher. Ret and Trap simply stay.
        for &b in &originals {
            let Some(term) = func.block(b).term.clone() else {
                continue;
            };
            match term {
                Terminator::Ret { .. } | Terminator::Trap => {}
                Terminator::Br { target, .. } => {
                    let enc = emit_encrypted_id(
                        func,
                        b,
                        keys[&target].slot,
                        ids[&target] ^ expect(target),
                    );
                    seal_to_dispatch(func, b, state_slot, enc.into(), dispatch);
                }
                Terminator::CondBr {
                    cond,
                    then_dest,
                    else_dest,
                    ..
                } => {
                    let then_enc = emit_encrypted_id(
                        func,
                        b,
                        keys[&then_dest].slot,
                        ids[&then_dest] ^ expect(then_dest),
                    );
                    let else_enc = emit_encrypted_id(
                        func,
                        b,
                        keys[&else_dest].slot,
                        ids[&else_dest] ^ expect(else_dest),
                    );
                    let sel = func.new_value(Width::W32);
                    func.block_mut(b).insts.push(Inst::Select {
                        dest: sel,
                        width: Width::W32,
                        cond,
                        on_true: then_enc.into(),
                        on_false: else_enc.into(),
                    });
                    seal_to_dispatch(func, b, state_slot, sel.into(), dispatch);
                }
                // Lowered to a compare/select chain so a function that
                // already carries a dispatcher can be flattened again.
                Terminator::Switch {
                    width,
                    value,
                    cases,
                    default,
                } => {
                    let mut acc: Operand = emit_encrypted_id(
                        func,
                        b,
                        keys[&default].slot,
                        ids[&default] ^ expect(default),
                    )
                    .into();
                    for (case_val, case_dest) in cases {
                        let hit = func.new_value(Width::W1);
                        func.block_mut(b).insts.push(Inst::Cmp {
                            dest: hit,
                            width,
                            pred: Pred::Eq,
                            lhs: value,
                            rhs: Operand::Const(case_val),
                        });
                        let case_enc = emit_encrypted_id(
                            func,
                            b,
                            keys[&case_dest].slot,
                            ids[&case_dest] ^ expect(case_dest),
                        );
                        let sel = func.new_value(Width::W32);
                        func.block_mut(b).insts.push(Inst::Select {
                            dest: sel,
                            width: Width::W32,
                            cond: hit.into(),
                            on_true: case_enc.into(),
                            on_false: acc,
                        });
                        acc = sel.into();
                    }
                    seal_to_dispatch(func, b, state_slot, acc, dispatch);
                }
            }
        }

        // The dispatcher itself: one case per original block, corruption
        // falls through to the trap.
        let state = func.new_value(Width::W32);
        func.block_mut(dispatch).insts.push(Inst::Load {
            dest: state,
            width: Width::W32,
            slot: state_slot,
        });
        let cases: Vec<(u64, BlockId)> = originals.iter().map(|&b| (ids[&b], b)).collect();
        func.block_mut(dispatch).term = Some(Terminator::Switch {
            width: Width::W32,
            value: state.into(),
            cases,
            default: trap,
        });

        tracing::debug!(function = %func.name, blocks = originals.len(), "flattened");
        Ok(true)
    }
}

/// Load `t`'s key cell and xor in the compile-time tweak; yields the
/// runtime dispatch id of the successor.
fn emit_encrypted_id(func: &mut Function, block: BlockId, key_slot: SlotId, tweak: u64) -> veil_ir::ValueId {
    let key = func.new_value(Width::W32);
    let enc = func.new_value(Width::W32);
    let insts = &mut func.block_mut(block).insts;
    insts.push(Inst::Load {
        dest: key,
        width: Width::W32,
        slot: key_slot,
    });
    insts.push(Inst::Bin {
        dest: enc,
        width: Width::W32,
        op: BinOp::Xor,
        lhs: key.into(),
        rhs: Operand::Const(tweak),
    });
    enc
}

fn seal_to_dispatch(
    func: &mut Function,
    block: BlockId,
    state_slot: SlotId,
    state: Operand,
    dispatch: BlockId,
) {
    func.block_mut(block).insts.push(Inst::Store {
        slot: state_slot,
        width: Width::W32,
        value: state,
    });
    func.block_mut(block).term = Some(Terminator::Br {
        target: dispatch,
        args: Vec::new(),
    });
}
