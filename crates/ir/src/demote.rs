//! Demotion of SSA-style merges into stack-slot traffic.
//!
//! Flattening severs the structural adjacency between blocks, so values
//! that cross block boundaries — block parameters and ordinary results
//! used elsewhere — are first rewritten as stores at every definition and
//! loads at every use. After both demotions every block is self-contained
//! apart from function parameters.

use std::collections::HashMap;

use crate::module::{BlockId, Function, Inst, Operand, SlotId, Terminator, ValueId};

/// Rewrite every block parameter as a slot: predecessors store their edge
/// argument immediately before branching, and the parameter value becomes
/// a leading load of the slot.
///
/// A conditional branch whose two edges target the same block with
/// different arguments goes through a `Select`; when the targets differ,
/// both edges' stores are emitted unconditionally — the slot loads sit at
/// the very top of each target, so the store on the not-taken edge is
/// overwritten before it can ever be observed.
pub fn demote_block_params(func: &mut Function) {
    let mut param_slots: HashMap<BlockId, Vec<SlotId>> = HashMap::new();
    for b in func.block_ids() {
        let params = func.block(b).params.clone();
        if params.is_empty() {
            continue;
        }
        let slots = params
            .iter()
            .map(|&p| func.new_slot(func.value_width(p)))
            .collect();
        param_slots.insert(b, slots);
    }
    if param_slots.is_empty() {
        return;
    }

    for b in func.block_ids() {
        let Some(term) = func.block(b).term.clone() else {
            continue;
        };
        match term {
            Terminator::Br { target, args } if !args.is_empty() => {
                emit_edge_stores(func, b, target, &args, &param_slots);
                func.block_mut(b).term = Some(Terminator::Br {
                    target,
                    args: Vec::new(),
                });
            }
            Terminator::CondBr {
                cond,
                then_dest,
                then_args,
                else_dest,
                else_args,
            } if !then_args.is_empty() || !else_args.is_empty() => {
                if then_dest == else_dest {
                    let slots = param_slots[&then_dest].clone();
                    for ((&ta, &ea), &slot) in then_args.iter().zip(&else_args).zip(&slots) {
                        let width = func.slot_width(slot);
                        let value = if ta == ea {
                            ta
                        } else {
                            let sel = func.new_value(width);
                            func.block_mut(b).insts.push(Inst::Select {
                                dest: sel,
                                width,
                                cond,
                                on_true: ta,
                                on_false: ea,
                            });
                            Operand::Value(sel)
                        };
                        func.block_mut(b).insts.push(Inst::Store { slot, width, value });
                    }
                } else {
                    emit_edge_stores(func, b, then_dest, &then_args, &param_slots);
                    emit_edge_stores(func, b, else_dest, &else_args, &param_slots);
                }
                func.block_mut(b).term = Some(Terminator::CondBr {
                    cond,
                    then_dest,
                    then_args: Vec::new(),
                    else_dest,
                    else_args: Vec::new(),
                });
            }
            _ => {}
        }
    }

    for b in func.block_ids() {
        let Some(slots) = param_slots.get(&b).cloned() else {
            continue;
        };
        let params = std::mem::take(&mut func.block_mut(b).params);
        for (i, (&p, &slot)) in params.iter().zip(&slots).enumerate() {
            let width = func.slot_width(slot);
            // The parameter's value id becomes the load destination, so
            // every existing use stays valid.
            func.block_mut(b)
                .insts
                .insert(i, Inst::Load { dest: p, width, slot });
        }
    }
}

fn emit_edge_stores(
    func: &mut Function,
    from: BlockId,
    target: BlockId,
    args: &[Operand],
    param_slots: &HashMap<BlockId, Vec<SlotId>>,
) {
    if args.is_empty() {
        return;
    }
    let slots = param_slots[&target].clone();
    for (&arg, &slot) in args.iter().zip(&slots) {
        let width = func.slot_width(slot);
        func.block_mut(from).insts.push(Inst::Store {
            slot,
            width,
            value: arg,
        });
    }
}

/// Rewrite every instruction result used outside its defining block as a
/// slot: a store follows the definition, and each foreign use reads
/// through a fresh load. Function parameters are left alone — they are
/// bound once at entry and remain valid everywhere. Expects block
/// parameters to have been demoted already.
pub fn demote_cross_block_values(func: &mut Function) {
    let mut def_block: HashMap<ValueId, BlockId> = HashMap::new();
    for b in func.block_ids() {
        debug_assert!(b == func.entry() || func.block(b).params.is_empty());
        for inst in &func.block(b).insts {
            if let Some(dest) = inst.dest() {
                def_block.insert(dest, b);
            }
        }
    }

    let mut crossing: Vec<ValueId> = Vec::new();
    for b in func.block_ids() {
        let block = func.block(b);
        let mut note = |op: Operand| {
            if let Operand::Value(v) = op {
                if let Some(&db) = def_block.get(&v) {
                    if db != b && !crossing.contains(&v) {
                        crossing.push(v);
                    }
                }
            }
        };
        for inst in &block.insts {
            for op in inst.operands() {
                note(op);
            }
        }
        if let Some(term) = &block.term {
            for op in term.operands() {
                note(op);
            }
        }
    }
    crossing.sort();

    for v in crossing {
        let width = func.value_width(v);
        let slot = func.new_slot(width);
        let db = def_block[&v];

        let Some(pos) = func.block(db).insts.iter().position(|i| i.dest() == Some(v)) else {
            continue;
        };
        func.block_mut(db).insts.insert(
            pos + 1,
            Inst::Store {
                slot,
                width,
                value: Operand::Value(v),
            },
        );

        for b in func.block_ids() {
            if b == db {
                continue;
            }
            let mut i = 0;
            while i < func.block(b).insts.len() {
                let uses_v = func.block(b).insts[i]
                    .operands()
                    .iter()
                    .any(|&op| op == Operand::Value(v));
                if uses_v {
                    let fresh = func.new_value(width);
                    let block = func.block_mut(b);
                    block.insts.insert(
                        i,
                        Inst::Load {
                            dest: fresh,
                            width,
                            slot,
                        },
                    );
                    for op in block.insts[i + 1].operands_mut() {
                        if *op == Operand::Value(v) {
                            *op = Operand::Value(fresh);
                        }
                    }
                    i += 2;
                } else {
                    i += 1;
                }
            }

            let term_uses_v = func
                .block(b)
                .term
                .as_ref()
                .is_some_and(|t| t.operands().iter().any(|&op| op == Operand::Value(v)));
            if term_uses_v {
                let fresh = func.new_value(width);
                let block = func.block_mut(b);
                block.insts.push(Inst::Load {
                    dest: fresh,
                    width,
                    slot,
                });
                if let Some(term) = block.term.as_mut() {
                    for op in term.operands_mut() {
                        if *op == Operand::Value(v) {
                            *op = Operand::Value(fresh);
                        }
                    }
                }
            }
        }
    }
}
