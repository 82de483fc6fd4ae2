use veil_ir::eval::eval;
use veil_ir::{BinOp, FuncBuilder, Inst, Width};
use veil_passes::{PassRegistry, Pipeline};

use crate::fixtures;

fn mba_pipeline(seed: u64) -> Pipeline {
    let registry = PassRegistry::with_builtins();
    let mut pipeline = Pipeline::seeded(seed);
    pipeline.push(registry.build("mba-substitution").unwrap());
    pipeline
}

#[test]
fn straight_line_mix_is_rewritten_and_equivalent() {
    let mut module = fixtures::module_of([fixtures::mix8()]);
    let before = module.get("mix").unwrap().block(veil_ir::BlockId(0)).insts.len();
    assert!(mba_pipeline(42).run(&mut module).unwrap());

    let f = module.get("mix").unwrap();
    assert!(
        f.block(f.entry()).insts.len() > before,
        "substitution expands the instruction stream"
    );
    for x in 0..=255u64 {
        for y in (0..=255u64).step_by(17) {
            assert_eq!(
                eval(f, &[x, y]).unwrap(),
                Some(fixtures::mix8_reference(x, y)),
                "mix({x},{y})"
            );
        }
    }
}

#[test]
fn wide_ops_are_rewritten_too() {
    let mut fb = FuncBuilder::new("wide", &[Width::W64, Width::W64], Some(Width::W64));
    let s = fb.bin(Width::W64, BinOp::Add, fb.param(0), fb.param(1));
    let r = fb.bin(Width::W64, BinOp::Xor, s, fb.param(0));
    fb.ret(Some(r.into()));
    let mut module = fixtures::module_of([fb.finish().unwrap()]);
    assert!(mba_pipeline(7).run(&mut module).unwrap());

    let f = module.get("wide").unwrap();
    for (a, b) in [
        (0u64, 0u64),
        (u64::MAX, 1),
        (0xDEAD_BEEF_0BAD_CAFE, 0x1234_5678_9ABC_DEF0),
    ] {
        assert_eq!(eval(f, &[a, b]).unwrap(), Some(a.wrapping_add(b) ^ a));
    }
}

#[test]
fn no_original_eligible_op_survives_unexpanded() {
    // A lone Add in a one-instruction block must be gone afterwards; the
    // expansion never emits a two-operand Add of the original parameters.
    let mut fb = FuncBuilder::new("one", &[Width::W32, Width::W32], Some(Width::W32));
    let (a, b) = (fb.param(0), fb.param(1));
    let s = fb.bin(Width::W32, BinOp::Add, a, b);
    fb.ret(Some(s.into()));
    let mut module = fixtures::module_of([fb.finish().unwrap()]);
    assert!(mba_pipeline(3).run(&mut module).unwrap());

    let f = module.get("one").unwrap();
    let direct_add = f.block(f.entry()).insts.iter().any(|inst| {
        matches!(
            inst,
            Inst::Bin { op: BinOp::Add, lhs, rhs, .. }
            if *lhs == a.into() && *rhs == b.into()
        )
    });
    assert!(!direct_add, "the original add must be replaced");
}
