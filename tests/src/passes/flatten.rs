use veil_ir::eval::eval_traced;
use veil_ir::Terminator;
use veil_passes::{PassRegistry, Pipeline};

use crate::fixtures;

fn flatten_pipeline(seed: u64) -> Pipeline {
    let registry = PassRegistry::with_builtins();
    let mut pipeline = Pipeline::seeded(seed);
    pipeline.push(registry.build("flatten").unwrap());
    pipeline
}

#[test]
fn every_function_gets_exactly_one_dispatcher() {
    let mut module = fixtures::module_of([fixtures::max32(), fixtures::gcd()]);
    let originals: Vec<usize> = module.functions().iter().map(|f| f.blocks.len()).collect();
    assert!(flatten_pipeline(42).run(&mut module).unwrap());

    for (f, original_blocks) in module.functions().iter().zip(originals) {
        let dispatchers: Vec<_> = f
            .block_ids()
            .filter(|&b| matches!(f.block(b).term, Some(Terminator::Switch { .. })))
            .collect();
        assert_eq!(dispatchers.len(), 1, "{}", f.name);
        let Some(Terminator::Switch { cases, default, .. }) = &f.block(dispatchers[0]).term
        else {
            unreachable!();
        };
        assert_eq!(cases.len(), original_blocks, "one case per original block");
        assert!(matches!(f.block(*default).term, Some(Terminator::Trap)));
    }
}

#[test]
fn control_always_returns_to_the_dispatcher() {
    let mut module = fixtures::module_of([fixtures::sum_to_n()]);
    assert!(flatten_pipeline(13).run(&mut module).unwrap());
    let f = module.get("sum").unwrap();
    let dispatch = f
        .block_ids()
        .find(|&b| matches!(f.block(b).term, Some(Terminator::Switch { .. })))
        .unwrap();

    let (ret, trace) = eval_traced(f, &[6]).unwrap();
    assert_eq!(ret, Some(15));
    for pair in trace.windows(2) {
        if pair[0] != dispatch {
            assert_eq!(pair[1], dispatch, "non-dispatch block must dispatch next");
        }
    }
}
