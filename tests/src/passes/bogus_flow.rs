use veil_ir::eval::eval_traced;
use veil_passes::{PassConfig, PassRegistry, Pipeline};
use veil_utils::rng::ObfRng;

use crate::fixtures;

fn bogus_pipeline(seed: u64) -> Pipeline {
    let registry = PassRegistry::with_builtins();
    let config = PassConfig {
        bogus_ratio: 1.0,
        ..PassConfig::default()
    };
    let mut pipeline = Pipeline::new(config, ObfRng::seeded(seed));
    pipeline.push(registry.build("bogus-flow").unwrap());
    pipeline
}

#[test]
fn clones_are_reachable_but_never_executed() {
    let mut module = fixtures::module_of([fixtures::sum_to_n()]);
    let before = module.get("sum").unwrap().blocks.len();
    assert!(bogus_pipeline(42).run(&mut module).unwrap());

    let f = module.get("sum").unwrap();
    assert!(f.blocks.len() > before, "instrumentation adds blocks");
    let phantoms: Vec<_> = f
        .block_ids()
        .filter(|&b| f.block(b).name.ends_with(".phantom"))
        .collect();
    assert!(!phantoms.is_empty(), "at least one dead clone exists");

    for n in [0u64, 1, 5, 30] {
        let (ret, trace) = eval_traced(f, &[n]).unwrap();
        assert_eq!(ret, Some(n * n.saturating_sub(1) / 2));
        for b in &trace {
            assert!(!phantoms.contains(b), "phantom executed for n={n}");
        }
    }
}

#[test]
fn conditional_sites_survive_on_both_arms() {
    let mut module = fixtures::module_of([fixtures::max32()]);
    assert!(bogus_pipeline(8).run(&mut module).unwrap());
    let f = module.get("max").unwrap();
    for (a, b) in [(0u64, 0u64), (1, 9), (9, 1), (u32::MAX as u64, 0)] {
        let (ret, _) = eval_traced(f, &[a, b]).unwrap();
        assert_eq!(ret, Some(a.max(b)));
    }
}
