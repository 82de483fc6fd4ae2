use veil_ir::eval::eval;
use veil_ir::Module;
use veil_passes::{PassConfig, PassRegistry, Pipeline};
use veil_utils::rng::ObfRng;

use crate::fixtures;

fn build_pipeline(seed: u64, names: &[&str]) -> Pipeline {
    let registry = PassRegistry::with_builtins();
    let mut pipeline = Pipeline::seeded(seed);
    for name in names {
        pipeline.push(registry.build(name).unwrap());
    }
    pipeline
}

const W32_MASK: u64 = u32::MAX as u64;

#[test]
fn bogus_then_flatten_preserves_add_at_seed_42() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();

    let mut module = fixtures::module_of([fixtures::add32()]);
    let mut pipeline = build_pipeline(42, &["bogus-flow", "flatten"]);
    assert!(pipeline.run(&mut module).unwrap());
    assert!(pipeline.modified());

    let f = module.get("add").unwrap();
    let dispatchers = f
        .block_ids()
        .filter(|&b| matches!(f.block(b).term, Some(veil_ir::Terminator::Switch { .. })))
        .count();
    assert_eq!(dispatchers, 1, "exactly one dispatch block");
    assert!(
        f.block_ids().any(|b| f.block(b).name.ends_with(".phantom")),
        "at least one dead clone"
    );

    let boundary = [
        (0u64, 0u64),
        (1, 2),
        (W32_MASK, 1),
        (W32_MASK, W32_MASK),
        (0x8000_0000, 0x8000_0000),
    ];
    for (a, b) in boundary {
        assert_eq!(
            eval(f, &[a, b]).unwrap(),
            Some(a.wrapping_add(b) & W32_MASK),
            "add({a},{b})"
        );
    }
}

#[test]
fn full_pipeline_preserves_loops() {
    let mut module = fixtures::module_of([fixtures::sum_to_n(), fixtures::gcd()]);
    let mut pipeline = build_pipeline(7, &["bogus-flow", "flatten", "mba-substitution"]);
    assert!(pipeline.run(&mut module).unwrap());

    let sum = module.get("sum").unwrap();
    for n in [0u64, 1, 7, 50] {
        assert_eq!(eval(sum, &[n]).unwrap(), Some(n * n.saturating_sub(1) / 2));
    }
    let gcd = module.get("gcd").unwrap();
    for (a, b, g) in [(48u64, 18, 6u64), (17, 5, 1), (0, 9, 9), (9, 0, 9)] {
        assert_eq!(eval(gcd, &[a, b]).unwrap(), Some(g));
    }
}

#[test]
fn same_seed_pipelines_produce_identical_modules() {
    let mut first = fixtures::module_of([fixtures::max32(), fixtures::sum_to_n()]);
    let mut second = first.clone();
    build_pipeline(99, &["bogus-flow", "flatten", "mba-substitution"])
        .run(&mut first)
        .unwrap();
    build_pipeline(99, &["bogus-flow", "flatten", "mba-substitution"])
        .run(&mut second)
        .unwrap();
    assert_eq!(first, second);
}

#[test]
fn rerunning_a_pipeline_compounds_transformations() {
    let mut module = fixtures::module_of([fixtures::gcd()]);
    let mut pipeline = build_pipeline(3, &["bogus-flow", "flatten"]);
    assert!(pipeline.run(&mut module).unwrap());
    let once = module.clone();
    assert!(pipeline.run(&mut module).unwrap());
    assert_ne!(module, once, "second run keeps transforming");
    let gcd = module.get("gcd").unwrap();
    assert_eq!(eval(gcd, &[48, 18]).unwrap(), Some(6));
}

#[test]
fn target_filter_leaves_other_functions_untouched() {
    let mut module = fixtures::module_of([fixtures::add32(), fixtures::gcd()]);
    let untouched = fixtures::add32();
    let mut pipeline = build_pipeline(11, &["flatten"]);
    pipeline.target("gcd");
    assert!(pipeline.run(&mut module).unwrap());
    assert_eq!(module.get("add").unwrap(), &untouched);
    assert!(module.get("gcd").unwrap().blocks.len() > fixtures::gcd().blocks.len());
}

#[test]
fn json_config_drives_the_pipeline() {
    let config: PassConfig =
        serde_json::from_str(r#"{ "bogus_ratio": 1.0, "poly_width_cap": 16 }"#).unwrap();
    let registry = PassRegistry::with_builtins();
    let mut pipeline = Pipeline::new(config, ObfRng::seeded(5));
    pipeline.push(registry.build("bogus-flow").unwrap());
    pipeline.push(registry.build("mba-substitution").unwrap());

    let mut module = fixtures::module_of([fixtures::mix8()]);
    assert!(pipeline.run(&mut module).unwrap());
    let mix = module.get("mix").unwrap();
    for x in (0..=255u64).step_by(13) {
        for y in (0..=255u64).step_by(29) {
            assert_eq!(eval(mix, &[x, y]).unwrap(), Some(fixtures::mix8_reference(x, y)));
        }
    }
}

#[test]
fn os_entropy_runs_still_preserve_semantics() {
    let mut module = fixtures::module_of([fixtures::gcd()]);
    let registry = PassRegistry::with_builtins();
    let mut pipeline = Pipeline::new(PassConfig::default(), ObfRng::unpredictable());
    for name in registry.names() {
        let pass = registry.build(name).unwrap();
        pipeline.push(pass);
    }
    assert!(pipeline.run(&mut module).unwrap());
    let gcd = module.get("gcd").unwrap();
    for (a, b, g) in [(48u64, 18, 6u64), (100, 75, 25)] {
        assert_eq!(eval(gcd, &[a, b]).unwrap(), Some(g));
    }
}

#[test]
fn empty_module_is_a_clean_no_op() {
    let mut module = Module::new("empty");
    let mut pipeline = build_pipeline(1, &["flatten"]);
    assert!(!pipeline.run(&mut module).unwrap());
    assert!(!pipeline.modified());
}
