use keel_ast::build::*;
use keel_ast::{BinOp, FnDecl};
use miette::{Result, miette};
use proptest::{
    prelude::{any, prop},
    prop_assert, prop_assert_eq,
    test_runner::{Config, TestRunner},
};

use keel_core::comptime::ComptimeEnv;
use keel_core::{CheckConfig, ComptimeCache, ComptimeConfig, ComptimeValue, ErrorKind, check};

const FIELD_TYPES: [(&str, u64); 5] = [("u8", 1), ("u16", 2), ("u32", 4), ("u64", 8), ("bool", 1)];

fn runner(cases: u32) -> TestRunner {
    TestRunner::new(Config {
        cases,
        ..Config::default()
    })
}

fn fields_from(picks: &[usize]) -> Vec<keel_ast::FieldDecl> {
    picks
        .iter()
        .enumerate()
        .map(|(i, pick)| field(&format!("f{i}"), ty(FIELD_TYPES[pick % FIELD_TYPES.len()].0)))
        .collect()
}

/// Every field sits at a multiple of its alignment, after the previous one,
/// and the size is a multiple of the struct alignment.
#[test]
fn natural_layout_respects_alignment() -> Result<()> {
    let strat = prop::collection::vec(0usize..FIELD_TYPES.len(), 1..10);
    runner(128)
        .run(&strat, |picks| {
            let m = module("gen", vec![struct_decl("S", fields_from(&picks))]);
            let (annotated, diagnostics) = check(&m);
            prop_assert!(diagnostics.is_empty(), "{}", diagnostics.report());
            let layout = annotated.struct_layout("S").expect("layout");

            let mut end = 0u64;
            let mut widest = 1u64;
            for (f, pick) in layout.fields.iter().zip(&picks) {
                let size = FIELD_TYPES[*pick].1;
                prop_assert_eq!(f.offset % size, 0, "field {} misaligned", f.name);
                prop_assert!(f.offset >= end, "field {} overlaps its predecessor", f.name);
                end = f.offset + size;
                widest = widest.max(size);
            }
            prop_assert_eq!(layout.align, widest);
            prop_assert_eq!(layout.size % layout.align, 0);
            prop_assert!(layout.size >= end);
            Ok(())
        })
        .map_err(|e| miette!("{e}"))
}

#[test]
fn packed_size_is_the_sum_of_field_sizes() -> Result<()> {
    let strat = prop::collection::vec(0usize..FIELD_TYPES.len(), 1..10);
    runner(128)
        .run(&strat, |picks| {
            let m = module("gen", vec![packed_struct("P", fields_from(&picks))]);
            let (annotated, diagnostics) = check(&m);
            prop_assert!(diagnostics.is_empty(), "{}", diagnostics.report());
            let layout = annotated.struct_layout("P").expect("layout");
            let sum: u64 = picks.iter().map(|p| FIELD_TYPES[*p].1).sum();
            prop_assert_eq!(layout.size, sum);
            prop_assert_eq!(layout.align, 1);
            Ok(())
        })
        .map_err(|e| miette!("{e}"))
}

/// Two checks of the same declarations agree on every layout.
#[test]
fn layout_is_deterministic() -> Result<()> {
    let strat = prop::collection::vec(0usize..FIELD_TYPES.len(), 0..12);
    runner(64)
        .run(&strat, |picks| {
            let m = module("gen", vec![struct_decl("S", fields_from(&picks))]);
            let (a, _) = check(&m);
            let (b, _) = check(&m);
            prop_assert_eq!(a.struct_layout("S"), b.struct_layout("S"));
            Ok(())
        })
        .map_err(|e| miette!("{e}"))
}

#[test]
fn u8_addition_traps_exactly_on_overflow() -> Result<()> {
    runner(256)
        .run(&(any::<u8>(), any::<u8>()), |(a, b)| {
            let m = module(
                "math",
                vec![
                    const_decl("SUM", Some(ty("u8")), add(int(a.into()), int(b.into()))),
                    const_decl(
                        "WRAPPED",
                        Some(ty("u8")),
                        binary(int(a.into()), BinOp::AddWrap, int(b.into())),
                    ),
                ],
            );
            let (annotated, diagnostics) = check(&m);

            let overflows = u16::from(a) + u16::from(b) > 255;
            prop_assert_eq!(diagnostics.contains_kind(ErrorKind::ComptimeTrap), overflows);
            if !overflows {
                prop_assert_eq!(
                    annotated.const_value("SUM").and_then(ComptimeValue::as_int),
                    Some(i128::from(a) + i128::from(b))
                );
            }
            prop_assert_eq!(
                annotated.const_value("WRAPPED").and_then(ComptimeValue::as_int),
                Some(i128::from(a.wrapping_add(b)))
            );
            Ok(())
        })
        .map_err(|e| miette!("{e}"))
}

struct NoNames;

impl ComptimeEnv for NoNames {
    fn constant(&self, _name: &str) -> Option<ComptimeValue> {
        None
    }

    fn function(&self, _name: &str) -> Option<&FnDecl> {
        None
    }
}

/// A second evaluation of a structurally equal expression is served from
/// the memo and yields the same value.
#[test]
fn comptime_memo_returns_the_first_result() -> Result<()> {
    let limits = ComptimeConfig::default();
    runner(64)
        .run(&(0i128..1000, 0i128..1000), |(a, b)| {
            let cache = ComptimeCache::new();
            let first = cache.evaluate(&NoNames, &limits, &mul(int(a), add(int(b), int(1))), None);
            let second = cache.evaluate(&NoNames, &limits, &mul(int(a), add(int(b), int(1))), None);

            prop_assert_eq!(&first, &second);
            prop_assert_eq!(first.ok().and_then(|v| v.as_int()), Some(a * (b + 1)));
            let stats = cache.stats();
            prop_assert_eq!((stats.hits, stats.misses), (1, 1));
            Ok(())
        })
        .map_err(|e| miette!("{e}"))
}

#[test]
fn config_sections_parse_from_toml() -> Result<()> {
    runner(32)
        .run(&(1u64..1_000_000, prop::bool::ANY), |(steps, parallel)| {
            let text = format!("parallel = {parallel}\n\n[comptime]\nmax_steps = {steps}\n");
            let config = CheckConfig::from_toml_str(&text).expect("config");
            prop_assert_eq!(config.parallel, parallel);
            prop_assert_eq!(config.comptime.max_steps, steps);
            prop_assert_eq!(config.target, CheckConfig::default().target);
            Ok(())
        })
        .map_err(|e| miette!("{e}"))
}
