#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::fs;

use bridgekit::bridge_model;
use bridgekit::generate::{generate, RUNTIME, RUNTIME_FILE};
use bridgekit::registry::{CommandBuilder, FieldDefinition, ModelDefinition, NoParams, Registry};
use bridgekit::types::TypeDescriptor;

bridge_model! {
    pub struct Point {
        pub x: f64,
        pub y: f64,
    }
}

fn registry() -> Registry {
    let mut registry = Registry::new();
    registry
        .register(
            CommandBuilder::new("get_points", "geometry")
                .handler(|_: NoParams| async { Ok::<_, String>(vec![Point { x: 0.0, y: 1.0 }]) }),
        )
        .unwrap();
    bridgekit::demo::register(&mut registry).unwrap();
    registry
}

#[test]
fn regeneration_is_byte_identical() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("client").join("api.ts");

    generate(&registry(), &out).unwrap();
    let first = fs::read(&out).unwrap();
    generate(&registry(), &out).unwrap();
    let second = fs::read(&out).unwrap();

    assert_eq!(first, second);
    assert_eq!(
        fs::read_to_string(dir.path().join("client").join(RUNTIME_FILE)).unwrap(),
        RUNTIME
    );
}

#[test]
fn record_inside_list_is_declared_once() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("api.ts");
    generate(&registry(), &out).unwrap();
    let api = fs::read_to_string(&out).unwrap();

    assert_eq!(api.matches("export interface Point {").count(), 1);
    assert!(api.contains("export async function getPoints(): Promise<Point[]>"));
    assert_eq!(api.matches("export interface Category {").count(), 1);
    assert!(api.contains("  children: Category[];"));
    assert!(api.contains(
        "export function tick(args: { count: number; intervalMs?: number | null }): BridgeChannel<number>"
    ));
}

#[test]
fn failed_generation_leaves_previous_output() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("api.ts");
    generate(&registry(), &out).unwrap();
    let before = fs::read_to_string(&out).unwrap();

    let mut broken = registry();
    broken.models_mut().register_if_absent(
        ModelDefinition::new("Dangling")
            .with_field(FieldDefinition::new("target", TypeDescriptor::record("Missing"))),
    );
    let err = generate(&broken, &out).unwrap_err();
    assert_eq!(err.code(), "INTERNAL_ERROR");

    assert_eq!(fs::read_to_string(&out).unwrap(), before);
    assert!(!dir.path().join("api.ts.tmp").exists());
}
