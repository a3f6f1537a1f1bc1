#![allow(dead_code)]

use methoddata::{ProfileLayout, TypeSchema};
use std::path::PathBuf;

pub fn schema_path() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/data/schema-lp64.json")
}

pub fn schema() -> TypeSchema {
    TypeSchema::from_path(schema_path()).unwrap()
}

pub fn layout() -> ProfileLayout {
    ProfileLayout::from_schema(&schema()).unwrap()
}
