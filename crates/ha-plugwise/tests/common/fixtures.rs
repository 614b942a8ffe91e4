//! Test fixtures and data loading

use std::path::Path;

use ha_plugwise::{PlugwiseData, SmileInfo, StickNode};
use serde::Deserialize;

/// Load a fixture file as a string
///
/// Fixtures are stored in the `tests/fixtures/` directory.
pub fn load_fixture(name: &str) -> String {
    let path = Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name);

    std::fs::read_to_string(&path).unwrap_or_else(|e| {
        panic!(
            "Failed to load fixture '{}' from {:?}: {}",
            name, path, e
        )
    })
}

/// Load a fixture file as JSON
pub fn load_json_fixture(name: &str) -> serde_json::Value {
    let content = load_fixture(name);
    serde_json::from_str(&content).unwrap_or_else(|e| {
        panic!("Failed to parse fixture '{}' as JSON: {}", name, e)
    })
}

/// A recorded Smile: what it says while connecting and what it polls
#[derive(Debug, Clone, Deserialize)]
pub struct SmileFixture {
    pub info: SmileInfo,
    #[serde(flatten)]
    pub data: PlugwiseData,
}

pub fn load_smile_fixture(name: &str) -> SmileFixture {
    serde_json::from_value(load_json_fixture(name)).unwrap_or_else(|e| {
        panic!("Fixture '{}' is not a Smile recording: {}", name, e)
    })
}

pub fn load_stick_fixture(name: &str) -> Vec<StickNode> {
    serde_json::from_value(load_json_fixture(name)).unwrap_or_else(|e| {
        panic!("Fixture '{}' is not a list of stick nodes: {}", name, e)
    })
}
