//! Local mocked-API overrides for offline development and testing.
//!
//! When `GUST_MOCKED_API_FILE` points at a JSON file of the form
//! `{"variables": {...}, "resources": {...}}`, variable and resource reads
//! prefer the mock map and fall back to the network only on a miss. Writes
//! only ever touch the mock, never the server.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use log::{debug, warn};
use serde::Deserialize;
use serde_json::Value;

/// In-memory override maps for variables and resources.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct MockedApi {
    pub variables: HashMap<String, String>,
    pub resources: HashMap<String, Value>,
}

impl MockedApi {
    /// Load the mock from a JSON file.
    ///
    /// A malformed or unreadable file is tolerated: the error is logged and an
    /// empty mock is returned, so client construction never fails on it.
    pub fn load(path: &Path) -> MockedApi {
        match fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str::<MockedApi>(&contents) {
                Ok(mock) => mock,
                Err(e) => {
                    warn!(
                        "Mocked API file unparseable path={} error={}. Using empty mock.",
                        path.display(),
                        e
                    );
                    MockedApi::default()
                }
            },
            Err(e) => {
                warn!(
                    "Mocked API file unreadable path={} error={}. Using empty mock.",
                    path.display(),
                    e
                );
                MockedApi::default()
            }
        }
    }

    pub fn get_variable(&self, path: &str) -> Option<String> {
        let value = self.variables.get(path).cloned();
        if value.is_none() {
            debug!("Mock miss for variable path={}", path);
        }
        value
    }

    pub fn set_variable(&mut self, path: &str, value: String) {
        self.variables.insert(path.to_string(), value);
    }

    pub fn get_resource(&self, path: &str) -> Option<Value> {
        let value = self.resources.get(path).cloned();
        if value.is_none() {
            debug!("Mock miss for resource path={}", path);
        }
        value
    }

    pub fn set_resource(&mut self, path: &str, value: Value) {
        self.resources.insert(path.to_string(), value);
    }
}
