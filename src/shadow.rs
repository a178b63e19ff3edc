//! Per-device cache of the last value written with property id
//! `UNSAVED_VALUE_QSP`.
//!
//! Some values written to a device cannot be read back: the device accepts
//! them into RAM but never persists or echoes them. The shadow store lets
//! the host answer "what did I last set this to" without a bus round-trip,
//! while a `VALUE_QSP` read always goes straight to the device.

use std::collections::HashMap;
use std::sync::Mutex;

/// Read-through cache keyed by parameter/user-info name (not numeric id).
pub struct ShadowStore {
    values: Mutex<HashMap<String, Vec<u8>>>,
}

impl ShadowStore {
    pub fn new() -> Self {
        ShadowStore {
            values: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the cached value for `name`, if any has been written.
    pub fn get(&self, name: &str) -> Option<Vec<u8>> {
        self.values.lock().unwrap().get(name).cloned()
    }

    /// Records `value` as the last value written to `name`.
    pub fn save(&self, name: &str, value: Vec<u8>) {
        self.values.lock().unwrap().insert(name.to_string(), value);
    }
}

impl Default for ShadowStore {
    fn default() -> Self {
        Self::new()
    }
}
