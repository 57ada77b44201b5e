//! Viewing-session properties.
//!
//! The synchronizer persists its changeset cursor as a session property so a
//! reopened image resumes where it left off.

use std::collections::HashMap;
use std::sync::Mutex;

/// Named integer properties attached to a viewing session.
pub trait SessionProperties: Send + Sync {
    fn get_cursor(&self, property: &str) -> Option<u64>;
    fn set_cursor(&self, property: &str, value: u64);
}

/// Session properties kept in memory.
#[derive(Debug, Default)]
pub struct MemorySession {
    properties: Mutex<HashMap<String, u64>>,
}

impl MemorySession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a property, as if restored from a saved session.
    #[must_use]
    pub fn with_cursor(self, property: &str, value: u64) -> Self {
        self.set_cursor(property, value);
        self
    }
}

impl SessionProperties for MemorySession {
    fn get_cursor(&self, property: &str) -> Option<u64> {
        self.properties
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(property)
            .copied()
    }

    fn set_cursor(&self, property: &str, value: u64) {
        self.properties
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(property.to_string(), value);
    }
}
