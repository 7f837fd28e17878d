//! Latest-snapshot store for register values
//!
//! Readers always get a complete snapshot from one successful fetch. A
//! replacement swaps the whole `Arc`; the table inside a snapshot is never
//! mutated after construction.

use crate::client::{Register, RegisterTable};
use crate::error::{GruenbeckError, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{Arc, RwLock};

/// Complete register table from one fetch
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Snapshot {
    /// Register values
    pub table: RegisterTable,
    /// Number of replacements so far (0 = nothing fetched yet)
    pub sequence: u64,
    /// When the fetch that produced this snapshot completed
    pub fetched_at: Option<DateTime<Utc>>,
}

impl Snapshot {
    /// Value of a register, if present
    pub fn get(&self, register: Register) -> Option<&str> {
        self.table.get(&register).map(String::as_str)
    }

    /// True before the first successful fetch
    pub fn is_empty(&self) -> bool {
        self.sequence == 0
    }
}

/// Atomically replaced register snapshot
#[derive(Debug, Default)]
pub struct ReadingStore {
    current: RwLock<Arc<Snapshot>>,
}

impl ReadingStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Swap in a new complete table and return the resulting snapshot
    pub fn replace(&self, table: RegisterTable) -> Arc<Snapshot> {
        let mut current = self
            .current
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let snapshot = Arc::new(Snapshot {
            table,
            sequence: current.sequence + 1,
            fetched_at: Some(Utc::now()),
        });
        *current = snapshot.clone();
        snapshot
    }

    /// Current snapshot
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.current
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Value of one register from the current snapshot
    pub fn get(&self, register: Register) -> Result<String> {
        self.snapshot()
            .get(register)
            .map(str::to_string)
            .ok_or_else(|| GruenbeckError::not_found(format!("No value for register {register}")))
    }
}
