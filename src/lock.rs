// Copyright (c) 2025 HypercubeDB Contributors
// Licensed under the GPL-3.0 License. See LICENSE file for details.

//! Per-table mutual exclusion.
//!
//! The [`LockManager`] holds one binary flag per qualified table name. Locks
//! are non-blocking: [`LockManager::try_acquire`] either takes the flag or
//! reports that another operation holds it. Nothing waits or queues inside
//! the manager; callers that want to retry use [`retry_on_busy`].

use std::collections::HashSet;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::debug;

use crate::error::{HyperError, Result};

/// Table lock flags keyed by qualified table name.
#[derive(Debug, Default)]
pub struct LockManager {
    held: Mutex<HashSet<String>>,
}

impl LockManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the flag for `table` if it is clear. Never blocks.
    pub fn try_acquire(&self, table: &str) -> bool {
        let acquired = self.held.lock().insert(table.to_string());
        if acquired {
            debug!(table, "lock acquired");
        } else {
            debug!(table, "lock busy");
        }
        acquired
    }

    /// Clears the flag for `table`.
    pub fn release(&self, table: &str) {
        if self.held.lock().remove(table) {
            debug!(table, "lock released");
        }
    }

    pub fn is_locked(&self, table: &str) -> bool {
        self.held.lock().contains(table)
    }

    /// Currently held table names, sorted.
    pub fn locked_tables(&self) -> Vec<String> {
        let mut tables: Vec<String> = self.held.lock().iter().cloned().collect();
        tables.sort();
        tables
    }

    /// Acquires `table` and returns a guard that releases it on drop.
    ///
    /// Fails with [`HyperError::Busy`] when the flag is already set.
    pub fn guard(&self, table: &str) -> Result<TableGuard<'_>> {
        if self.try_acquire(table) {
            Ok(TableGuard {
                manager: self,
                table: table.to_string(),
            })
        } else {
            Err(HyperError::Busy(table.to_string()))
        }
    }
}

/// Holds a table lock for its lifetime.
#[must_use = "the table lock is released as soon as the guard is dropped"]
#[derive(Debug)]
pub struct TableGuard<'a> {
    manager: &'a LockManager,
    table: String,
}

impl TableGuard<'_> {
    pub fn table(&self) -> &str {
        &self.table
    }
}

impl Drop for TableGuard<'_> {
    fn drop(&mut self) {
        self.manager.release(&self.table);
    }
}

/// Runs `op` until it returns something other than [`HyperError::Busy`],
/// sleeping `backoff` between attempts.
///
/// At most `attempts` calls are made (at least one). The last `Busy` error
/// is returned when every attempt was rejected.
///
/// ```rust
/// use std::time::Duration;
/// use hypercubedb::{retry_on_busy, HyperError};
///
/// let mut calls = 0;
/// let out = retry_on_busy(5, Duration::from_millis(1), || {
///     calls += 1;
///     if calls < 3 {
///         Err(HyperError::Busy("shop.items".into()))
///     } else {
///         Ok(calls)
///     }
/// });
/// assert_eq!(out.unwrap(), 3);
/// ```
pub fn retry_on_busy<T, F>(attempts: usize, backoff: Duration, mut op: F) -> Result<T>
where
    F: FnMut() -> Result<T>,
{
    let attempts = attempts.max(1);
    let mut tries = 0;
    loop {
        tries += 1;
        match op() {
            Err(e) if e.is_busy() && tries < attempts => {
                debug!(attempt = tries, "table busy, retrying");
                thread::sleep(backoff);
            }
            other => return other,
        }
    }
}
