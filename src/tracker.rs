//! Sliding-window action tracking for mass-modification detection
//!
//! Normal interactive use touches a couple of files per second at most.
//! Ransomware rewrites whole directories in one sweep. The tracker keeps a
//! time-ordered log of (actor, target, directory, timestamp) write events
//! and answers per-directory distinct-target counts over a trailing window.
//!
//! Actions are keyed by resolved binary identity, not OS pid: the log
//! survives process restarts and re-execs, a recycled pid cannot inherit an
//! unrelated actor's history, and a flagged binary can later be un-banned
//! by identity.

use std::collections::HashMap;
use std::rc::Rc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::debug;

use crate::error::Result;
use crate::store::{FileId, Millis, Store};

/// Current observation time in epoch milliseconds.
///
/// Timestamps are always derived locally, never taken from an event.
pub fn now_millis() -> Millis {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as Millis)
        .unwrap_or(0)
}

/// Persistent, identity-keyed write-event log
#[derive(Clone)]
pub struct ActionTracker {
    store: Rc<Store>,
}

impl ActionTracker {
    pub fn new(store: Rc<Store>) -> Self {
        Self { store }
    }

    /// Append one write event
    pub fn record(
        &self,
        actor: FileId,
        target: FileId,
        target_dir: FileId,
        now: Millis,
    ) -> Result<()> {
        self.store.record_action(actor, target, target_dir, now)
    }

    /// Distinct targets per directory this actor wrote since `cutoff`
    pub fn count_by_directory(
        &self,
        actor: FileId,
        cutoff: Millis,
    ) -> Result<HashMap<FileId, usize>> {
        self.store.actions_by_directory_since(actor, cutoff)
    }

    /// Every distinct target this actor has ever been recorded writing
    pub fn all_targets(&self, actor: FileId) -> Result<Vec<FileId>> {
        self.store.actions_since(actor, 0)
    }

    /// Drop all entries older than `cutoff` and reclaim identities that
    /// lost their last reference. Returns the targets of deleted entries.
    /// Idempotent: a second call with the same cutoff changes nothing.
    pub fn prune(&self, cutoff: Millis) -> Result<Vec<FileId>> {
        let affected = self.store.delete_actions_older_than(cutoff)?;
        if !affected.is_empty() {
            let reaped = self.store.reap(cutoff)?;
            debug!(
                "pruned entries for {} targets, reaped {} identities",
                affected.len(),
                reaped
            );
        }
        Ok(affected)
    }

    /// Discard all history for an actor (post-quarantine)
    pub fn clear_actor(&self, actor: FileId) -> Result<()> {
        self.store.delete_actions_for(actor)
    }
}
