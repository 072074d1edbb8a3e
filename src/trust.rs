//! Trust evaluation
//!
//! One ordered rule chain decides whether an actor currently has write
//! trust. First match wins: unknown binaries are denied outright
//! (fail-closed), list membership overrides behavior in both directions,
//! and only unlisted-but-known actors are judged by their recent write
//! pattern.

use std::rc::Rc;
use tracing::trace;

use crate::error::Result;
use crate::process::ProcessActor;
use crate::store::{FileId, Millis, Store, Tier};
use crate::tracker::ActionTracker;

/// Binary access decision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Allow,
    Deny(DenyReason),
}

impl Verdict {
    pub fn is_allow(self) -> bool {
        matches!(self, Verdict::Allow)
    }
}

/// Why an actor was denied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    /// Checksum absent from the hash registry
    UnknownBinary,
    /// Identity is blacklisted
    Blacklisted,
    /// Mass-modification burst inside one directory
    Burst { directory: FileId, count: usize },
    /// Attempt to touch the agent's own trust database
    ProtectedDatabase,
}

impl std::fmt::Display for DenyReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DenyReason::UnknownBinary => write!(f, "unrecognized binary"),
            DenyReason::Blacklisted => write!(f, "blacklisted binary"),
            DenyReason::Burst { directory, count } => {
                write!(f, "burst of {} distinct files in directory #{}", count, directory)
            }
            DenyReason::ProtectedDatabase => write!(f, "trust database access"),
        }
    }
}

/// Ordered-rule trust decision procedure
pub struct TrustEvaluator {
    store: Rc<Store>,
    tracker: ActionTracker,
    /// Sliding window in milliseconds; zero means list-only mode
    window_ms: Millis,
    /// Distinct-file count per directory at which a burst is declared
    burst_threshold: usize,
}

impl TrustEvaluator {
    pub fn new(
        store: Rc<Store>,
        tracker: ActionTracker,
        window_ms: Millis,
        burst_threshold: usize,
    ) -> Self {
        Self {
            store,
            tracker,
            window_ms,
            burst_threshold,
        }
    }

    /// Decide whether the actor currently has write trust.
    ///
    /// The actor carries a checksum taken from its on-disk image when the
    /// event was resolved; nothing here is cached across events. Rule 5
    /// prunes the action log as a side effect of the read, which keeps the
    /// pruning cadence tied to evaluation frequency and bounds log growth.
    pub fn evaluate(&self, actor: &ProcessActor, now: Millis) -> Result<Verdict> {
        let Some(identity) = self.store.identity_for_hash(actor.checksum)? else {
            trace!("checksum {} not registered", actor.checksum);
            return Ok(Verdict::Deny(DenyReason::UnknownBinary));
        };

        if self.store.list_contains(Tier::White, identity)? {
            return Ok(Verdict::Allow);
        }
        if self.store.list_contains(Tier::Black, identity)? {
            return Ok(Verdict::Deny(DenyReason::Blacklisted));
        }

        if self.window_ms == 0 {
            return Ok(Verdict::Allow);
        }

        let cutoff = now - self.window_ms;
        self.tracker.prune(cutoff)?;
        let counts = self.tracker.count_by_directory(identity, cutoff)?;
        if let Some((&directory, &count)) = counts
            .iter()
            .filter(|(_, &count)| count >= self.burst_threshold)
            .max_by_key(|(_, &count)| count)
        {
            return Ok(Verdict::Deny(DenyReason::Burst { directory, count }));
        }

        Ok(Verdict::Allow)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum;
    use std::path::{Path, PathBuf};

    struct Fixture {
        store: Rc<Store>,
        tracker: ActionTracker,
    }

    impl Fixture {
        fn new() -> Self {
            let store = Rc::new(Store::open_in_memory().unwrap());
            let tracker = ActionTracker::new(store.clone());
            Self { store, tracker }
        }

        fn evaluator(&self, window_ms: Millis, burst_threshold: usize) -> TrustEvaluator {
            TrustEvaluator::new(
                self.store.clone(),
                self.tracker.clone(),
                window_ms,
                burst_threshold,
            )
        }

        fn id(&self, path: &str) -> FileId {
            self.store.identity_for_path(Path::new(path)).unwrap()
        }

        /// A registered actor whose checksum resolves to its identity
        fn actor(&self, exe: &str, image: &[u8]) -> ProcessActor {
            let identity = self.id(exe);
            let sum = checksum::of_bytes(image);
            self.store.hash_save(identity, sum).unwrap();
            ProcessActor {
                pid: 4242,
                exe: PathBuf::from(exe),
                checksum: sum,
                identity,
            }
        }
    }

    #[test]
    fn test_unknown_binary_is_denied() {
        let fx = Fixture::new();
        let actor = ProcessActor {
            pid: 1,
            exe: PathBuf::from("/bin/stranger"),
            checksum: checksum::of_bytes(b"never seen"),
            identity: fx.id("/bin/stranger"),
        };

        let verdict = fx.evaluator(1000, 3).evaluate(&actor, 500).unwrap();
        assert_eq!(verdict, Verdict::Deny(DenyReason::UnknownBinary));
    }

    #[test]
    fn test_whitelist_overrides_burst() {
        let fx = Fixture::new();
        let actor = fx.actor("/usr/bin/backup", b"backup image");
        fx.store.list_add(Tier::White, actor.identity).unwrap();

        let docs = fx.id("/docs");
        for (i, t) in [100, 200, 300, 400].into_iter().enumerate() {
            let target = fx.id(&format!("/docs/f{}", i));
            fx.tracker.record(actor.identity, target, docs, t).unwrap();
        }

        let verdict = fx.evaluator(1000, 3).evaluate(&actor, 500).unwrap();
        assert_eq!(verdict, Verdict::Allow);
    }

    #[test]
    fn test_blacklist_denies_with_zero_actions() {
        let fx = Fixture::new();
        let actor = fx.actor("/tmp/cryptor", b"cryptor image");
        fx.store.list_add(Tier::Black, actor.identity).unwrap();

        let verdict = fx.evaluator(1000, 3).evaluate(&actor, 500).unwrap();
        assert_eq!(verdict, Verdict::Deny(DenyReason::Blacklisted));
    }

    #[test]
    fn test_burst_at_threshold_is_denied() {
        let fx = Fixture::new();
        let actor = fx.actor("/tmp/sweeper", b"sweeper image");
        let data = fx.id("/data");

        // Three distinct files in /data within 500ms, window 1000ms
        fx.tracker.record(actor.identity, fx.id("/data/f1"), data, 100).unwrap();
        fx.tracker.record(actor.identity, fx.id("/data/f2"), data, 300).unwrap();
        fx.tracker.record(actor.identity, fx.id("/data/f3"), data, 500).unwrap();

        let verdict = fx.evaluator(1000, 3).evaluate(&actor, 600).unwrap();
        assert_eq!(
            verdict,
            Verdict::Deny(DenyReason::Burst {
                directory: data,
                count: 3
            })
        );
    }

    #[test]
    fn test_below_threshold_is_allowed() {
        let fx = Fixture::new();
        let actor = fx.actor("/tmp/sweeper", b"sweeper image");
        let data = fx.id("/data");

        fx.tracker.record(actor.identity, fx.id("/data/f1"), data, 100).unwrap();
        fx.tracker.record(actor.identity, fx.id("/data/f2"), data, 300).unwrap();
        fx.tracker.record(actor.identity, fx.id("/data/f3"), data, 500).unwrap();

        // Same burst, threshold 4: still trusted
        let verdict = fx.evaluator(1000, 4).evaluate(&actor, 600).unwrap();
        assert_eq!(verdict, Verdict::Allow);
    }

    #[test]
    fn test_burst_must_hit_one_directory() {
        let fx = Fixture::new();
        let actor = fx.actor("/tmp/scatter", b"scatter image");

        for (i, dir) in ["/a", "/b", "/c"].into_iter().enumerate() {
            let dir_id = fx.id(dir);
            let target = fx.id(&format!("{}/f", dir));
            fx.tracker
                .record(actor.identity, target, dir_id, 100 * (i as i64 + 1))
                .unwrap();
        }

        let verdict = fx.evaluator(1000, 3).evaluate(&actor, 400).unwrap();
        assert_eq!(verdict, Verdict::Allow);
    }

    #[test]
    fn test_writes_outside_window_do_not_count() {
        let fx = Fixture::new();
        let actor = fx.actor("/tmp/slow", b"slow image");
        let data = fx.id("/data");

        fx.tracker.record(actor.identity, fx.id("/data/f1"), data, 100).unwrap();
        fx.tracker.record(actor.identity, fx.id("/data/f2"), data, 200).unwrap();
        fx.tracker.record(actor.identity, fx.id("/data/f3"), data, 5000).unwrap();

        let verdict = fx.evaluator(1000, 3).evaluate(&actor, 5500).unwrap();
        assert_eq!(verdict, Verdict::Allow);
    }

    #[test]
    fn test_evaluation_prunes_aged_entries() {
        let fx = Fixture::new();
        let actor = fx.actor("/tmp/worker", b"worker image");
        let data = fx.id("/data");
        let stale = fx.id("/data/stale");

        fx.tracker.record(actor.identity, stale, data, 100).unwrap();
        fx.evaluator(1000, 3).evaluate(&actor, 5000).unwrap();

        // Rule 5 pruned the entry and reaped its orphaned target identity
        assert!(fx.tracker.all_targets(actor.identity).unwrap().is_empty());
        assert!(fx.store.path_for_identity(stale).unwrap().is_none());
    }

    #[test]
    fn test_zero_window_is_list_only() {
        let fx = Fixture::new();
        let actor = fx.actor("/tmp/bulk", b"bulk image");
        let data = fx.id("/data");

        for i in 0..10 {
            let target = fx.id(&format!("/data/f{}", i));
            fx.tracker.record(actor.identity, target, data, 100 + i).unwrap();
        }

        let verdict = fx.evaluator(0, 3).evaluate(&actor, 200).unwrap();
        assert_eq!(verdict, Verdict::Allow);
    }
}
