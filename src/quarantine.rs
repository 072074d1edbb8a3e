//! Quarantine and restore
//!
//! Once an actor is distrusted, containment runs in a fixed order:
//! blacklist first so further attempts are denied even if restoration is
//! slow, terminate before restoring so the actor cannot keep modifying
//! files during rollback, then undo the damage from snapshots. Each step
//! is independently fallible; only the whitelist guard and the blacklist
//! write can abort the sweep.

use std::rc::Rc;
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::process::ProcessActor;
use crate::registry::{FileRegistry, RestoreOutcome};
use crate::store::{Store, Tier};
use crate::tracker::ActionTracker;

/// What a remediation sweep accomplished
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RemediationReport {
    /// Files rewritten from snapshots
    pub restored: usize,
    /// Touched files that never had a snapshot (coverage gaps)
    pub no_snapshot: usize,
    /// Restore attempts that failed on i/o or storage
    pub failed: usize,
}

/// Blacklist-terminate-restore workflow
pub struct QuarantineManager {
    store: Rc<Store>,
    registry: FileRegistry,
    tracker: ActionTracker,
}

impl QuarantineManager {
    pub fn new(store: Rc<Store>, registry: FileRegistry, tracker: ActionTracker) -> Self {
        Self {
            store,
            registry,
            tracker,
        }
    }

    /// Contain a distrusted actor and roll back everything it touched.
    ///
    /// Quarantining a Whitelisted identity is a rejected operation, not a
    /// silent no-op: reaching this point with a trusted binary means the
    /// configuration and the verdict disagree, and the operator must see it.
    pub fn remediate(&self, actor: &ProcessActor) -> Result<RemediationReport> {
        if self.store.list_contains(Tier::White, actor.identity)? {
            return Err(Error::Rejected(format!(
                "refusing to quarantine whitelisted identity {} ({:?})",
                actor.identity, actor.exe
            )));
        }

        self.store.list_add(Tier::Black, actor.identity)?;
        // Keep the ban recognizable by content, not just by path
        if let Err(e) = self.store.hash_save(actor.identity, actor.checksum) {
            warn!("could not persist checksum for banned identity: {}", e);
        }
        info!(
            "blacklisted identity {} ({:?}, checksum {})",
            actor.identity, actor.exe, actor.checksum
        );

        actor.terminate();

        // Full history, not just the window: damage predating the burst
        // that triggered distrust is rolled back too.
        let targets = self.tracker.all_targets(actor.identity)?;
        self.tracker.clear_actor(actor.identity)?;

        let mut report = RemediationReport::default();
        for target in targets {
            match self.registry.restore(target) {
                Ok(RestoreOutcome::Restored) => report.restored += 1,
                Ok(RestoreOutcome::NoSnapshot) => {
                    warn!("no snapshot for touched identity {}, cannot roll back", target);
                    report.no_snapshot += 1;
                }
                Ok(RestoreOutcome::NoPath) => {
                    warn!("identity {} has no path mapping, cannot roll back", target);
                    report.no_snapshot += 1;
                }
                Err(e) => {
                    warn!("restore of identity {} failed: {}", target, e);
                    report.failed += 1;
                }
            }
        }

        info!(
            "remediation for identity {}: {} restored, {} without snapshot, {} failed",
            actor.identity, report.restored, report.no_snapshot, report.failed
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum;
    use crate::store::FileId;
    use std::path::{Path, PathBuf};

    struct Fixture {
        store: Rc<Store>,
        tracker: ActionTracker,
        quarantine: QuarantineManager,
        registry: FileRegistry,
    }

    impl Fixture {
        fn new() -> Self {
            let store = Rc::new(Store::open_in_memory().unwrap());
            let tracker = ActionTracker::new(store.clone());
            let registry = FileRegistry::new(store.clone());
            let quarantine = QuarantineManager::new(
                store.clone(),
                FileRegistry::new(store.clone()),
                tracker.clone(),
            );
            Self {
                store,
                tracker,
                quarantine,
                registry,
            }
        }

        fn id(&self, path: &Path) -> FileId {
            self.store.identity_for_path(path).unwrap()
        }

        fn actor(&self, exe: &str, image: &[u8]) -> ProcessActor {
            let identity = self.id(Path::new(exe));
            ProcessActor {
                pid: 7777,
                exe: PathBuf::from(exe),
                checksum: checksum::of_bytes(image),
                identity,
            }
        }
    }

    #[test]
    fn test_whitelisted_actor_is_rejected() {
        let fx = Fixture::new();
        let actor = fx.actor("/usr/bin/backup", b"backup image");
        fx.store.list_add(Tier::White, actor.identity).unwrap();

        let err = fx.quarantine.remediate(&actor).unwrap_err();
        assert!(matches!(err, Error::Rejected(_)));
        assert!(!fx.store.list_contains(Tier::Black, actor.identity).unwrap());
    }

    #[test]
    fn test_remediate_restores_snapshotted_damage() {
        let fx = Fixture::new();
        let dir = tempfile::tempdir().unwrap();
        let f1 = dir.path().join("f1.txt");
        std::fs::write(&f1, b"the original report").unwrap();

        let actor = fx.actor("/tmp/cryptor", b"cryptor image");
        let f1_id = fx.id(&f1);
        let dir_id = fx.id(dir.path());

        // Trusted phase: snapshot captured on first open, write recorded
        fx.registry.snapshot_if_untaken(f1_id, &f1).unwrap();
        std::fs::write(&f1, b"ENCRYPTED!!").unwrap();
        fx.tracker.record(actor.identity, f1_id, dir_id, 100).unwrap();

        let report = fx.quarantine.remediate(&actor).unwrap();

        assert_eq!(report.restored, 1);
        assert_eq!(std::fs::read(&f1).unwrap(), b"the original report");
        assert!(fx.store.list_contains(Tier::Black, actor.identity).unwrap());
        assert!(fx.tracker.all_targets(actor.identity).unwrap().is_empty());
        // The ban is keyed by content identity from now on
        assert_eq!(
            fx.store.identity_for_hash(actor.checksum).unwrap(),
            Some(actor.identity)
        );
    }

    #[test]
    fn test_unsnapshotted_target_is_never_rewritten() {
        let fx = Fixture::new();
        let dir = tempfile::tempdir().unwrap();
        let f1 = dir.path().join("f1.txt");
        std::fs::write(&f1, b"no snapshot was ever taken").unwrap();

        let actor = fx.actor("/tmp/cryptor", b"cryptor image");
        let f1_id = fx.id(&f1);
        let dir_id = fx.id(dir.path());
        fx.tracker.record(actor.identity, f1_id, dir_id, 100).unwrap();

        let report = fx.quarantine.remediate(&actor).unwrap();

        assert_eq!(report.restored, 0);
        assert_eq!(report.no_snapshot, 1);
        assert_eq!(std::fs::read(&f1).unwrap(), b"no snapshot was ever taken");
    }

    #[test]
    fn test_remediate_covers_full_history_not_just_window() {
        let fx = Fixture::new();
        let dir = tempfile::tempdir().unwrap();
        let old = dir.path().join("old.txt");
        let new = dir.path().join("new.txt");
        std::fs::write(&old, b"old original").unwrap();
        std::fs::write(&new, b"new original").unwrap();

        let actor = fx.actor("/tmp/cryptor", b"cryptor image");
        let old_id = fx.id(&old);
        let new_id = fx.id(&new);
        let dir_id = fx.id(dir.path());

        fx.registry.snapshot_if_untaken(old_id, &old).unwrap();
        fx.registry.snapshot_if_untaken(new_id, &new).unwrap();
        std::fs::write(&old, b"damaged long ago").unwrap();
        std::fs::write(&new, b"damaged just now").unwrap();
        fx.tracker.record(actor.identity, old_id, dir_id, 100).unwrap();
        fx.tracker.record(actor.identity, new_id, dir_id, 1_000_000).unwrap();

        let report = fx.quarantine.remediate(&actor).unwrap();

        assert_eq!(report.restored, 2);
        assert_eq!(std::fs::read(&old).unwrap(), b"old original");
        assert_eq!(std::fs::read(&new).unwrap(), b"new original");
    }

    #[test]
    fn test_remediate_is_repeatable() {
        let fx = Fixture::new();
        let actor = fx.actor("/tmp/cryptor", b"cryptor image");

        fx.quarantine.remediate(&actor).unwrap();
        let report = fx.quarantine.remediate(&actor).unwrap();

        assert_eq!(report, RemediationReport::default());
        assert!(fx.store.list_contains(Tier::Black, actor.identity).unwrap());
    }
}
