//! Permission mediation
//!
//! The single synchronous decision point behind the kernel channel. Two
//! shapes of traffic arrive here: completed writes (record, then re-judge
//! the writer retroactively) and pending opens (judge the opener before
//! the kernel lets the syscall proceed). Component failures stop at this
//! boundary: they are logged and reduced to a fail-closed verdict so the
//! event loop never dies and no blocking caller is left without a reply.

use std::path::Path;
use std::rc::Rc;
use tracing::{debug, error, info, trace, warn};

use crate::channel::PermissionKind;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::process::ProcessActor;
use crate::quarantine::QuarantineManager;
use crate::registry::FileRegistry;
use crate::store::{FileId, Millis, Store};
use crate::tracker::ActionTracker;
use crate::trust::{DenyReason, TrustEvaluator, Verdict};

/// Decision for one blocking permission event, plus the remediation that
/// must run after the verdict has been written back to the kernel.
pub struct OpenOutcome {
    pub verdict: Verdict,
    pending_remediation: Option<ProcessActor>,
}

impl OpenOutcome {
    /// Fail-closed fallback for events the mediator never got to judge
    /// (e.g. the target path could not be recovered from the descriptor)
    pub fn fail_closed() -> Self {
        Self {
            verdict: Verdict::Deny(DenyReason::UnknownBinary),
            pending_remediation: None,
        }
    }

    fn allow() -> Self {
        Self {
            verdict: Verdict::Allow,
            pending_remediation: None,
        }
    }

    fn deny(reason: DenyReason) -> Self {
        Self {
            verdict: Verdict::Deny(reason),
            pending_remediation: None,
        }
    }

    fn deny_and_quarantine(reason: DenyReason, actor: ProcessActor) -> Self {
        Self {
            verdict: Verdict::Deny(reason),
            pending_remediation: Some(actor),
        }
    }
}

/// Event-loop entry point for both event shapes
pub struct PermissionMediator {
    store: Rc<Store>,
    registry: FileRegistry,
    tracker: ActionTracker,
    trust: TrustEvaluator,
    quarantine: QuarantineManager,
    config: Config,
    /// Identity of the agent's own binary, enrolled at startup
    agent_identity: FileId,
    own_pid: i32,
}

impl PermissionMediator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Rc<Store>,
        registry: FileRegistry,
        tracker: ActionTracker,
        trust: TrustEvaluator,
        quarantine: QuarantineManager,
        config: Config,
        agent_identity: FileId,
        own_pid: i32,
    ) -> Self {
        Self {
            store,
            registry,
            tracker,
            trust,
            quarantine,
            config,
            agent_identity,
            own_pid,
        }
    }

    /// Handle a completed write. Retroactive: the damage, if any, is
    /// already on disk, so a distrust verdict goes straight to remediation.
    pub fn on_write_close(&self, pid: i32, path: &Path, now: Millis) {
        if pid == self.own_pid {
            return;
        }
        if self.config.is_excluded(path) {
            return;
        }
        if let Err(e) = self.record_and_judge(pid, path, now) {
            if e.is_resolution() {
                debug!("write-close on {:?} dropped: {}", path, e);
            } else {
                error!("write-close on {:?} not processed: {}", path, e);
            }
        }
    }

    fn record_and_judge(&self, pid: i32, path: &Path, now: Millis) -> Result<()> {
        let target = self.registry.identity_for_path(path)?;
        if self.registry.is_trust_db(target) {
            // The agent's own bookkeeping is not part of the threat picture
            return Ok(());
        }

        let actor = ProcessActor::resolve(pid, &self.store)?;
        let dir = self.registry.directory_identity(path)?;
        self.tracker.record(actor.identity, target, dir, now)?;

        if let Verdict::Deny(reason) = self.trust.evaluate(&actor, now)? {
            warn!(
                "distrusting pid {} ({:?}) after write to {:?}: {}",
                pid, actor.exe, path, reason
            );
            self.run_remediation(&actor);
        }
        Ok(())
    }

    /// Decide a blocking open. Infallible by design: whatever happens
    /// inside, the caller gets a verdict to write back, and an unprovable
    /// actor is denied rather than trusted.
    pub fn on_permission(
        &self,
        pid: i32,
        path: &Path,
        kind: PermissionKind,
        now: Millis,
    ) -> OpenOutcome {
        if pid == self.own_pid {
            // The agent's own snapshot reads and restore writes would
            // otherwise feed back into the pipeline executing them
            return OpenOutcome::allow();
        }
        if self.config.is_excluded(path) {
            return OpenOutcome::allow();
        }

        match self.judge_open(pid, path, now) {
            Ok(outcome) => outcome,
            Err(e) => {
                if e.is_resolution() {
                    debug!("open of {:?} by pid {} denied, unresolvable: {}", path, pid, e);
                } else {
                    error!("open of {:?} by pid {} denied on failure: {}", path, pid, e);
                }
                OpenOutcome::deny(DenyReason::UnknownBinary)
            }
        }
        .log(pid, path, kind)
    }

    fn judge_open(&self, pid: i32, path: &Path, now: Millis) -> Result<OpenOutcome> {
        let target = self.registry.identity_for_path(path)?;
        let actor = ProcessActor::resolve(pid, &self.store)?;

        if self.registry.is_trust_db(target) {
            // Nobody but the agent itself touches the trust database
            return Ok(if actor.identity == self.agent_identity {
                OpenOutcome::allow()
            } else {
                OpenOutcome::deny(DenyReason::ProtectedDatabase)
            });
        }

        match self.trust.evaluate(&actor, now)? {
            Verdict::Allow => {
                // First trusted touch: capture content before it can change
                if let Err(e) = self.registry.snapshot_if_untaken(target, path) {
                    warn!("snapshot of {:?} failed: {}", path, e);
                }
                Ok(OpenOutcome::allow())
            }
            Verdict::Deny(reason) => Ok(OpenOutcome::deny_and_quarantine(reason, actor)),
        }
    }

    /// Run after the verdict reply has been written: the kernel caller is
    /// already unblocked, so a slow restore cannot stall the syscall.
    pub fn post_reply(&self, outcome: OpenOutcome) {
        if let Some(actor) = outcome.pending_remediation {
            self.run_remediation(&actor);
        }
    }

    fn run_remediation(&self, actor: &ProcessActor) {
        match self.quarantine.remediate(actor) {
            Ok(report) => info!(
                "quarantined identity {}: {} restored, {} uncovered",
                actor.identity, report.restored, report.no_snapshot
            ),
            Err(Error::Rejected(msg)) => warn!("remediation rejected: {}", msg),
            Err(e) => error!("remediation of identity {} failed: {}", actor.identity, e),
        }
    }
}

impl OpenOutcome {
    fn log(self, pid: i32, path: &Path, kind: PermissionKind) -> Self {
        match self.verdict {
            Verdict::Allow => trace!("{:?} of {:?} by pid {}: allow", kind, path, pid),
            Verdict::Deny(reason) => {
                info!("{:?} of {:?} by pid {}: deny ({})", kind, path, pid, reason)
            }
        }
        self
    }
}
