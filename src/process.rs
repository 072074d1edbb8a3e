//! Actor resolution
//!
//! An actor is the binary behind a pid, identified by the checksum of its
//! on-disk executable image. Resolution happens fresh on every event: the
//! image may have changed since the last time this pid was seen, and a pid
//! may have been reused by an unrelated process. Resolution fails cleanly
//! when the process has already exited.

use std::path::PathBuf;
use tracing::warn;

use crate::checksum::{self, Checksum};
use crate::error::{Error, Result};
use crate::store::{FileId, Store};

/// A process requesting file access, resolved to its binary identity.
/// Ephemeral: never persisted, rebuilt per event.
#[derive(Debug, Clone)]
pub struct ProcessActor {
    pub pid: i32,
    pub exe: PathBuf,
    /// Fresh CRC of the on-disk executable image
    pub checksum: Checksum,
    /// Identity the action log is keyed by: the content identity when the
    /// checksum is registered, otherwise a path-keyed identity so that the
    /// actor's writes stay attributable and restorable.
    pub identity: FileId,
}

impl ProcessActor {
    /// Resolve a pid into its binary identity via /proc
    pub fn resolve(pid: i32, store: &Store) -> Result<Self> {
        let exe_link = format!("/proc/{}/exe", pid);
        let exe = std::fs::read_link(&exe_link)
            .map_err(|e| Error::resolution(format!("pid {}", pid), e))?;

        let data = std::fs::read(&exe)
            .map_err(|e| Error::resolution(format!("binary {:?} of pid {}", exe, pid), e))?;
        let checksum = checksum::of_bytes(&data);

        let identity = match store.identity_for_hash(checksum)? {
            Some(id) => id,
            None => store.identity_for_path(&exe)?,
        };

        Ok(Self {
            pid,
            exe,
            checksum,
            identity,
        })
    }

    /// Best-effort termination of the originating OS process.
    ///
    /// Stubbed: killing is out of scope, so this only records the intent.
    /// The blacklist entry written before this call is what actually stops
    /// the actor.
    pub fn terminate(&self) {
        warn!(
            "would terminate pid {} ({:?}); relying on blacklist to stop it",
            self.pid, self.exe
        );
    }
}
