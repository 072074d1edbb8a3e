//! Kernel interception channel
//!
//! Wraps the fanotify permission-notification class: the agent subscribes
//! to write-close and open/open-exec events over the configured mounts and
//! must answer every open with a binary ALLOW/DENY verdict tied to the
//! event's descriptor. Blocking events leave the caller's syscall
//! suspended until the reply is written.

mod fanotify;

pub use fanotify::FanotifyChannel;

use std::path::PathBuf;

use nix::sys::fanotify::{FanotifyEvent, MaskFlags};

use crate::error::{Error, Result};

/// Kind of blocking permission request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionKind {
    /// File open for reading or writing
    Open,
    /// File open for execution
    OpenExec,
}

/// One kernel event, holding its file descriptor until dropped.
///
/// A single event can carry both a completed write-close and a pending
/// permission request; the mediator handles the write part first, then
/// answers the permission part. The descriptor closes on drop.
pub struct ChannelEvent {
    pub pid: i32,
    pub(crate) fd: i32,
    mask: MaskFlags,
    // Owns the event fd; dropping it closes the descriptor
    _inner: FanotifyEvent,
}

impl ChannelEvent {
    pub(crate) fn new(pid: i32, fd: i32, mask: MaskFlags, inner: FanotifyEvent) -> Self {
        Self {
            pid,
            fd,
            mask,
            _inner: inner,
        }
    }

    /// Whether the event reports a completed write
    pub fn is_close_write(&self) -> bool {
        self.mask.contains(MaskFlags::FAN_CLOSE_WRITE)
    }

    /// The pending permission request, if any. At most one reply is owed
    /// per event regardless of how many permission bits are set.
    pub fn permission_kind(&self) -> Option<PermissionKind> {
        if self.mask.contains(MaskFlags::FAN_OPEN_EXEC_PERM) {
            Some(PermissionKind::OpenExec)
        } else if self.mask.contains(MaskFlags::FAN_OPEN_PERM) {
            Some(PermissionKind::Open)
        } else {
            None
        }
    }

    /// Resolve the target path through the event descriptor
    pub fn target_path(&self) -> Result<PathBuf> {
        let link = format!("/proc/self/fd/{}", self.fd);
        std::fs::read_link(&link).map_err(|e| Error::resolution(format!("event fd {}", self.fd), e))
    }
}
