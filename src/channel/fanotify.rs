//! fanotify backend for the interception channel
//!
//! Requires CAP_SYS_ADMIN. The descriptor is opened non-blocking so the
//! event loop can drain every buffered event after each poll wake-up.

use std::os::fd::{AsFd, AsRawFd, BorrowedFd};
use std::path::Path;

use nix::errno::Errno;
use nix::libc;
use nix::sys::fanotify::{EventFFlags, Fanotify, InitFlags, MarkFlags, MaskFlags};
use tracing::{info, trace};

use super::ChannelEvent;
use crate::error::{Error, Result};

fn gate_mask() -> MaskFlags {
    MaskFlags::FAN_OPEN_PERM | MaskFlags::FAN_OPEN_EXEC_PERM | MaskFlags::FAN_CLOSE_WRITE
}

fn errno_to_io(errno: Errno) -> std::io::Error {
    std::io::Error::from_raw_os_error(errno as i32)
}

/// Permission-class fanotify subscription over one or more mounts
pub struct FanotifyChannel {
    fanotify: Fanotify,
}

impl FanotifyChannel {
    pub fn new() -> Result<Self> {
        let fanotify = Fanotify::init(
            InitFlags::FAN_CLASS_CONTENT | InitFlags::FAN_CLOEXEC | InitFlags::FAN_NONBLOCK,
            EventFFlags::O_RDONLY | EventFFlags::O_LARGEFILE,
        )
        .map_err(|e| Error::io("/proc/self/fd/fanotify", errno_to_io(e)))?;

        Ok(Self { fanotify })
    }

    /// Subscribe to the gated event set over a mount point
    pub fn mark(&self, mount: &Path) -> Result<()> {
        self.fanotify
            .mark(
                MarkFlags::FAN_MARK_ADD | MarkFlags::FAN_MARK_MOUNT,
                gate_mask(),
                None,
                Some(mount),
            )
            .map_err(|e| Error::io(mount, errno_to_io(e)))?;
        info!("gating mount {:?}", mount);
        Ok(())
    }

    pub fn unmark(&self, mount: &Path) -> Result<()> {
        self.fanotify
            .mark(
                MarkFlags::FAN_MARK_REMOVE | MarkFlags::FAN_MARK_MOUNT,
                gate_mask(),
                None,
                Some(mount),
            )
            .map_err(|e| Error::io(mount, errno_to_io(e)))?;
        Ok(())
    }

    /// Read the currently buffered events. Returns an empty batch once the
    /// queue is drained. A metadata version mismatch is a protocol
    /// violation: continuing would misinterpret event memory.
    pub fn read_events(&self) -> Result<Vec<ChannelEvent>> {
        let raw = match self.fanotify.read_events() {
            Ok(events) => events,
            Err(Errno::EAGAIN) => return Ok(Vec::new()),
            Err(e) => return Err(Error::io("/proc/self/fd/fanotify", errno_to_io(e))),
        };

        let mut events = Vec::with_capacity(raw.len());
        for event in raw {
            if !event.check_version() {
                return Err(Error::Protocol(
                    "fanotify metadata version mismatch".to_string(),
                ));
            }
            let Some(fd) = event.fd() else {
                // Overflow notifications carry no descriptor
                trace!("skipping event without descriptor");
                continue;
            };
            let fd = fd.as_raw_fd();
            let pid = event.pid();
            let mask = event.mask();
            events.push(ChannelEvent::new(pid, fd, mask, event));
        }
        Ok(events)
    }

    /// Answer a blocking permission event. Exactly one reply must be
    /// written per event or the caller's syscall stays suspended forever.
    pub fn reply(&self, event: &ChannelEvent, allow: bool) -> Result<()> {
        let response = libc::fanotify_response {
            fd: event.fd,
            response: if allow { libc::FAN_ALLOW } else { libc::FAN_DENY },
        };
        let res = unsafe {
            libc::write(
                self.fanotify.as_fd().as_raw_fd(),
                &response as *const _ as *const libc::c_void,
                std::mem::size_of::<libc::fanotify_response>(),
            )
        };
        if res < 0 {
            return Err(Error::io(
                "/proc/self/fd/fanotify",
                std::io::Error::last_os_error(),
            ));
        }
        Ok(())
    }
}

impl AsFd for FanotifyChannel {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fanotify.as_fd()
    }
}
