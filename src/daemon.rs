//! Daemon lifecycle and the mediation event loop
//!
//! One thread, one loop: poll over the shutdown signalfd and the fanotify
//! descriptor, drain every buffered event in arrival order, answer every
//! blocking event before touching the next one. Serializing the pipeline
//! this way removes all locking around the store at the cost of one
//! caller's open() waiting behind another's mediation round trip.

use std::os::fd::AsFd;
use std::path::Path;
use std::rc::Rc;
use std::time::Duration;

use anyhow::Context;
use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use nix::sys::signal::{SigSet, Signal};
use nix::sys::signalfd::{SfdFlags, SignalFd};
use tracing::{debug, error, info, warn};

use crate::channel::{ChannelEvent, FanotifyChannel};
use crate::checksum;
use crate::config::Config;
use crate::mediator::{OpenOutcome, PermissionMediator};
use crate::quarantine::QuarantineManager;
use crate::registry::FileRegistry;
use crate::store::{Store, Tier};
use crate::tracker::{now_millis, ActionTracker};
use crate::trust::TrustEvaluator;

/// Start the containment agent
pub fn start(config: Config, foreground: bool) -> anyhow::Result<()> {
    if is_running(&config) {
        anyhow::bail!("rampart is already running");
    }

    // Fork first: the store connection and fanotify descriptor must belong
    // to the process that will poll them
    if foreground {
        write_pid_file(&config.daemon.pid_file)?;
    } else {
        daemonize(&config)?;
    }

    // Storage is load-bearing for every verdict: unreachable at startup is fatal
    let store = Rc::new(Store::open(&config.database).context("trust database unavailable")?);
    let agent_identity = enroll_self(&store).context("self-enrollment failed")?;

    let channel = FanotifyChannel::new().context("fanotify unavailable (CAP_SYS_ADMIN?)")?;
    let mut gated = 0;
    for mount in &config.mounts {
        match channel.mark(mount) {
            Ok(()) => gated += 1,
            Err(e) => warn!("cannot gate {:?}: {}", mount, e),
        }
    }
    if gated == 0 {
        anyhow::bail!("no mount could be gated");
    }

    let tracker = ActionTracker::new(store.clone());
    let trust = TrustEvaluator::new(
        store.clone(),
        tracker.clone(),
        config.detection.window_ms,
        config.detection.burst_threshold,
    );
    let quarantine = QuarantineManager::new(
        store.clone(),
        FileRegistry::new(store.clone()),
        tracker.clone(),
    );
    let mediator = PermissionMediator::new(
        store.clone(),
        FileRegistry::new(store.clone()),
        tracker,
        trust,
        quarantine,
        config.clone(),
        agent_identity,
        std::process::id() as i32,
    );

    // Block the shutdown signals so they arrive through the signalfd only
    let mut mask = SigSet::empty();
    mask.add(Signal::SIGTERM);
    mask.add(Signal::SIGINT);
    mask.thread_block().context("cannot block signals")?;
    let mut signals =
        SignalFd::with_flags(&mask, SfdFlags::SFD_CLOEXEC).context("signalfd unavailable")?;

    info!("rampart mediating {} mount(s)", gated);
    let result = run_loop(&channel, &mediator, &mut signals);

    for mount in &config.mounts {
        let _ = channel.unmark(mount);
    }
    let _ = std::fs::remove_file(&config.daemon.pid_file);
    result
}

/// Register the agent's own binary: identity, content checksum, Whitelist.
/// Nothing else ever whitelists implicitly.
fn enroll_self(store: &Store) -> anyhow::Result<i64> {
    let exe = std::fs::read_link("/proc/self/exe")?;
    let identity = store.identity_for_path(&exe)?;
    let sum = checksum::of_file(&exe)?;
    store.hash_save(identity, sum)?;
    store.list_add(Tier::White, identity)?;
    info!("agent binary {:?} enrolled as identity {}", exe, identity);
    Ok(identity)
}

fn run_loop(
    channel: &FanotifyChannel,
    mediator: &PermissionMediator,
    signals: &mut SignalFd,
) -> anyhow::Result<()> {
    loop {
        let (shutdown, events_ready) = {
            let mut fds = [
                PollFd::new(signals.as_fd(), PollFlags::POLLIN),
                PollFd::new(channel.as_fd(), PollFlags::POLLIN),
            ];
            match poll(&mut fds, PollTimeout::NONE) {
                Ok(_) => {}
                Err(Errno::EINTR) => continue,
                Err(e) => return Err(e).context("poll failed"),
            }
            (
                fds[0].revents().is_some_and(|r| r.contains(PollFlags::POLLIN)),
                fds[1].revents().is_some_and(|r| r.contains(PollFlags::POLLIN)),
            )
        };

        if events_ready {
            drain(channel, mediator)?;
        }

        if shutdown {
            let _ = signals.read_signal();
            info!("shutdown requested");
            // Leave no blocked caller behind: answer everything still buffered
            drain(channel, mediator)?;
            return Ok(());
        }
    }
}

/// Handle every buffered event in arrival order
fn drain(channel: &FanotifyChannel, mediator: &PermissionMediator) -> anyhow::Result<()> {
    loop {
        let events = channel.read_events()?;
        if events.is_empty() {
            return Ok(());
        }
        for event in events {
            handle_event(channel, mediator, &event);
        }
    }
}

fn handle_event(channel: &FanotifyChannel, mediator: &PermissionMediator, event: &ChannelEvent) {
    let now = now_millis();
    let path = event.target_path();

    if event.is_close_write() {
        match &path {
            Ok(p) => mediator.on_write_close(event.pid, p, now),
            Err(e) => debug!("write-close with unresolvable target: {}", e),
        }
    }

    if let Some(kind) = event.permission_kind() {
        let outcome = match &path {
            Ok(p) => mediator.on_permission(event.pid, p, kind, now),
            Err(e) => {
                debug!("{:?} with unresolvable target, denying: {}", kind, e);
                OpenOutcome::fail_closed()
            }
        };
        // The one reply this event gets; written before the next event is touched
        if let Err(e) = channel.reply(event, outcome.verdict.is_allow()) {
            error!("verdict reply failed, caller may hang: {}", e);
        }
        mediator.post_reply(outcome);
    }
}

/// Stop a running agent via its pid file
pub fn stop(config: &Config) -> anyhow::Result<()> {
    if !is_running(config) {
        println!("rampart is not running");
        return Ok(());
    }

    let pid = read_pid_file(&config.daemon.pid_file)?;
    nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid as i32), Signal::SIGTERM)?;
    println!("sent shutdown signal to rampart (pid {})", pid);

    for _ in 0..50 {
        std::thread::sleep(Duration::from_millis(100));
        if !is_running(config) {
            println!("rampart stopped");
            return Ok(());
        }
    }

    warn!("rampart did not stop gracefully, sending SIGKILL");
    nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid as i32), Signal::SIGKILL)?;
    Ok(())
}

/// Report whether an agent is running
pub fn status(config: &Config) -> anyhow::Result<()> {
    if is_running(config) {
        let pid = read_pid_file(&config.daemon.pid_file)?;
        println!("rampart is running (pid {})", pid);
    } else {
        println!("rampart is not running");
    }
    Ok(())
}

fn daemonize(config: &Config) -> anyhow::Result<()> {
    let stdout = std::fs::File::create(&config.daemon.log_file)?;
    let stderr = stdout.try_clone()?;

    daemonize::Daemonize::new()
        .pid_file(&config.daemon.pid_file)
        .working_directory("/")
        .stdout(stdout)
        .stderr(stderr)
        .start()?;

    Ok(())
}

fn write_pid_file(path: &Path) -> anyhow::Result<()> {
    std::fs::write(path, std::process::id().to_string())?;
    Ok(())
}

fn read_pid_file(path: &Path) -> anyhow::Result<u32> {
    let content = std::fs::read_to_string(path)?;
    Ok(content.trim().parse()?)
}

fn is_running(config: &Config) -> bool {
    if !config.daemon.pid_file.exists() {
        return false;
    }
    match read_pid_file(&config.daemon.pid_file) {
        Ok(pid) => Path::new(&format!("/proc/{}", pid)).exists(),
        Err(_) => false,
    }
}
