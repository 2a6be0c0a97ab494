//! Single-threaded multiplexer over the display connection and a signalfd.
//!
//! SIGINT, SIGTERM, SIGCHLD and SIGALRM are blocked for as long as the loop
//! exists and are read from the signalfd instead. A pending signal is always
//! handled before any display traffic that arrived at the same time.

use crate::{Result, process::ChildProcess};
use nix::{
    errno::Errno,
    poll::{PollFd, PollFlags, PollTimeout, poll},
    sys::{
        signal::{SigSet, SigmaskHow, Signal},
        signalfd::{SfdFlags, SignalFd},
    },
    unistd::alarm,
};
use std::{
    ffi::OsString,
    fmt,
    num::NonZeroU32,
    os::fd::AsFd,
};

/// The display connection as seen by the event loop
pub trait DisplaySession: AsFd {
    /// Flush requests and dispatch whatever is already queued, right before
    /// the loop goes to sleep
    fn prepare(&mut self) -> Result<()>;

    /// The connection became readable
    fn dispatch(&mut self) -> Result<()>;

    /// Destroy everything shown on screen and close the connection
    fn teardown(self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    UserInterrupt,
    ChildExited,
    Timeout,
    FatalError,
}

impl ShutdownReason {
    pub fn exit_code(self) -> u8 {
        match self {
            Self::FatalError => 1,
            Self::UserInterrupt | Self::ChildExited | Self::Timeout => 0,
        }
    }
}

impl fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            Self::UserInterrupt => "interrupted",
            Self::ChildExited => "child exited",
            Self::Timeout => "timeout expired",
            Self::FatalError => "fatal error",
        };
        f.write_str(reason)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoopState {
    Running,
    ShuttingDown(ShutdownReason),
}

#[derive(Debug)]
pub struct EventLoop {
    signal_fd: SignalFd,

    /// Mask in effect before the loop blocked its signals
    old_mask: SigSet,

    child: Option<ChildProcess>,
    timeout_armed: bool,
}

impl EventLoop {
    pub fn new() -> Result<Self> {
        let mut mask = SigSet::empty();
        mask.add(Signal::SIGINT);
        mask.add(Signal::SIGTERM);
        mask.add(Signal::SIGCHLD);
        mask.add(Signal::SIGALRM);

        let old_mask = mask.thread_swap_mask(SigmaskHow::SIG_BLOCK)?;

        let signal_fd =
            match SignalFd::with_flags(&mask, SfdFlags::SFD_CLOEXEC | SfdFlags::SFD_NONBLOCK) {
                Ok(fd) => fd,
                Err(e) => {
                    if let Err(e) = old_mask.thread_set_mask() {
                        log::warn!("failed to restore signal mask: {e}");
                    }
                    return Err(e.into());
                }
            };

        Ok(Self {
            signal_fd,
            old_mask,
            child: None,
            timeout_armed: false,
        })
    }

    /// Start the supervised child. Its SIGCHLD can't get lost, the signals are
    /// already routed to the signalfd.
    pub fn spawn_child(&mut self, argv: &[OsString], kill_signal: Signal) -> Result<()> {
        self.child = Some(ChildProcess::spawn(argv, kill_signal, &self.old_mask)?);
        Ok(())
    }

    /// Arm the one-shot shutdown alarm
    pub fn arm_timeout(&mut self, seconds: NonZeroU32) {
        alarm::set(seconds.get());
        self.timeout_armed = true;
        log::debug!("shutting down in {seconds}s");
    }

    pub fn child(&self) -> Option<&ChildProcess> {
        self.child.as_ref()
    }

    /// Run until a signal, the timeout, the child's exit or an error ends the
    /// freeze, then tear everything down exactly once.
    pub fn run<S: DisplaySession>(mut self, mut session: S) -> ShutdownReason {
        let reason = loop {
            match self.wait(&mut session) {
                Ok(LoopState::Running) => {}
                Ok(LoopState::ShuttingDown(reason)) => break reason,
                Err(e) => {
                    log::error!("{e}");
                    break ShutdownReason::FatalError;
                }
            }
        };

        log::info!("shutting down: {reason}");

        if let Some(child) = self.child.take() {
            child.terminate();
        }
        session.teardown();

        reason
    }

    fn wait<S: DisplaySession>(&mut self, session: &mut S) -> Result<LoopState> {
        session.prepare()?;

        let mut fds = [
            PollFd::new(self.signal_fd.as_fd(), PollFlags::POLLIN),
            PollFd::new(session.as_fd(), PollFlags::POLLIN),
        ];

        match poll(&mut fds, PollTimeout::NONE) {
            Ok(_) => {}
            Err(Errno::EINTR) => return Ok(LoopState::Running),
            Err(e) => return Err(e.into()),
        }

        let is_ready = |fd: &PollFd| {
            fd.revents().is_some_and(|events| {
                events.intersects(PollFlags::POLLIN | PollFlags::POLLERR | PollFlags::POLLHUP)
            })
        };
        let (signal_ready, session_ready) = (is_ready(&fds[0]), is_ready(&fds[1]));

        if signal_ready {
            if let Some(reason) = self.handle_signals()? {
                return Ok(LoopState::ShuttingDown(reason));
            }
        }

        if session_ready {
            session.dispatch()?;
        }

        Ok(LoopState::Running)
    }

    fn handle_signals(&mut self) -> Result<Option<ShutdownReason>> {
        while let Some(info) = self.signal_fd.read_signal()? {
            let Ok(signal) = Signal::try_from(info.ssi_signo as i32) else {
                continue;
            };

            match signal {
                Signal::SIGINT | Signal::SIGTERM => {
                    log::info!("received {signal}");
                    return Ok(Some(ShutdownReason::UserInterrupt));
                }
                Signal::SIGALRM if self.timeout_armed => {
                    return Ok(Some(ShutdownReason::Timeout));
                }
                Signal::SIGCHLD => {
                    let Some(child) = &self.child else {
                        log::debug!("ignoring SIGCHLD, no child was started");
                        continue;
                    };

                    if child.try_reap()?.is_some() {
                        self.child = None;
                        return Ok(Some(ShutdownReason::ChildExited));
                    }
                }
                other => log::debug!("ignoring {other}"),
            }
        }

        Ok(None)
    }
}

impl Drop for EventLoop {
    fn drop(&mut self) {
        alarm::cancel();

        // Signals still queued would hit their default action once unblocked
        while let Ok(Some(info)) = self.signal_fd.read_signal() {
            log::debug!("discarding signal {}", info.ssi_signo);
        }

        if let Err(e) = self.old_mask.thread_set_mask() {
            log::warn!("failed to restore signal mask: {e}");
        }
    }
}
