use crate::{Error, Result};
use nix::{
    errno::Errno,
    sys::{
        signal::{self, SigSet, Signal},
        wait::{WaitPidFlag, WaitStatus, waitpid},
    },
    unistd::{self, ForkResult, Pid},
};
use std::{
    ffi::{CString, OsString},
    os::unix::ffi::OsStrExt,
    time::Instant,
};

/// Child command running in its own process group
#[derive(Debug)]
pub struct ChildProcess {
    pid: Pid,
    kill_signal: Signal,
    started: Instant,
}

impl ChildProcess {
    /// Fork and exec `argv`.
    ///
    /// The child gets `mask` as its signal mask before exec, so signals the
    /// parent blocked for its own bookkeeping reach the child as usual.
    pub fn spawn(argv: &[OsString], kill_signal: Signal, mask: &SigSet) -> Result<Self> {
        if argv.is_empty() {
            return Err(Error::EmptyCommand);
        }

        // Everything the child needs is allocated before forking
        let args = argv
            .iter()
            .map(|arg| {
                CString::new(arg.as_bytes()).map_err(|_| Error::InvalidArgument(arg.clone()))
            })
            .collect::<Result<Vec<_>>>()?;

        match unsafe { unistd::fork() }? {
            ForkResult::Parent { child } => {
                // Also done by the child; whoever runs first wins
                if let Err(e) = unistd::setpgid(child, child) {
                    if e != Errno::EACCES {
                        log::warn!("failed to move child {child} into its own process group: {e}");
                    }
                }

                log::info!("started child {child}: {argv:?}");

                Ok(Self {
                    pid: child,
                    kill_signal,
                    started: Instant::now(),
                })
            }
            ForkResult::Child => {
                if let Err(e) = unistd::setpgid(Pid::from_raw(0), Pid::from_raw(0)) {
                    log::warn!("child failed to create its process group: {e}");
                }

                if let Err(e) = mask.thread_set_mask() {
                    log::warn!("child failed to restore its signal mask: {e}");
                }

                let Err(e) = unistd::execvp(&args[0], &args);
                log::error!("failed to execute {:?}: {e}", argv[0]);

                // Skip the parent's atexit handlers and buffered output
                unsafe { libc::_exit(127) }
            }
        }
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    pub fn kill_signal(&self) -> Signal {
        self.kill_signal
    }

    /// Wait until the child has exited
    pub fn reap(&self) -> Result<WaitStatus> {
        loop {
            match waitpid(self.pid, None) {
                Ok(status @ (WaitStatus::Exited(..) | WaitStatus::Signaled(..))) => {
                    self.log_exit(&status);
                    return Ok(status);
                }
                Ok(_) | Err(Errno::EINTR) => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Collect the child's exit status if it has exited, without blocking
    pub fn try_reap(&self) -> Result<Option<WaitStatus>> {
        match waitpid(self.pid, Some(WaitPidFlag::WNOHANG))? {
            status @ (WaitStatus::Exited(..) | WaitStatus::Signaled(..)) => {
                self.log_exit(&status);
                Ok(Some(status))
            }
            _ => Ok(None),
        }
    }

    /// Send the kill signal to the child's process group, or to the child
    /// alone if the group is gone
    pub fn terminate(&self) {
        let Err(e) = signal::killpg(self.pid, self.kill_signal) else {
            log::debug!("sent {} to process group {}", self.kill_signal, self.pid);
            return;
        };

        log::warn!("failed to signal process group {}: {e}", self.pid);

        if let Err(e) = signal::kill(self.pid, self.kill_signal) {
            log::warn!("failed to signal child {}: {e}", self.pid);
        }
    }

    fn log_exit(&self, status: &WaitStatus) {
        let elapsed = self.started.elapsed();

        match status {
            WaitStatus::Exited(pid, code) => {
                log::info!("child {pid} exited with status {code} after {elapsed:.1?}")
            }
            WaitStatus::Signaled(pid, signal, _) => {
                log::info!("child {pid} was killed by {signal} after {elapsed:.1?}")
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(args: &[&str]) -> Vec<OsString> {
        args.iter().map(OsString::from).collect()
    }

    #[test]
    fn test_empty_command() {
        assert!(matches!(
            ChildProcess::spawn(&[], Signal::SIGTERM, &SigSet::empty()),
            Err(Error::EmptyCommand)
        ));
    }

    #[test]
    fn test_nul_byte_in_argument() {
        let argv = vec![OsString::from("echo"), OsString::from("a\0b")];
        assert!(matches!(
            ChildProcess::spawn(&argv, Signal::SIGTERM, &SigSet::empty()),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_spawn_and_reap() {
        let child = ChildProcess::spawn(&argv(&["true"]), Signal::SIGTERM, &SigSet::empty())
            .unwrap();

        assert_eq!(child.reap().unwrap(), WaitStatus::Exited(child.pid(), 0));
    }

    #[test]
    fn test_exec_failure_exits_child() {
        let child = ChildProcess::spawn(
            &argv(&["/nonexistent/wayfreeze-test-command"]),
            Signal::SIGTERM,
            &SigSet::empty(),
        )
        .unwrap();

        assert_eq!(child.reap().unwrap(), WaitStatus::Exited(child.pid(), 127));
    }

    #[test]
    fn test_child_has_own_process_group() {
        let child = ChildProcess::spawn(&argv(&["sleep", "30"]), Signal::SIGKILL, &SigSet::empty())
            .unwrap();

        assert_eq!(unistd::getpgid(Some(child.pid())).unwrap(), child.pid());

        child.terminate();
        assert!(matches!(
            child.reap().unwrap(),
            WaitStatus::Signaled(_, Signal::SIGKILL, _)
        ));
    }

    #[test]
    fn test_terminate_with_configured_signal() {
        let child = ChildProcess::spawn(&argv(&["sleep", "30"]), Signal::SIGTERM, &SigSet::empty())
            .unwrap();
        assert_eq!(child.try_reap().unwrap(), None);

        child.terminate();
        assert_eq!(
            child.reap().unwrap(),
            WaitStatus::Signaled(child.pid(), Signal::SIGTERM, false)
        );
    }
}
