//! # Debuggee Control
//!
//! The controller that owns the "all threads stopped" state of a target,
//! and the scratch-frame primitive every remote operation is built from.
//!
//! [`Debugger::attach`] is the acquisition site: when it returns `Ok`,
//! every thread the target had is ptrace-stopped. Dropping the controller
//! is the release site and runs on every exit path; a partially attached
//! set is detached before a construction error is surfaced.

use std::time::{Duration, Instant};

use nix::errno::Errno;
use nix::sys::ptrace;
use nix::sys::signal::Signal;
use nix::sys::wait::{waitpid, WaitStatus};
use tracing::{debug, error, trace};

use crate::addr::Addr;
use crate::errors::{PatchError, Result};
use crate::perms::Permission;
use crate::process::Process;
use crate::registers::{self, Registers};
use crate::thread::Thread;

/// Holds every thread of one target in a ptrace stop
pub struct Debugger {
    proc: Process,
    suspended_threads: Vec<Thread>,
}

impl Debugger {
    /// Attaches to every thread of `proc` and waits for each to stop.
    ///
    /// `timeout` bounds the *total* wall-clock time spent waiting for
    /// stops, not the per-thread time. On any failure the threads attached
    /// so far are detached again before the error is returned.
    pub fn attach(proc: Process, timeout: Option<Duration>) -> Result<Self> {
        let deadline = timeout.map(|limit| Instant::now() + limit);
        let mut attached: Vec<Thread> = Vec::new();

        match Self::attach_all(&proc, &mut attached, deadline) {
            Ok(()) => {
                debug!(
                    "attached to {} threads of pid {}",
                    attached.len(),
                    proc.pid()
                );
                Ok(Debugger {
                    proc,
                    suspended_threads: attached,
                })
            }
            Err(e) => {
                Self::detach_all(&attached);
                Err(e)
            }
        }
    }

    fn attach_all(
        proc: &Process,
        attached: &mut Vec<Thread>,
        deadline: Option<Instant>,
    ) -> Result<()> {
        for thread in proc.threads()? {
            Self::attach_one(thread, deadline)?;
            attached.push(thread);
        }

        // Threads spawned after enumeration are not stopped yet. One
        // re-enumeration pass catches stragglers before we give up.
        for thread in proc.threads()? {
            if !attached.iter().any(|seen| seen.tid() == thread.tid()) {
                debug!("thread {} appeared during attach", thread.tid());
                Self::attach_one(thread, deadline)?;
                attached.push(thread);
            }
        }

        let expected = proc.threads()?.len();
        if attached.len() < expected {
            return Err(PatchError::PartialAttach {
                pid: proc.pid().as_raw(),
                attached: attached.len(),
                expected,
            });
        }
        Ok(())
    }

    /// Attach one thread and wait until a stop is observed, re-injecting
    /// anything else the wait reports
    fn attach_one(thread: Thread, deadline: Option<Instant>) -> Result<()> {
        let tid = thread.tid();
        ptrace::attach(tid).map_err(|source| PatchError::AttachFailed {
            tid: tid.as_raw(),
            source,
        })?;

        loop {
            match waitpid(tid, None)? {
                WaitStatus::Stopped(_, sig) => {
                    trace!("tid {tid} stopped with {sig}");
                    return Ok(());
                }
                WaitStatus::PtraceEvent(..) | WaitStatus::PtraceSyscall(_) => {
                    trace!("tid {tid} stopped with a ptrace event");
                    return Ok(());
                }
                WaitStatus::Exited(..) | WaitStatus::Signaled(..) => {
                    return Err(PatchError::AttachFailed {
                        tid: tid.as_raw(),
                        source: Errno::ESRCH,
                    });
                }
                status => {
                    trace!("tid {tid} reported {status:?} before stopping, continuing it");
                    ptrace::cont(tid, None)?;
                }
            }
            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                return Err(PatchError::AttachTimeout(thread.pid().as_raw()));
            }
        }
    }

    fn detach_all(threads: &[Thread]) {
        for thread in threads {
            match ptrace::detach(thread.tid(), None) {
                // ESRCH: the thread is already gone
                Ok(()) | Err(Errno::ESRCH) => {}
                Err(e) => error!("could not detach from tid {}: {e}", thread.tid()),
            }
        }
    }

    pub fn process(&self) -> &Process {
        &self.proc
    }

    pub fn threads(&self) -> &[Thread] {
        &self.suspended_threads
    }

    /// The thread remote operations borrow; the first one recorded
    pub fn main_thread(&self) -> Result<&Thread> {
        self.suspended_threads.first().ok_or(PatchError::NoThread)
    }

    pub fn get_regs(&self, thread: &Thread) -> Result<Registers> {
        registers::get_registers(thread.tid())
    }

    pub fn set_regs(&self, thread: &Thread, regs: &Registers) -> Result<()> {
        registers::set_registers(thread.tid(), regs)
    }

    /// Saves the main thread's registers and the first word of an
    /// executable region, then stages `word` there.
    ///
    /// The returned frame restores both on [`ScratchFrame::restore`], or on
    /// drop if an error unwinds past it first.
    pub(crate) fn scratch_frame(&self, word: u64) -> Result<ScratchFrame<'_>> {
        let thread = *self.main_thread()?;
        let scratch = self
            .proc
            .regions()?
            .into_iter()
            .find(|region| region.has_permissions(Permission::EXECUTE))
            .ok_or(PatchError::NoExecRegion)?
            .start;

        let saved_word = ptrace::read(thread.tid(), scratch.raw_pointer())?;
        let saved_regs = registers::get_registers(thread.tid())?;
        ptrace::write(thread.tid(), scratch.raw_pointer(), word as i64)?;
        trace!("staged {word:#018x} at {scratch} in tid {}", thread.tid());

        Ok(ScratchFrame {
            thread,
            scratch,
            saved_word,
            saved_regs,
            restored: false,
            _dbg: std::marker::PhantomData,
        })
    }
}

impl Drop for Debugger {
    fn drop(&mut self) {
        Self::detach_all(&self.suspended_threads);
        debug!(
            "released {} threads of pid {}",
            self.suspended_threads.len(),
            self.proc.pid()
        );
    }
}

/// A borrowed thread: saved registers plus the saved word the staged
/// instructions overwrote.
///
/// Restoration runs in reverse staging order (code word first, registers
/// second) and is attempted on *every* exit path. Leaving either behind
/// corrupts the running target.
pub(crate) struct ScratchFrame<'dbg> {
    // ties the frame's lifetime to the controller holding the stop
    thread: Thread,
    scratch: Addr,
    saved_word: i64,
    saved_regs: Registers,
    restored: bool,
    _dbg: std::marker::PhantomData<&'dbg Debugger>,
}

impl ScratchFrame<'_> {
    pub fn scratch(&self) -> Addr {
        self.scratch
    }

    pub fn saved_regs(&self) -> Registers {
        self.saved_regs
    }

    /// Loads `regs`, continues the borrowed thread and waits for the staged
    /// int3. Any stop other than a SIGTRAP means the injected sequence went
    /// off the rails.
    pub fn run(&self, op: &'static str, regs: Registers) -> Result<Registers> {
        registers::set_registers(self.thread.tid(), &regs)?;
        ptrace::cont(self.thread.tid(), None)?;

        match waitpid(self.thread.tid(), None)? {
            WaitStatus::Stopped(_, Signal::SIGTRAP) => {}
            status => {
                return Err(PatchError::RemoteSyscallFailed {
                    op,
                    reason: format!("target reported {status:?} instead of a SIGTRAP"),
                })
            }
        }
        registers::get_registers(self.thread.tid())
    }

    /// Puts the saved word and registers back and dissolves the frame
    pub fn restore(mut self) -> Result<()> {
        self.restored = true;
        self.put_back()
    }

    fn put_back(&self) -> Result<()> {
        ptrace::write(
            self.thread.tid(),
            self.scratch.raw_pointer(),
            self.saved_word,
        )?;
        registers::set_registers(self.thread.tid(), &self.saved_regs)
    }
}

impl Drop for ScratchFrame<'_> {
    fn drop(&mut self) {
        if self.restored {
            return;
        }
        if let Err(e) = self.put_back() {
            error!(
                "could not restore scratch state of tid {}: {e}",
                self.thread.tid()
            );
        }
    }
}

#[cfg(test)]
pub(crate) mod test {
    use super::*;
    use nix::unistd::Pid;
    use std::fs;
    use std::process::{Child, Command};

    /// Sleeping child that gets cleaned up even when a test panics
    pub(crate) struct Sleeper {
        child: Child,
    }

    impl Sleeper {
        pub(crate) fn spawn() -> Self {
            let child = Command::new("sleep")
                .arg("60")
                .spawn()
                .expect("cannot spawn sleep");
            // give it a moment to reach nanosleep
            std::thread::sleep(Duration::from_millis(50));
            Sleeper { child }
        }

        pub(crate) fn pid(&self) -> Pid {
            Pid::from_raw(self.child.id() as i32)
        }

        pub(crate) fn process(&self) -> Process {
            Process::new(self.pid())
        }

        fn state(&self) -> char {
            let stat = fs::read_to_string(format!("/proc/{}/stat", self.pid())).unwrap();
            // field 3, after the parenthesized comm
            stat.rsplit(')')
                .next()
                .unwrap()
                .split_whitespace()
                .next()
                .unwrap()
                .chars()
                .next()
                .unwrap()
        }
    }

    impl Drop for Sleeper {
        fn drop(&mut self) {
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }

    #[test]
    fn test_attach_detach_balanced() {
        let sleeper = Sleeper::spawn();
        {
            let dbg = Debugger::attach(sleeper.process(), Some(Duration::from_secs(2))).unwrap();
            assert_eq!(dbg.threads().len(), 1);
            assert_eq!(dbg.main_thread().unwrap().tid(), sleeper.pid());
        }
        // after release the child must be running normally, not left in a
        // trace stop
        std::thread::sleep(Duration::from_millis(50));
        let state = sleeper.state();
        assert!(state != 't' && state != 'T', "child left stopped: {state}");
    }

    #[test]
    fn test_register_snapshot_round_trip() {
        let sleeper = Sleeper::spawn();
        let dbg = Debugger::attach(sleeper.process(), Some(Duration::from_secs(2))).unwrap();
        let thread = *dbg.main_thread().unwrap();

        let first = dbg.get_regs(&thread).unwrap();
        assert_ne!(first.ip(), 0);
        assert_ne!(first.sp(), 0);

        dbg.set_regs(&thread, &first).unwrap();
        let second = dbg.get_regs(&thread).unwrap();
        assert_eq!(first.regs, second.regs);
    }

    #[test]
    fn test_attach_missing_process_fails() {
        // max pid on 64-bit, nothing can live there in practice
        let ghost = Process::from_raw(4_194_303);
        assert!(Debugger::attach(ghost, Some(Duration::from_millis(100))).is_err());
    }
}
