//! Thread handles discovered through `/proc/<pid>/task`.

use std::fs;

use nix::unistd::Pid;

use crate::errors::{PatchError, Result};

/// A `(pid, tid)` pair naming one thread of a target
///
/// Just a cursor; holding one implies nothing about the thread's state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Thread {
    pid: Pid,
    tid: Pid,
}

impl Thread {
    pub fn new(pid: Pid, tid: Pid) -> Self {
        Thread { pid, tid }
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    pub fn tid(&self) -> Pid {
        self.tid
    }

    /// Thread name from `/proc/<pid>/task/<tid>/comm`
    pub fn name(&self) -> Result<String> {
        let comm_path = format!("/proc/{}/task/{}/comm", self.pid, self.tid);
        let raw = fs::read_to_string(&comm_path)?;
        let name = raw.trim_end_matches('\n').to_string();
        if name.is_empty() {
            return Err(PatchError::InvalidArgument(format!(
                "empty comm file: {comm_path}"
            )));
        }
        Ok(name)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_own_main_thread_has_a_name() {
        let me = Pid::this();
        let thread = Thread::new(me, me);
        assert_eq!(thread.pid(), me);
        assert!(!thread.name().expect("own comm must be readable").is_empty());
    }
}
