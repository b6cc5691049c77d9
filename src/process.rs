//! # Process Inspector
//!
//! Read-only views of a running process: its threads, memory map, backing
//! executable and function symbols.
//!
//! A [`Process`] is a cursor over `/proc/<pid>`, not a lock; building one
//! does not touch the target, and several handles to the same pid may
//! coexist. Everything returned here is a snapshot that can go stale the
//! moment the target is scheduled again; callers that need stability stop
//! the target first with [`crate::debugger::Debugger::attach`].

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;

use nix::unistd::Pid;
use tracing::trace;

use crate::addr::Addr;
use crate::consts::PAGE_SIZE;
use crate::errors::{PatchError, Result};
use crate::memorymap::MemoryRegion;
use crate::symbols::{self, Function};
use crate::thread::Thread;

/// Inspector handle for one pid
#[derive(Debug)]
pub struct Process {
    pid: Pid,
    /// resolved mangled-name -> address, filled lazily by [`Process::resolve`]
    symbol_cache: Mutex<HashMap<String, Addr>>,
}

impl Process {
    pub fn new(pid: Pid) -> Self {
        Process {
            pid,
            symbol_cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_raw(pid: i32) -> Self {
        Self::new(Pid::from_raw(pid))
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// Short process name from `/proc/<pid>/comm`
    pub fn name(&self) -> Result<String> {
        let raw = fs::read_to_string(format!("/proc/{}/comm", self.pid))?;
        Ok(raw.trim_end_matches('\n').to_string())
    }

    /// The memory map as currently mapped; not stable across calls
    pub fn regions(&self) -> Result<Vec<MemoryRegion>> {
        let maps = fs::read_to_string(format!("/proc/{}/maps", self.pid))?;
        maps.lines().map(MemoryRegion::parse).collect()
    }

    /// All threads of the target, discovered via `/proc/<pid>/task`
    pub fn threads(&self) -> Result<Vec<Thread>> {
        let task_dir = format!("/proc/{}/task", self.pid);
        let mut threads = Vec::new();
        for entry in fs::read_dir(&task_dir)? {
            let entry = entry?;
            if let Some(tid) = entry
                .file_name()
                .to_str()
                .and_then(|name| name.parse::<i32>().ok())
            {
                threads.push(Thread::new(self.pid, Pid::from_raw(tid)));
            }
        }
        Ok(threads)
    }

    /// Lowest mapped address; used as the load base for symbol arithmetic
    pub fn base_address(&self) -> Result<Addr> {
        let regions = self.regions()?;
        regions
            .first()
            .map(|region| region.start)
            .ok_or_else(|| PatchError::RegionNotFound {
                pid: self.pid.as_raw(),
                addr: Addr::NULL,
            })
    }

    /// Path of the executable backing this process
    pub fn exe_path(&self) -> Result<PathBuf> {
        Ok(fs::read_link(format!("/proc/{}/exe", self.pid))?)
    }

    /// Resident memory in bytes, from `/proc/<pid>/statm`
    pub fn mem_usage(&self) -> Result<usize> {
        let statm = fs::read_to_string(format!("/proc/{}/statm", self.pid))?;
        let resident_pages: usize = statm
            .split_whitespace()
            .nth(1)
            .ok_or_else(|| PatchError::InvalidArgument(format!("malformed statm: {statm:?}")))?
            .parse()?;
        Ok(resident_pages * PAGE_SIZE)
    }

    /// The region containing `addr`
    pub fn region_containing(&self, addr: Addr) -> Result<MemoryRegion> {
        self.regions()?
            .into_iter()
            .find(|region| region.contains(addr))
            .ok_or(PatchError::RegionNotFound {
                pid: self.pid.as_raw(),
                addr,
            })
    }

    /// Every named `FUNC` symbol of the target's own executable, with
    /// runtime addresses
    pub fn functions(&self) -> Result<Vec<Function>> {
        let exe = self.exe_path()?;
        let base = self.base_address()?;
        symbols::functions_in(&exe, base)
    }

    /// First function whose mangled name *contains* `query`.
    ///
    /// The substring match is deliberate: it lets callers name C++
    /// functions without spelling out the mangling. Results are cached per
    /// handle. Use [`Process::resolve_exact`] when a common substring would
    /// hit the wrong symbol.
    pub fn resolve(&self, query: &str) -> Result<Option<Function>> {
        if let Some(&address) = self.symbol_cache.lock().unwrap().get(query) {
            trace!("symbol cache hit for {query:?}");
            return Ok(Some(Function {
                name: query.to_string(),
                address,
            }));
        }

        for function in self.functions()? {
            if function.name.contains(query) {
                let mut cache = self.symbol_cache.lock().unwrap();
                cache.insert(query.to_string(), function.address);
                cache.insert(function.name.clone(), function.address);
                return Ok(Some(function));
            }
        }
        Ok(None)
    }

    /// Like [`Process::resolve`] but the whole mangled name must match
    pub fn resolve_exact(&self, name: &str) -> Result<Option<Function>> {
        Ok(self
            .functions()?
            .into_iter()
            .find(|function| function.name == name))
    }
}

/// All pids currently present in `/proc`, ascending
pub fn all_pids() -> Result<Vec<i32>> {
    let mut pids = Vec::new();
    for entry in fs::read_dir("/proc")? {
        let entry = entry?;
        if let Some(pid) = entry
            .file_name()
            .to_str()
            .and_then(|name| name.parse::<i32>().ok())
        {
            pids.push(pid);
        }
    }
    pids.sort_unstable();
    Ok(pids)
}

/// Every process whose short name equals `name`
pub fn find_process(name: &str) -> Result<Vec<Process>> {
    let mut found = Vec::new();
    for pid in all_pids()? {
        let proc = Process::from_raw(pid);
        // processes may vanish mid-scan
        if proc.name().is_ok_and(|n| n == name) {
            found.push(proc);
        }
    }
    if found.is_empty() {
        return Err(PatchError::ProcessNotFound(name.to_string()));
    }
    Ok(found)
}

#[cfg(test)]
mod test {
    use super::*;

    fn me() -> Process {
        Process::new(Pid::this())
    }

    #[test]
    fn test_all_pids_contains_self() {
        let pids = all_pids().unwrap();
        assert!(pids.contains(&Pid::this().as_raw()));
        assert!(pids.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_find_process_by_own_name() {
        let name = me().name().unwrap();
        let found = find_process(&name).unwrap();
        assert!(found.iter().any(|p| p.pid() == Pid::this()));
    }

    #[test]
    fn test_find_process_not_found() {
        let err = find_process("no-such-process-name").unwrap_err();
        assert!(matches!(err, PatchError::ProcessNotFound(_)));
    }

    #[test]
    fn test_own_regions_and_base() {
        let proc = me();
        let regions = proc.regions().unwrap();
        assert!(!regions.is_empty());
        let base = proc.base_address().unwrap();
        assert!(regions.iter().all(|r| base <= r.start));
    }

    #[test]
    fn test_own_threads_contains_main() {
        let proc = me();
        let threads = proc.threads().unwrap();
        assert!(threads.iter().any(|t| t.tid() == Pid::this()));
    }

    #[test]
    fn test_exe_path_and_mem_usage() {
        let proc = me();
        assert!(proc.exe_path().unwrap().exists());
        assert!(proc.mem_usage().unwrap() > 0);
    }

    #[test]
    fn test_region_containing_code() {
        let proc = me();
        let here = Addr::from(test_region_containing_code as usize);
        let region = proc.region_containing(here).unwrap();
        assert!(region.contains(here));
    }

    #[test]
    fn test_resolve_is_substring_of_functions() {
        let proc = me();
        let functions = proc.functions().unwrap();
        // pick an existing name and resolve a unique substring of it
        let sample = &functions[functions.len() / 2];
        let resolved = proc.resolve(&sample.name).unwrap().unwrap();
        let first_match = functions
            .iter()
            .find(|f| f.name.contains(&sample.name))
            .unwrap();
        assert_eq!(resolved.address, first_match.address);
        // a second lookup is served from the cache
        let cached = proc.resolve(&sample.name).unwrap().unwrap();
        assert_eq!(cached.address, resolved.address);
    }

    #[test]
    fn test_resolve_missing_returns_none() {
        let proc = me();
        assert!(proc
            .resolve("definitely_not_a_symbol_in_this_binary_xyz")
            .unwrap()
            .is_none());
    }
}
