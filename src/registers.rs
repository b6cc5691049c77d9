//! Register snapshots of stopped threads.
//!
//! The snapshot carries the full general-purpose file and, when the kernel
//! hands it out, the floating-point bank. Snapshots are plain `Copy` data
//! and round-trip bit-exact through `set_registers`/`get_registers`.

use std::fmt::{self, Display};
use std::mem::MaybeUninit;
use std::ptr;

use nix::errno::Errno;
use nix::libc::{self, c_void, user_fpregs_struct, user_regs_struct};
use nix::sys::ptrace::{self, Request, RequestType};
use nix::unistd::Pid;

use crate::errors::Result;

/// Everything needed to freeze and later replay a thread's CPU state
#[derive(Debug, Clone, Copy)]
pub struct Registers {
    pub regs: user_regs_struct,
    pub fp_regs: Option<user_fpregs_struct>,
}

impl Registers {
    pub fn ip(&self) -> u64 {
        self.regs.rip
    }

    pub fn sp(&self) -> u64 {
        self.regs.rsp
    }

    /// The register the kernel and the SysV ABI put results in
    pub fn ret(&self) -> u64 {
        self.regs.rax
    }
}

/// Snapshot a stopped thread
pub fn get_registers(tid: Pid) -> Result<Registers> {
    let regs = ptrace::getregs(tid)?;
    // the FP bank is optional; some kernels/configs refuse the request
    let fp_regs = getfpregs(tid).ok();
    Ok(Registers { regs, fp_regs })
}

/// Replace a stopped thread's state bit-exact
pub fn set_registers(tid: Pid, snapshot: &Registers) -> Result<()> {
    ptrace::setregs(tid, snapshot.regs)?;
    if let Some(fp_regs) = snapshot.fp_regs {
        setfpregs(tid, &fp_regs)?;
    }
    Ok(())
}

/// `ptrace(PTRACE_GETFPREGS, ...)`; nix has no wrapper for the FP bank, so
/// this fills the struct through the data argument the way the kernel
/// expects
fn getfpregs(tid: Pid) -> nix::Result<user_fpregs_struct> {
    let mut data: MaybeUninit<user_fpregs_struct> = MaybeUninit::uninit();
    let res = unsafe {
        libc::ptrace(
            Request::PTRACE_GETFPREGS as RequestType,
            libc::pid_t::from(tid),
            ptr::null_mut::<c_void>(),
            data.as_mut_ptr(),
        )
    };
    Errno::result(res)?;
    Ok(unsafe { data.assume_init() })
}

/// `ptrace(PTRACE_SETFPREGS, ...)`
fn setfpregs(tid: Pid, fp_regs: &user_fpregs_struct) -> nix::Result<()> {
    let res = unsafe {
        libc::ptrace(
            Request::PTRACE_SETFPREGS as RequestType,
            libc::pid_t::from(tid),
            ptr::null_mut::<c_void>(),
            fp_regs as *const user_fpregs_struct,
        )
    };
    Errno::result(res).map(drop)
}

impl Display for Registers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let r = &self.regs;
        writeln!(f, "r15: {:#x}", r.r15)?;
        writeln!(f, "r14: {:#x}", r.r14)?;
        writeln!(f, "r13: {:#x}", r.r13)?;
        writeln!(f, "r12: {:#x}", r.r12)?;
        writeln!(f, "rbp: {:#x}", r.rbp)?;
        writeln!(f, "rbx: {:#x}", r.rbx)?;
        writeln!(f, "r11: {:#x}", r.r11)?;
        writeln!(f, "r10: {:#x}", r.r10)?;
        writeln!(f, "r9:  {:#x}", r.r9)?;
        writeln!(f, "r8:  {:#x}", r.r8)?;
        writeln!(f, "rax: {:#x}", r.rax)?;
        writeln!(f, "rcx: {:#x}", r.rcx)?;
        writeln!(f, "rdx: {:#x}", r.rdx)?;
        writeln!(f, "rsi: {:#x}", r.rsi)?;
        writeln!(f, "rdi: {:#x}", r.rdi)?;
        writeln!(f, "orig_rax: {:#x}", r.orig_rax)?;
        writeln!(f, "rip: {:#x}", r.rip)?;
        writeln!(f, "cs:  {:#x}", r.cs)?;
        writeln!(f, "eflags: {:#x}", r.eflags)?;
        writeln!(f, "rsp: {:#x}", r.rsp)?;
        writeln!(f, "ss:  {:#x}", r.ss)?;
        writeln!(f, "fs_base: {:#x}", r.fs_base)?;
        writeln!(f, "gs_base: {:#x}", r.gs_base)?;
        writeln!(f, "ds:  {:#x}", r.ds)?;
        writeln!(f, "es:  {:#x}", r.es)?;
        writeln!(f, "fs:  {:#x}", r.fs)?;
        write!(f, "gs:  {:#x}", r.gs)
    }
}
