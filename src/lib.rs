//! # procpatch
//!
//! Out-of-process dynamic instrumentation for Linux/x86-64 userspace
//! targets. Given a pid, procpatch attaches to every thread, inspects the
//! address space and exported functions, and can borrow a stopped thread to
//! run work on the target's behalf: mapping memory, changing page
//! protections, `dlopen`ing a shared object, or redirecting a function's
//! entry to code compiled on the fly from C++ source.
//!
//! The load-bearing piece is the [`debugger::Debugger`]: constructing one
//! stops the whole target, dropping it releases the target on every exit
//! path. Remote operations ([`Debugger::allocate_memory`],
//! [`Debugger::change_region_permissions`], [`Debugger::load_library`],
//! [`Debugger::hook`]) all follow the same save/stage/run/restore pattern
//! over a small scratch area in one of the target's executable regions.
//!
//! ```no_run
//! use std::time::Duration;
//! use procpatch::debugger::Debugger;
//! use procpatch::process::Process;
//!
//! # fn main() -> procpatch::errors::Result<()> {
//! let target = Process::from_raw(4242);
//! let dbg = Debugger::attach(target, Some(Duration::from_millis(500)))?;
//! let region = dbg.allocate_memory(8192)?;
//! println!("target now owns {} extra bytes at {}", region.size(), region.start);
//! # Ok(())
//! # }
//! ```
//!
//! Only Linux on x86-64 is supported; the staged instruction sequences and
//! the register loading are hardwired to that ABI.
//!
//! [`Debugger::allocate_memory`]: debugger::Debugger::allocate_memory
//! [`Debugger::change_region_permissions`]: debugger::Debugger::change_region_permissions
//! [`Debugger::load_library`]: debugger::Debugger::load_library
//! [`Debugger::hook`]: debugger::Debugger::hook

pub mod addr;
pub mod compile;
pub mod consts;
pub mod debugger;
pub mod disassemble;
pub mod errors;
pub mod memio;
pub mod memorymap;
pub mod perms;
pub mod process;
pub mod registers;
pub mod remote;
pub mod symbols;
pub mod thread;

pub use crate::addr::Addr;
pub use crate::errors::{PatchError, Result};

/// One ptrace transfer unit
pub type Word = i64;
