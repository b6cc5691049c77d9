//! # Error Types
//!
//! Defines the error type and result alias used throughout the [crate].
//!
//! All fallible operations, from `/proc` scanning to remote syscall
//! execution, funnel into [`PatchError`] so that callers can match on the
//! failure kind (retry an attach timeout, recompile on a missing symbol)
//! instead of string-matching messages.

use thiserror::Error;

use crate::addr::Addr;

/// Type alias for Results returned by procpatch functions
pub type Result<T> = std::result::Result<T, PatchError>;

/// All the ways inspecting or patching a target process can fail
#[derive(Error, Debug)]
pub enum PatchError {
    #[error("Os error: {0}")]
    Os(#[from] nix::Error),
    #[error("Io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Could not parse integer: {0}")]
    ParseInt(#[from] std::num::ParseIntError),
    #[error("Error while reading an ELF file: {0}")]
    Object(#[from] object::Error),
    #[error("Malformed maps entry: {0:?}")]
    MapsParse(String),
    #[error("Transferred only {got} of {want} bytes at {addr}")]
    ShortTransfer { addr: Addr, got: usize, want: usize },
    #[error("No process found with the name: {0}")]
    ProcessNotFound(String),
    #[error("No function matching {0:?} in the target executable")]
    FunctionNotFound(String),
    #[error("No region of pid {pid} contains address {addr}")]
    RegionNotFound { pid: i32, addr: Addr },
    #[error("Failed to attach to tid {tid}: {source}")]
    AttachFailed { tid: i32, source: nix::Error },
    #[error("Timed out waiting for the threads of pid {0} to stop")]
    AttachTimeout(i32),
    #[error("Only {attached} of {expected} threads of pid {pid} could be stopped")]
    PartialAttach {
        pid: i32,
        attached: usize,
        expected: usize,
    },
    #[error("Controller holds no stopped threads")]
    NoThread,
    #[error("No executable region in the target to stage instructions in")]
    NoExecRegion,
    #[error("Remote {op} failed in the target: {reason}")]
    RemoteSyscallFailed { op: &'static str, reason: String },
    #[error("Compiler exited with {0} for {1}")]
    CompileError(std::process::ExitStatus, String),
    #[error("Symbol {0:?} not found in the compiled output")]
    MissingSymbol(String),
    #[error("No libc mapping in pid {0}")]
    NoLibc(i32),
    #[error("Region too small: need {need} bytes, have {have}")]
    NoRoom { need: usize, have: usize },
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}
