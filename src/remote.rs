//! # Remote Operations
//!
//! Higher-level operations composed from the scratch-frame primitive:
//! allocating memory in the target, changing page protections, loading a
//! shared object and redirecting a function's entry to freshly injected
//! code.

use std::path::Path;

use nix::libc;
use tracing::{debug, info};

use crate::addr::Addr;
use crate::compile;
use crate::consts::{
    CALL_WORD, CALL_WORD_ENTRY, JMP_RAX_RET, MOV_RAX_IMM64, PAGE_SIZE, SYSCALL_WORD,
};
use crate::debugger::Debugger;
use crate::errors::{PatchError, Result};
use crate::memio;
use crate::memorymap::MemoryRegion;
use crate::perms::Permission;
use crate::symbols::{self, Function};

/// `mov rax, imm64; jmp rax; ret` pointed at `destination`
fn trampoline_to(destination: Addr) -> [u8; 13] {
    let mut bytes = [0u8; 13];
    bytes[..2].copy_from_slice(&MOV_RAX_IMM64);
    bytes[2..10].copy_from_slice(&destination.u64().to_le_bytes());
    bytes[10..].copy_from_slice(&JMP_RAX_RET);
    bytes
}

impl Debugger {
    /// Executes one syscall on the target's main thread and returns the raw
    /// result register
    fn remote_syscall(&self, op: &'static str, nr: u64, args: [u64; 6]) -> Result<u64> {
        let frame = self.scratch_frame(SYSCALL_WORD)?;

        let mut staged = frame.saved_regs();
        staged.regs.rip = frame.scratch().u64();
        // Linux x86-64 syscall ABI
        staged.regs.rax = nr;
        staged.regs.rdi = args[0];
        staged.regs.rsi = args[1];
        staged.regs.rdx = args[2];
        staged.regs.r10 = args[3];
        staged.regs.r8 = args[4];
        staged.regs.r9 = args[5];

        let trapped = frame.run(op, staged)?;
        frame.restore()?;
        Ok(trapped.ret())
    }

    /// `mmap` a fresh private anonymous RWX mapping of `bytes` bytes in the
    /// target
    pub fn allocate_memory(&self, bytes: usize) -> Result<MemoryRegion> {
        let ret = self.remote_syscall(
            "mmap",
            libc::SYS_mmap as u64,
            [
                0, // kernel chooses the address
                bytes as u64,
                (libc::PROT_READ | libc::PROT_WRITE | libc::PROT_EXEC) as u64,
                (libc::MAP_PRIVATE | libc::MAP_ANONYMOUS) as u64,
                (-1i64) as u64, // no backing fd
                0,
            ],
        )?;
        if (ret as i64) < 0 {
            return Err(PatchError::RemoteSyscallFailed {
                op: "mmap",
                reason: format!("target returned {:#x}", ret),
            });
        }
        debug!("target mapped {bytes} bytes at {:#x}", ret);
        Ok(MemoryRegion::new(Addr::from(ret), bytes, Permission::RWX))
    }

    /// `mprotect` `region` in the target to `perms`
    pub fn change_region_permissions(
        &self,
        region: &MemoryRegion,
        perms: Permission,
    ) -> Result<()> {
        let ret = self.remote_syscall(
            "mprotect",
            libc::SYS_mprotect as u64,
            [
                region.start.u64(),
                region.size() as u64,
                perms.to_native() as u64,
                0,
                0,
                0,
            ],
        )?;
        if (ret as i64) < 0 {
            return Err(PatchError::RemoteSyscallFailed {
                op: "mprotect",
                reason: format!("target returned {}", ret as i64),
            });
        }
        debug!("target region {} set to {perms}", region.start);
        Ok(())
    }

    /// Makes the target `dlopen` the shared object at `path`.
    ///
    /// The path string and a throwaway stack are placed in freshly mapped
    /// target pages, then the main thread is pointed at a `call rbx`
    /// sequence with `rbx` holding the address of libc's `dlopen`.
    pub fn load_library(&self, path: &str) -> Result<()> {
        let pid = self.process().pid();

        let regions = self.process().regions()?;
        let libc_region = regions
            .iter()
            .find(|region| {
                region
                    .name
                    .as_deref()
                    .is_some_and(|name| name.contains("libc.so"))
            })
            .ok_or(PatchError::NoLibc(pid.as_raw()))?;
        let libc_path = libc_region.name.clone().expect("matched on the name");

        // dlopen's st_value is an offset from libc's load address
        let dlopen_value = symbols::dynamic_symbol_value(Path::new(&libc_path), "dlopen")?;
        let dlopen_addr = libc_region.start + dlopen_value as usize;
        debug!("dlopen of the target resides at {dlopen_addr}");

        let mut path_bytes = path.as_bytes().to_vec();
        path_bytes.push(0);
        if path_bytes.len() > PAGE_SIZE {
            return Err(PatchError::InvalidArgument(format!(
                "library path longer than {PAGE_SIZE} bytes"
            )));
        }
        let path_region = self.allocate_memory(PAGE_SIZE)?;
        memio::write_region(pid, &path_region, &path_bytes)?;
        let stack = self.allocate_memory(PAGE_SIZE)?;

        let frame = self.scratch_frame(CALL_WORD)?;
        let mut staged = frame.saved_regs();
        staged.regs.rip = (frame.scratch() + CALL_WORD_ENTRY).u64();
        staged.regs.rbx = dlopen_addr.u64();
        staged.regs.rdi = path_region.start.u64();
        staged.regs.rsi = libc::RTLD_NOW as u64;
        staged.regs.rsp = stack.end.u64();
        staged.regs.rbp = staged.regs.rsp;

        let trapped = frame.run("dlopen", staged)?;
        // a null handle is dlopen's own failure signal; the injection
        // itself still completed, so it is only logged
        debug!("dlopen returned {:#x}", trapped.ret());
        frame.restore()?;

        info!("target {pid} loaded {path}");
        Ok(())
    }

    /// Compiles `source` and permanently redirects `target` to the
    /// resulting `hook_main`.
    ///
    /// There is no uninstall: the first bytes of the function are replaced
    /// by the trampoline for the rest of the target's life.
    pub fn hook(&self, target: &Function, source: &Path) -> Result<()> {
        let pid = self.process().pid();
        let compiled = compile::compile(source, None)?;

        let payload_region = self.allocate_memory(PAGE_SIZE)?;
        if compiled.text.len() > payload_region.size() {
            return Err(PatchError::NoRoom {
                need: compiled.text.len(),
                have: payload_region.size(),
            });
        }
        memio::write_region(pid, &payload_region, &compiled.text)?;
        let destination = payload_region.start + compiled.entry_offset;
        debug!("hook_main injected at {destination}");

        let fn_region = self.process().region_containing(target.address)?;
        self.change_region_permissions(&fn_region, Permission::RWX)?;

        let trampoline = trampoline_to(destination);
        let fn_offset = target.address - fn_region.start;
        let mut image = memio::read_region(pid, &fn_region, None)?;
        if fn_offset + trampoline.len() > image.len() {
            return Err(PatchError::NoRoom {
                need: fn_offset + trampoline.len(),
                have: image.len(),
            });
        }
        image[fn_offset..fn_offset + trampoline.len()].copy_from_slice(&trampoline);
        memio::write_region(pid, &fn_region, &image)?;

        info!(
            "redirected {} at {} to {destination}",
            target.name, target.address
        );
        Ok(())
    }
}
