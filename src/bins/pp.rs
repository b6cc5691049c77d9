use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use nix::unistd::Pid;

use procpatch::addr::Addr;
use procpatch::debugger::Debugger;
use procpatch::disassemble;
use procpatch::errors::{PatchError, Result};
use procpatch::memio;
use procpatch::memorymap::{MemoryRegion, MemoryStats};
use procpatch::perms::Permission;
use procpatch::process::{all_pids, find_process, Process};
use procpatch::symbols;
use procpatch::thread::Thread;

/// Inspect and patch running processes
#[derive(Parser, Debug)]
#[command(name = "pp", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Print the pids of every process with the given name
    Pidof { name: String },
    /// List all processes
    Ps,
    /// Print a process name from its pid
    Name { pid: i32 },
    /// Show detailed process information
    Info { pid: i32 },
    /// Show the process memory map
    Maps { pid: i32 },
    /// List executable memory regions only
    Exec { pid: i32 },
    /// Show memory statistics of a process
    Memstat { pid: i32 },
    /// Find the memory region containing an address
    Region { pid: i32, addr: String },
    /// Check read/write/execute access at an address
    CheckAccess { pid: i32, addr: String },
    /// Hex dump target memory
    Read { pid: i32, addr: String, size: usize },
    /// Write bytes (hex, one per argument) to target memory
    Write {
        pid: i32,
        addr: String,
        bytes: Vec<String>,
    },
    /// Print every address matching a hex pattern in readable regions
    Search { pid: i32, pattern: String },
    /// Find and replace a pattern across writable memory
    Replace {
        pid: i32,
        find: String,
        replace: String,
        occurrences: Option<usize>,
        /// Treat the patterns as hex byte strings instead of ASCII
        #[arg(long)]
        hex: bool,
    },
    /// Write a file's contents to an address
    Load {
        pid: i32,
        addr: String,
        file: PathBuf,
    },
    /// List all functions of a process
    Functions {
        pid: i32,
        #[arg(long)]
        demangle: bool,
    },
    /// Search functions by name substring
    FindFn {
        pid: i32,
        pattern: String,
        #[arg(long)]
        demangle: bool,
    },
    /// Resolve one function address (substring match)
    FindFunc { pid: i32, name: String },
    /// Print a function's address, region and first bytes
    AnalyzeFunc { pid: i32, name: String },
    /// Attach and print the main thread's registers
    Attach { pid: i32, timeout_ms: Option<u64> },
    /// Attach and print every thread's registers
    Threads { pid: i32 },
    /// Attach and print one thread's registers
    ThreadInfo { pid: i32, tid: i32 },
    /// Allocate memory in the target
    Allocate { pid: i32, size: usize },
    /// Change a target region's permissions (chars r/w/x)
    Chmod {
        pid: i32,
        addr: String,
        size: usize,
        perms: String,
    },
    /// Load a shared object into the target
    Inject { pid: i32, lib_path: String },
    /// Compile source and hook a target function with it
    Hook {
        pid: i32,
        function: String,
        source: PathBuf,
    },
}

fn main() -> ExitCode {
    setup_logger();

    let cli = Cli::parse();
    match run(cli.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn setup_logger() {
    // diagnostics go to stderr so command output stays pipeable
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::WARN)
        .without_time()
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("could not setup logger");
}

fn run(cmd: Cmd) -> Result<()> {
    match cmd {
        Cmd::Pidof { name } => {
            for proc in find_process(&name)? {
                println!("{}", proc.pid());
            }
            Ok(())
        }
        Cmd::Ps => {
            println!("PID\tNAME");
            for pid in all_pids()? {
                // processes may vanish mid-listing
                if let Ok(name) = Process::from_raw(pid).name() {
                    println!("{pid}\t{name}");
                }
            }
            Ok(())
        }
        Cmd::Name { pid } => {
            println!("{}", Process::from_raw(pid).name()?);
            Ok(())
        }
        Cmd::Info { pid } => {
            let proc = Process::from_raw(pid);
            println!("Process Information:");
            println!("  PID: {}", proc.pid());
            println!("  Name: {}", proc.name()?);
            println!("  Base Address: {}", proc.base_address()?);
            println!("  Memory Usage: {} bytes", proc.mem_usage()?);
            println!("  Executable: {}", proc.exe_path()?.display());
            println!("  Threads: {}", proc.threads()?.len());
            Ok(())
        }
        Cmd::Maps { pid } => {
            let proc = Process::from_raw(pid);
            println!("Memory regions for process {pid}:");
            println!("ADDRESS RANGE                    SIZE     PERMISSIONS              NAME");
            for region in proc.regions()? {
                println!("{region}");
            }
            Ok(())
        }
        Cmd::Exec { pid } => {
            let proc = Process::from_raw(pid);
            println!("Executable regions for process {pid} ({}):", proc.name()?);
            println!("ADDRESS RANGE                    SIZE     PERMISSIONS              NAME");
            for region in proc.regions()? {
                if region.has_permissions(Permission::EXECUTE) {
                    println!("{region}");
                }
            }
            Ok(())
        }
        Cmd::Memstat { pid } => {
            let proc = Process::from_raw(pid);
            let stats = MemoryStats::collect(&proc.regions()?);
            println!("Memory Statistics for {pid} ({}):", proc.name()?);
            println!("{stats}");
            Ok(())
        }
        Cmd::Region { pid, addr } => {
            let addr = Addr::parse_hex(&addr)?;
            let region = Process::from_raw(pid).region_containing(addr)?;
            println!("Memory region containing {addr}:");
            println!("  Start: {}", region.start);
            println!("  End: {}", region.end);
            println!("  Size: {} bytes", region.size());
            println!("  Permissions: {}", region.perms);
            if let Some(name) = &region.name {
                println!("  Name: {name}");
            }
            println!("  Offset in region: {:#x}", addr - region.start);
            Ok(())
        }
        Cmd::CheckAccess { pid, addr } => {
            let addr = Addr::parse_hex(&addr)?;
            let region = Process::from_raw(pid).region_containing(addr)?;
            println!("Memory Access at {addr}:");
            println!("  Readable: {}", yes_no(region.has_permissions(Permission::READ)));
            println!("  Writable: {}", yes_no(region.has_permissions(Permission::WRITE)));
            println!(
                "  Executable: {}",
                yes_no(region.has_permissions(Permission::EXECUTE))
            );
            Ok(())
        }
        Cmd::Read { pid, addr, size } => {
            let addr = Addr::parse_hex(&addr)?;
            let region = MemoryRegion::new(addr, size, Permission::READ);
            let memory = memio::read_region(Pid::from_raw(pid), &region, None)?;
            println!("Memory at {addr} (size: {size} bytes):");
            hexdump(addr, &memory);
            Ok(())
        }
        Cmd::Write { pid, addr, bytes } => {
            if bytes.is_empty() {
                return Err(PatchError::InvalidArgument(
                    "write needs at least one byte".to_string(),
                ));
            }
            let addr = Addr::parse_hex(&addr)?;
            let data = bytes
                .iter()
                .map(|b| u8::from_str_radix(b.strip_prefix("0x").unwrap_or(b), 16))
                .collect::<std::result::Result<Vec<u8>, _>>()?;
            let region = MemoryRegion::new(addr, data.len(), Permission::READ | Permission::WRITE);
            memio::write_region(Pid::from_raw(pid), &region, &data)?;
            println!("Successfully wrote {} bytes to {addr}", data.len());
            Ok(())
        }
        Cmd::Search { pid, pattern } => {
            let pattern = hex_to_bytes(&pattern)?;
            let proc = Process::from_raw(pid);
            println!(
                "Searching for pattern in process {pid} ({}):",
                proc.name()?
            );
            for region in proc.regions()? {
                if !region.has_permissions(Permission::READ) {
                    continue;
                }
                // unreadable regions must not abort the whole scan
                let Ok(hits) = memio::search_region(proc.pid(), &region, &pattern) else {
                    continue;
                };
                for hit in hits {
                    println!("Found at: {hit}");
                }
            }
            Ok(())
        }
        Cmd::Replace {
            pid,
            find,
            replace,
            occurrences,
            hex,
        } => {
            let find = pattern_bytes(&find, hex)?;
            let mut replace = pattern_bytes(&replace, hex)?;
            // keep the rewrite length-preserving; the library leaves a
            // shorter replacement's tail untouched
            while replace.len() < find.len() {
                replace.push(b' ');
            }

            let proc = Process::from_raw(pid);
            let mut total = 0;
            for region in proc.regions()? {
                if !region.has_permissions(Permission::READ | Permission::WRITE) {
                    continue;
                }
                match memio::replace_in_region(proc.pid(), &region, &find, &replace, occurrences) {
                    Ok(n) => total += n,
                    // skip regions we cannot touch
                    Err(_) => continue,
                }
            }
            println!("Successfully replaced pattern in process {pid}");
            println!("Replacements made: {total}");
            Ok(())
        }
        Cmd::Load { pid, addr, file } => {
            let addr = Addr::parse_hex(&addr)?;
            let data = std::fs::read(&file)?;
            let region = MemoryRegion::new(addr, data.len(), Permission::READ | Permission::WRITE);
            memio::write_region(Pid::from_raw(pid), &region, &data)?;
            println!(
                "Successfully loaded {} bytes from {} to {addr}",
                data.len(),
                file.display()
            );
            Ok(())
        }
        Cmd::Functions { pid, demangle } => {
            let proc = Process::from_raw(pid);
            let functions = proc.functions()?;
            println!("Functions in process {pid} ({}):", proc.name()?);
            println!("ADDRESS             NAME");
            for function in &functions {
                println!("{:#016x}  {}", function.address.usize(), display_name(&function.name, demangle));
            }
            println!("\nTotal functions found: {}", functions.len());
            Ok(())
        }
        Cmd::FindFn {
            pid,
            pattern,
            demangle,
        } => {
            let proc = Process::from_raw(pid);
            println!(
                "Searching for functions matching {pattern:?} in process {pid} ({}):",
                proc.name()?
            );
            println!("ADDRESS             NAME");
            let mut matches = 0;
            for function in proc.functions()? {
                let name = display_name(&function.name, demangle);
                if name.contains(&pattern) {
                    println!("{:#016x}  {name}", function.address.usize());
                    matches += 1;
                }
            }
            println!("\nFound {matches} matching functions");
            Ok(())
        }
        Cmd::FindFunc { pid, name } => {
            let proc = Process::from_raw(pid);
            let function = proc
                .resolve(&name)?
                .ok_or(PatchError::FunctionNotFound(name.clone()))?;
            println!("found function {name:?} at {}", function.address);
            Ok(())
        }
        Cmd::AnalyzeFunc { pid, name } => {
            let proc = Process::from_raw(pid);
            let function = proc
                .resolve(&name)?
                .ok_or(PatchError::FunctionNotFound(name.clone()))?;
            let region = proc.region_containing(function.address)?;
            let image = memio::read_region(proc.pid(), &region, None)?;

            println!("Function Analysis for {name:?}:");
            println!("  Address: {}", function.address);
            println!("  Region: {}-{}", region.start, region.end);
            println!("  Permissions: {}", region.perms);
            if let Some(module) = &region.name {
                println!("  Module: {module}");
            }

            let offset = function.address - region.start;
            let window = &image[offset..image.len().min(offset + 32)];
            println!("\nFirst {} bytes:", window.len());
            hexdump(function.address, window);
            println!("\nDisassembly:");
            print!("{}", disassemble::disassemble(window, function.address.u64()));
            Ok(())
        }
        Cmd::Attach { pid, timeout_ms } => {
            let dbg = Debugger::attach(
                Process::from_raw(pid),
                timeout_ms.map(Duration::from_millis),
            )?;
            let main = dbg.main_thread()?;
            println!("Successfully attached to process {pid}:");
            println!("  Main thread: {}", main.tid());
            println!("\nMain thread registers:");
            println!("{}", dbg.get_regs(main)?);
            Ok(())
        }
        Cmd::Threads { pid } => {
            let proc = Process::from_raw(pid);
            let name = proc.name()?;
            let dbg = Debugger::attach(proc, None)?;
            println!("Threads for process {pid} ({name}):");
            for thread in dbg.threads() {
                println!("\nThread ID: {}", thread.tid());
                println!("{}", dbg.get_regs(thread)?);
            }
            Ok(())
        }
        Cmd::ThreadInfo { pid, tid } => {
            let proc = Process::from_raw(pid);
            let name = proc.name()?;
            let dbg = Debugger::attach(proc, None)?;
            let thread = Thread::new(Pid::from_raw(pid), Pid::from_raw(tid));
            let regs = dbg.get_regs(&thread)?;
            println!("Thread {tid} Information:");
            println!("  Process: {pid} ({name})");
            println!("  Registers:\n{regs}");
            Ok(())
        }
        Cmd::Allocate { pid, size } => {
            let dbg = Debugger::attach(Process::from_raw(pid), None)?;
            let region = dbg.allocate_memory(size)?;
            println!("Successfully allocated memory:");
            println!("  Address: {}", region.start);
            println!("  Size: {} bytes", region.size());
            println!("  Permissions: {}", region.perms);
            Ok(())
        }
        Cmd::Chmod {
            pid,
            addr,
            size,
            perms,
        } => {
            let addr = Addr::parse_hex(&addr)?;
            let perms = Permission::from_letters(&perms);
            let region = MemoryRegion::new(addr, size, perms);
            let dbg = Debugger::attach(Process::from_raw(pid), None)?;
            dbg.change_region_permissions(&region, perms)?;
            println!("Successfully changed permissions:");
            println!("  Region: {}-{}", region.start, region.end);
            println!("  New permissions: {perms}");
            Ok(())
        }
        Cmd::Inject { pid, lib_path } => {
            let dbg = Debugger::attach(Process::from_raw(pid), None)?;
            dbg.load_library(&lib_path)?;
            println!("Successfully injected library:");
            println!("  Process: {pid}");
            println!("  Library: {lib_path}");
            Ok(())
        }
        Cmd::Hook {
            pid,
            function,
            source,
        } => {
            let proc = Process::from_raw(pid);
            let target = proc
                .resolve(&function)?
                .ok_or(PatchError::FunctionNotFound(function.clone()))?;
            let dbg = Debugger::attach(proc, None)?;
            dbg.hook(&target, &source)?;
            println!("Successfully hooked function {function:?}");
            println!("  at address: {}", target.address);
            println!("  with source: {}", source.display());
            Ok(())
        }
    }
}

fn yes_no(flag: bool) -> &'static str {
    if flag {
        "Yes"
    } else {
        "No"
    }
}

fn display_name(mangled: &str, want_demangled: bool) -> String {
    if want_demangled {
        symbols::demangle(mangled).unwrap_or_else(|| mangled.to_string())
    } else {
        mangled.to_string()
    }
}

/// Decodes a hex byte string such as `414255` or `0xdeadbeef`
fn hex_to_bytes(pattern: &str) -> Result<Vec<u8>> {
    let digits = pattern.strip_prefix("0x").unwrap_or(pattern);
    if digits.is_empty() || digits.len() % 2 != 0 {
        return Err(PatchError::InvalidArgument(format!(
            "hex pattern needs an even number of digits: {pattern:?}"
        )));
    }
    (0..digits.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&digits[i..i + 2], 16).map_err(|_| {
                PatchError::InvalidArgument(format!("not a hex pattern: {pattern:?}"))
            })
        })
        .collect()
}

fn pattern_bytes(pattern: &str, hex: bool) -> Result<Vec<u8>> {
    if hex {
        hex_to_bytes(pattern)
    } else {
        Ok(pattern.as_bytes().to_vec())
    }
}

/// Classic hex + ASCII dump, 16 bytes per line
fn hexdump(base: Addr, bytes: &[u8]) {
    for (i, chunk) in bytes.chunks(16).enumerate() {
        print!("{:#018x}  ", base.usize() + i * 16);
        for byte in chunk {
            print!("{byte:02x} ");
        }
        for _ in chunk.len()..16 {
            print!("   ");
        }
        print!(" |");
        for byte in chunk {
            let c = *byte as char;
            print!("{}", if c.is_ascii_graphic() || c == ' ' { c } else { '.' });
        }
        println!("|");
    }
}
