//! Bulk reads and writes of target memory via cross-process vectored I/O.
//!
//! These transfers are all-or-nothing: a short count from the kernel is
//! reported as an error, never as partial success. They do not require the
//! target to be stopped, only that the caller tolerates snapshot semantics.

use std::io::{IoSlice, IoSliceMut};

use nix::sys::uio::{process_vm_readv, process_vm_writev, RemoteIoVec};
use nix::unistd::Pid;
use tracing::trace;

use crate::addr::Addr;
use crate::errors::{PatchError, Result};
use crate::memorymap::MemoryRegion;

/// Reads `len` bytes (default: the whole region) from the target
pub fn read_region(pid: Pid, region: &MemoryRegion, len: Option<usize>) -> Result<Vec<u8>> {
    let want = len.unwrap_or_else(|| region.size());
    if want > region.size() {
        return Err(PatchError::InvalidArgument(format!(
            "read of {want} bytes exceeds region of {} bytes",
            region.size()
        )));
    }

    let mut buf = vec![0u8; want];
    let remote = [RemoteIoVec {
        base: region.start.usize(),
        len: want,
    }];
    let got = process_vm_readv(pid, &mut [IoSliceMut::new(&mut buf)], &remote)?;
    if got != want {
        return Err(PatchError::ShortTransfer {
            addr: region.start,
            got,
            want,
        });
    }
    Ok(buf)
}

/// Writes `data` at the start of `region` in the target
pub fn write_region(pid: Pid, region: &MemoryRegion, data: &[u8]) -> Result<()> {
    if data.len() > region.size() {
        return Err(PatchError::InvalidArgument(format!(
            "write of {} bytes exceeds region of {} bytes",
            data.len(),
            region.size()
        )));
    }

    let remote = [RemoteIoVec {
        base: region.start.usize(),
        len: data.len(),
    }];
    let got = process_vm_writev(pid, &[IoSlice::new(data)], &remote)?;
    if got != data.len() {
        return Err(PatchError::ShortTransfer {
            addr: region.start,
            got,
            want: data.len(),
        });
    }
    trace!("wrote {} bytes at {}", data.len(), region.start);
    Ok(())
}

/// Addresses of every match of `pattern` within `region`
pub fn search_region(pid: Pid, region: &MemoryRegion, pattern: &[u8]) -> Result<Vec<Addr>> {
    if pattern.is_empty() {
        return Err(PatchError::InvalidArgument(
            "empty search pattern".to_string(),
        ));
    }
    let memory = read_region(pid, region, None)?;
    Ok(memory
        .windows(pattern.len())
        .enumerate()
        .filter(|(_, window)| *window == pattern)
        .map(|(offset, _)| region.start + offset)
        .collect())
}

/// Replaces up to `occurrences` matches of `find` inside `region`
///
/// The region is read once; after each in-place rewrite the whole region is
/// written back and the search restarts from the region's first byte. A
/// `replace` shorter than `find` leaves the tail of the match untouched;
/// callers that want padding supply it themselves. Returns the number of
/// rewrites performed.
pub fn replace_in_region(
    pid: Pid,
    region: &MemoryRegion,
    find: &[u8],
    replace: &[u8],
    occurrences: Option<usize>,
) -> Result<usize> {
    if find.is_empty() {
        return Err(PatchError::InvalidArgument(
            "empty find pattern".to_string(),
        ));
    }

    let mut memory = read_region(pid, region, None)?;
    let limit = occurrences.unwrap_or(usize::MAX);
    let mut rewritten = 0;

    while rewritten < limit {
        let Some(pos) = memory
            .windows(find.len())
            .position(|window| window == find)
        else {
            break;
        };
        let splice_len = replace.len().min(memory.len() - pos);
        if memory[pos..pos + splice_len] == replace[..splice_len] {
            // rewrite would change nothing and the scan would find the same
            // match forever
            break;
        }
        memory[pos..pos + splice_len].copy_from_slice(&replace[..splice_len]);
        write_region(pid, region, &memory)?;
        rewritten += 1;
    }

    Ok(rewritten)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::perms::Permission;

    /// A region handle over one of our own buffers; process_vm I/O on the
    /// calling process itself is the cheapest possible harness
    fn region_over(buf: &[u8]) -> MemoryRegion {
        MemoryRegion::new(
            Addr::from(buf.as_ptr() as usize),
            buf.len(),
            Permission::READ | Permission::WRITE,
        )
    }

    #[test]
    fn test_read_own_memory() {
        let buf = *b"cross process read";
        let read = read_region(Pid::this(), &region_over(&buf), None).unwrap();
        assert_eq!(read, buf);
    }

    #[test]
    fn test_read_with_explicit_len() {
        let buf = *b"0123456789";
        let read = read_region(Pid::this(), &region_over(&buf), Some(4)).unwrap();
        assert_eq!(read, b"0123");
        assert!(read_region(Pid::this(), &region_over(&buf), Some(11)).is_err());
    }

    #[test]
    fn test_write_own_memory() {
        let buf = vec![b'.'; 10];
        let region = region_over(&buf);
        write_region(Pid::this(), &region, b"written").unwrap();
        let back = read_region(Pid::this(), &region, None).unwrap();
        assert_eq!(&back, b"written...");
        assert!(write_region(Pid::this(), &region, &[0u8; 11]).is_err());
        drop(buf);
    }

    #[test]
    fn test_search() {
        let buf = *b"ab-needle-cd-needle-";
        let region = region_over(&buf);
        let hits = search_region(Pid::this(), &region, b"needle").unwrap();
        assert_eq!(hits, vec![region.start + 3, region.start + 13]);
        assert!(search_region(Pid::this(), &region, b"").is_err());
    }

    #[test]
    fn test_replace_all_occurrences() {
        let buf = b"Rap music, Rap battle".to_vec();
        let region = region_over(&buf);
        let n = replace_in_region(Pid::this(), &region, b"Rap", b"ABU", None).unwrap();
        assert_eq!(n, 2);
        let back = read_region(Pid::this(), &region, None).unwrap();
        assert_eq!(&back, b"ABU music, ABU battle");
        drop(buf);
    }

    #[test]
    fn test_replace_bounded_and_short() {
        let buf = b"aaaa-aaaa".to_vec();
        let region = region_over(&buf);
        // shorter replacement leaves the tail of the match alone
        let n = replace_in_region(Pid::this(), &region, b"aaaa", b"XY", Some(1)).unwrap();
        assert_eq!(n, 1);
        let back = read_region(Pid::this(), &region, None).unwrap();
        assert_eq!(&back, b"XYaa-aaaa");
        drop(buf);
    }

    #[test]
    fn test_replace_identical_terminates() {
        let buf = *b"loop loop";
        let region = region_over(&buf);
        let n = replace_in_region(Pid::this(), &region, b"loop", b"loop", None).unwrap();
        assert_eq!(n, 0);
    }
}
