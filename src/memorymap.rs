//! Parsing and summarizing the target's `/proc/<pid>/maps`.

use std::fmt::{self, Display};

use serde::Serialize;

use crate::addr::Addr;
use crate::errors::{PatchError, Result};
use crate::perms::Permission;

/// One mapping of the target, as a half-open address range
#[derive(Debug, Clone, Serialize)]
pub struct MemoryRegion {
    pub start: Addr,
    pub end: Addr,
    pub perms: Permission,
    /// Backing file path or pseudo name (`[heap]`, `[stack]`, ...); `None`
    /// for anonymous mappings
    pub name: Option<String>,
}

impl MemoryRegion {
    /// A synthesized region, not read from a maps file
    pub fn new(start: Addr, size: usize, perms: Permission) -> Self {
        MemoryRegion {
            start,
            end: start + size,
            perms,
            name: None,
        }
    }

    /// Parses one line of a maps file
    ///
    /// ```
    /// use procpatch::memorymap::MemoryRegion;
    /// use procpatch::perms::Permission;
    ///
    /// let line = "7f5cca60f000-7f5cca633000 r--p 00000000 fe:01 1576211 /usr/lib/libc.so.6";
    /// let region = MemoryRegion::parse(line).unwrap();
    /// assert_eq!(region.start.usize(), 0x7f5cca60f000);
    /// assert_eq!(region.perms, Permission::READ);
    /// assert_eq!(region.name.as_deref(), Some("/usr/lib/libc.so.6"));
    /// ```
    pub fn parse(line: &str) -> Result<Self> {
        let malformed = || PatchError::MapsParse(line.to_string());

        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 5 {
            return Err(malformed());
        }

        let (start_str, end_str) = fields[0].split_once('-').ok_or_else(malformed)?;
        let start = usize::from_str_radix(start_str, 16).map_err(|_| malformed())?;
        let end = usize::from_str_radix(end_str, 16).map_err(|_| malformed())?;
        if end <= start {
            return Err(malformed());
        }

        let perm_field = fields[1];
        if perm_field.len() != 4 || !perm_field.chars().all(|c| "rwxps-".contains(c)) {
            return Err(malformed());
        }

        let name = if fields.len() > 5 {
            Some(fields[5..].join(" "))
        } else {
            None
        };

        Ok(MemoryRegion {
            start: Addr::from(start),
            end: Addr::from(end),
            perms: Permission::from_letters(perm_field),
            name,
        })
    }

    pub fn size(&self) -> usize {
        self.end - self.start
    }

    pub fn contains(&self, addr: Addr) -> bool {
        self.start <= addr && addr < self.end
    }

    pub fn has_permissions(&self, perms: Permission) -> bool {
        self.perms.has(perms)
    }
}

impl Display for MemoryRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:#014x}-{:#014x} {:>8} {:<24} {}",
            self.start.usize(),
            self.end.usize(),
            human_size(self.size()),
            self.perms.to_string(),
            self.name.as_deref().unwrap_or("[anonymous]")
        )
    }
}

/// Rough human formatting for region sizes in listings
pub fn human_size(size: usize) -> String {
    const K: f64 = 1024.0;
    let s = size as f64;
    if s >= K * K * K {
        format!("{:.1}G", s / (K * K * K))
    } else if s >= K * K {
        format!("{:.1}M", s / (K * K))
    } else if s >= K {
        format!("{:.1}K", s / K)
    } else {
        format!("{size}B")
    }
}

/// Byte totals over a snapshot of the memory map
#[derive(Debug, Clone, Copy, Serialize)]
pub struct MemoryStats {
    pub total: usize,
    pub executable: usize,
    pub writable: usize,
    pub anonymous: usize,
}

impl MemoryStats {
    pub fn collect(regions: &[MemoryRegion]) -> Self {
        let mut stats = MemoryStats {
            total: 0,
            executable: 0,
            writable: 0,
            anonymous: 0,
        };
        for region in regions {
            stats.total += region.size();
            if region.perms.has(Permission::EXECUTE) {
                stats.executable += region.size();
            }
            if region.perms.has(Permission::WRITE) {
                stats.writable += region.size();
            }
            if region.name.is_none() {
                stats.anonymous += region.size();
            }
        }
        stats
    }
}

impl Display for MemoryStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "  Total Memory: {} bytes", self.total)?;
        writeln!(f, "  Executable Memory: {} bytes", self.executable)?;
        writeln!(f, "  Writable Memory: {} bytes", self.writable)?;
        write!(f, "  Anonymous Memory: {} bytes", self.anonymous)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_parse_round_trip() {
        let line = "55e7c000-55e7e000 rw-p 00002000 08:02 131593 /usr/bin/target with space";
        let region = MemoryRegion::parse(line).unwrap();
        assert_eq!(region.start.usize(), 0x55e7c000);
        assert_eq!(region.end.usize(), 0x55e7e000);
        assert_eq!(region.size(), 0x2000);
        assert_eq!(region.perms, Permission::READ | Permission::WRITE);
        assert_eq!(region.name.as_deref(), Some("/usr/bin/target with space"));
    }

    #[test]
    fn test_parse_anonymous_and_pseudo() {
        let anon = MemoryRegion::parse("7f00000-7f01000 rw-p 00000000 00:00 0").unwrap();
        assert!(anon.name.is_none());

        let heap = MemoryRegion::parse("5000-6000 rw-p 00000000 00:00 0 [heap]").unwrap();
        assert_eq!(heap.name.as_deref(), Some("[heap]"));
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(MemoryRegion::parse("").is_err());
        assert!(MemoryRegion::parse("not a maps line at all here").is_err());
        // end before start
        assert!(MemoryRegion::parse("6000-5000 rw-p 00000000 00:00 0").is_err());
        // bad permission field
        assert!(MemoryRegion::parse("5000-6000 rwqp 00000000 00:00 0").is_err());
    }

    #[test]
    fn test_contains() {
        let region = MemoryRegion::new(Addr::from(0x1000usize), 0x1000, Permission::READ);
        assert!(region.contains(Addr::from(0x1000usize)));
        assert!(region.contains(Addr::from(0x1fffusize)));
        assert!(!region.contains(Addr::from(0x2000usize)));
    }

    #[test]
    fn test_stats() {
        let regions = vec![
            MemoryRegion::parse("1000-2000 r-xp 00000000 00:00 0 /bin/x").unwrap(),
            MemoryRegion::parse("2000-4000 rw-p 00000000 00:00 0").unwrap(),
        ];
        let stats = MemoryStats::collect(&regions);
        assert_eq!(stats.total, 0x3000);
        assert_eq!(stats.executable, 0x1000);
        assert_eq!(stats.writable, 0x2000);
        assert_eq!(stats.anonymous, 0x2000);
    }

    #[test]
    fn test_human_size() {
        assert_eq!(human_size(512), "512B");
        assert_eq!(human_size(2048), "2.0K");
        assert_eq!(human_size(3 * 1024 * 1024), "3.0M");
    }
}
