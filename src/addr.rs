use std::fmt;
use std::ops::{Add, AddAssign, Sub, SubAssign};

use serde::Serialize;

use crate::errors::{PatchError, Result};

/// Raw pointer type handed to the ptrace wrappers
pub type RawPointer = *mut std::ffi::c_void;

/// An address in the *target's* address space.
///
/// Never dereference one of these locally; it only has meaning on the other
/// side of a cross-process read or a ptrace request.
#[derive(Hash, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct Addr(usize);

impl Addr {
    pub const NULL: Addr = Addr(0);

    pub fn usize(self) -> usize {
        self.0
    }

    pub fn u64(self) -> u64 {
        self.0 as u64
    }

    pub fn raw_pointer(self) -> RawPointer {
        self.0 as RawPointer
    }

    /// Parses a CLI address argument, with or without a leading `0x`
    ///
    /// ```
    /// use procpatch::addr::Addr;
    ///
    /// assert_eq!(Addr::parse_hex("0x7f00").unwrap(), Addr::from(0x7f00usize));
    /// assert_eq!(Addr::parse_hex("7f00").unwrap(), Addr::from(0x7f00usize));
    /// assert!(Addr::parse_hex("zzz").is_err());
    /// ```
    pub fn parse_hex(raw: &str) -> Result<Self> {
        let digits = raw.strip_prefix("0x").unwrap_or(raw);
        let value = usize::from_str_radix(digits, 16)
            .map_err(|_| PatchError::InvalidArgument(format!("not a hex address: {raw:?}")))?;
        Ok(Addr(value))
    }

    /// Next page boundary at or above this address
    pub fn align_up(self, alignment: usize) -> Addr {
        debug_assert!(alignment.is_power_of_two());
        Addr((self.0 + alignment - 1) & !(alignment - 1))
    }
}

impl fmt::Display for Addr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl fmt::Debug for Addr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl Add<usize> for Addr {
    type Output = Self;
    fn add(self, rhs: usize) -> Self::Output {
        Addr(self.0 + rhs)
    }
}

impl AddAssign<usize> for Addr {
    fn add_assign(&mut self, rhs: usize) {
        self.0 += rhs;
    }
}

impl Sub<usize> for Addr {
    type Output = Self;
    fn sub(self, rhs: usize) -> Self::Output {
        Addr(self.0 - rhs)
    }
}

impl SubAssign<usize> for Addr {
    fn sub_assign(&mut self, rhs: usize) {
        self.0 -= rhs;
    }
}

/// Distance between two addresses, not an address itself
impl Sub for Addr {
    type Output = usize;
    fn sub(self, rhs: Self) -> Self::Output {
        self.0 - rhs.0
    }
}

impl From<usize> for Addr {
    fn from(value: usize) -> Self {
        Addr(value)
    }
}

impl From<u64> for Addr {
    fn from(value: u64) -> Self {
        Addr(value as usize)
    }
}

impl From<RawPointer> for Addr {
    fn from(value: RawPointer) -> Self {
        Addr(value as usize)
    }
}

impl From<Addr> for u64 {
    fn from(value: Addr) -> Self {
        value.0 as u64
    }
}

impl From<Addr> for usize {
    fn from(value: Addr) -> Self {
        value.0
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_addr_arithmetic() {
        let a = Addr::from(0x2000usize);
        assert_eq!((a + 0x10).usize(), 0x2010);
        assert_eq!((a - 0x10).usize(), 0x1ff0);
        assert_eq!(a + 0x10 - a, 0x10);
    }

    #[test]
    fn test_addr_parse_hex() {
        assert_eq!(Addr::parse_hex("0xdead").unwrap().usize(), 0xdead);
        assert_eq!(Addr::parse_hex("DEAD").unwrap().usize(), 0xdead);
        assert!(Addr::parse_hex("0x").is_err());
        assert!(Addr::parse_hex("street").is_err());
    }

    #[test]
    fn test_addr_align() {
        assert_eq!(Addr::from(0x1001usize).align_up(0x1000).usize(), 0x2000);
        assert_eq!(Addr::from(0x1000usize).align_up(0x1000).usize(), 0x1000);
    }

    #[test]
    fn test_addr_display() {
        assert_eq!(format!("{}", Addr::from(0x1234usize)), "0x1234");
    }
}
