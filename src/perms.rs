//! Memory permission bit set and its mapping to the kernel's `PROT_*`
//! encoding.

use std::fmt;
use std::ops::{BitAnd, BitAndAssign, BitOr, BitOrAssign, BitXor, BitXorAssign};

use nix::libc;
use serde::Serialize;

/// Set of permissions over a memory region
///
/// Supports the usual set algebra:
///
/// ```
/// use procpatch::perms::Permission;
///
/// let rw = Permission::READ | Permission::WRITE;
/// assert!(rw.has(Permission::READ));
/// assert!(!rw.has(Permission::EXECUTE));
/// assert_eq!(rw ^ rw, Permission::NONE);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Permission(u8);

impl Permission {
    pub const NONE: Permission = Permission(0);
    pub const READ: Permission = Permission(1);
    pub const WRITE: Permission = Permission(1 << 1);
    pub const EXECUTE: Permission = Permission(1 << 2);
    pub const RWX: Permission = Permission(0b111);

    /// True iff every bit of `other` is present in `self`
    pub fn has(self, other: Permission) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Builds the set from exactly the letters present in `field`, as they
    /// appear in a maps line (`r-xp`) or a CLI argument (`rwx`)
    pub fn from_letters(field: &str) -> Permission {
        let mut perm = Permission::NONE;
        if field.contains('r') {
            perm |= Permission::READ;
        }
        if field.contains('w') {
            perm |= Permission::WRITE;
        }
        if field.contains('x') {
            perm |= Permission::EXECUTE;
        }
        perm
    }

    /// The `PROT_*` encoding handed to mmap/mprotect in the target
    pub fn to_native(self) -> i32 {
        let mut prot = libc::PROT_NONE;
        if self.has(Permission::READ) {
            prot |= libc::PROT_READ;
        }
        if self.has(Permission::WRITE) {
            prot |= libc::PROT_WRITE;
        }
        if self.has(Permission::EXECUTE) {
            prot |= libc::PROT_EXEC;
        }
        prot
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "NO_PERMISSION");
        }
        let mut parts = Vec::with_capacity(3);
        if self.has(Permission::READ) {
            parts.push("READ");
        }
        if self.has(Permission::WRITE) {
            parts.push("WRITE");
        }
        if self.has(Permission::EXECUTE) {
            parts.push("EXECUTE");
        }
        write!(f, "{}", parts.join(" | "))
    }
}

impl BitOr for Permission {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self::Output {
        Permission(self.0 | rhs.0)
    }
}

impl BitOrAssign for Permission {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for Permission {
    type Output = Self;
    fn bitand(self, rhs: Self) -> Self::Output {
        Permission(self.0 & rhs.0)
    }
}

impl BitAndAssign for Permission {
    fn bitand_assign(&mut self, rhs: Self) {
        self.0 &= rhs.0;
    }
}

impl BitXor for Permission {
    type Output = Self;
    fn bitxor(self, rhs: Self) -> Self::Output {
        Permission(self.0 ^ rhs.0)
    }
}

impl BitXorAssign for Permission {
    fn bitxor_assign(&mut self, rhs: Self) {
        self.0 ^= rhs.0;
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_permission_algebra() {
        let all = [
            Permission::NONE,
            Permission::READ,
            Permission::WRITE,
            Permission::EXECUTE,
            Permission::READ | Permission::WRITE,
            Permission::RWX,
        ];
        for &a in &all {
            for &b in &all {
                assert_eq!((a | b) & b, b);
                assert!((a | b).has(a) && (a | b).has(b));
            }
            assert_eq!(a ^ a, Permission::NONE);
        }
    }

    #[test]
    fn test_from_letters() {
        let rx = Permission::READ | Permission::EXECUTE;
        let rw = Permission::READ | Permission::WRITE;
        assert_eq!(Permission::from_letters("r-xp"), rx);
        assert_eq!(Permission::from_letters("rw-p"), rw);
        assert_eq!(Permission::from_letters("---p"), Permission::NONE);
        assert_eq!(Permission::from_letters("rwx"), Permission::RWX);
    }

    #[test]
    fn test_to_native() {
        use nix::libc::{PROT_EXEC, PROT_NONE, PROT_READ, PROT_WRITE};
        assert_eq!(Permission::NONE.to_native(), PROT_NONE);
        assert_eq!(
            Permission::RWX.to_native(),
            PROT_READ | PROT_WRITE | PROT_EXEC
        );
    }

    #[test]
    fn test_display() {
        assert_eq!(Permission::NONE.to_string(), "NO_PERMISSION");
        assert_eq!(
            (Permission::READ | Permission::EXECUTE).to_string(),
            "READ | EXECUTE"
        );
        assert_eq!(Permission::RWX.to_string(), "READ | WRITE | EXECUTE");
    }
}
