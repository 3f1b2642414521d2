use oauth2::Scope;
use std::fmt;
use std::ops::{BitAnd, BitOr, BitXor, Sub};

const NAMES: [&str; 17] = [
    "vso.build",
    "vso.build_execute",
    "vso.chat_manage",
    "vso.chat_write",
    "vso.code_manage",
    "vso.code",
    "vso.code_write",
    "vso.packaging_manage",
    "vso.packaging",
    "vso.packaging_write",
    "vso.profile",
    "vso.hooks",
    "vso.hooks_write",
    "vso.test",
    "vso.test_write",
    "vso.work",
    "vso.work_write",
];

/// A set of scopes a personal access token is issued for.
///
/// Sets combine with the bit operators and display as a space separated
/// scope string.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct VsoTokenScope(u32);

impl VsoTokenScope {
    pub const NONE: Self = Self(0);
    /// Read build artifacts, results and definitions.
    pub const BUILD_ACCESS: Self = Self(1 << 0);
    /// Queue builds.
    pub const BUILD_EXECUTE: Self = Self(1 << 1);
    pub const CHAT_MANAGE: Self = Self(1 << 2);
    pub const CHAT_WRITE: Self = Self(1 << 3);
    /// Create and delete repositories.
    pub const CODE_MANAGE: Self = Self(1 << 4);
    pub const CODE_READ: Self = Self(1 << 5);
    /// Push to repositories; what git needs.
    pub const CODE_WRITE: Self = Self(1 << 6);
    pub const PACKAGING_MANAGE: Self = Self(1 << 7);
    pub const PACKAGING_READ: Self = Self(1 << 8);
    pub const PACKAGING_WRITE: Self = Self(1 << 9);
    pub const PROFILE_READ: Self = Self(1 << 10);
    pub const SERVICE_HOOK_READ: Self = Self(1 << 11);
    pub const SERVICE_HOOK_WRITE: Self = Self(1 << 12);
    pub const TEST_READ: Self = Self(1 << 13);
    pub const TEST_WRITE: Self = Self(1 << 14);
    pub const WORK_READ: Self = Self(1 << 15);
    pub const WORK_WRITE: Self = Self(1 << 16);

    /// Every individual scope, in display order.
    pub fn values() -> impl Iterator<Item = Self> {
        (0..NAMES.len()).map(|bit| Self(1 << bit))
    }

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Scope names contained in this set.
    pub fn names(self) -> impl Iterator<Item = &'static str> {
        NAMES
            .iter()
            .enumerate()
            .filter(move |(bit, _)| self.0 & (1 << bit) != 0)
            .map(|(_, name)| *name)
    }

    pub fn to_scope(self) -> Scope {
        Scope::new(self.to_string())
    }
}

impl Default for VsoTokenScope {
    fn default() -> Self {
        Self::CODE_WRITE
    }
}

impl BitOr for VsoTokenScope {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitAnd for VsoTokenScope {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self {
        Self(self.0 & rhs.0)
    }
}

impl BitXor for VsoTokenScope {
    type Output = Self;

    fn bitxor(self, rhs: Self) -> Self {
        Self(self.0 ^ rhs.0)
    }
}

impl Sub for VsoTokenScope {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Self(self.0 & !rhs.0)
    }
}

impl fmt::Display for VsoTokenScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.names().collect();
        f.write_str(&names.join(" "))
    }
}

impl fmt::Debug for VsoTokenScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VsoTokenScope({})", self)
    }
}
