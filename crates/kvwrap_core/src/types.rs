//! Core type definitions.

use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign, Not};

/// Per-database change counter.
///
/// Increases on every operation that changes data and never decreases.
/// Callers compare two readings to detect that something changed without
/// re-reading the data itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct SequenceNumber(pub u64);

impl SequenceNumber {
    /// Creates a new sequence number.
    #[must_use]
    pub const fn new(seq: u64) -> Self {
        Self(seq)
    }

    /// Returns the raw sequence value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns the next sequence number.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for SequenceNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "seq:{}", self.0)
    }
}

/// How a store treats an existing value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreMode {
    /// Fail with `AlreadyExists` if the key holds a value.
    Insert,
    /// Unconditional upsert.
    Replace,
}

/// How a record lock is acquired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LockMode {
    /// Wait until the lock is free.
    #[default]
    Blocking,
    /// Fail with `WouldBlock` instead of waiting.
    NonBlocking,
}

/// Returned by traversal callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraverseControl {
    /// Visit the next record.
    Continue,
    /// Stop the traversal without visiting any further record.
    Stop,
}

/// Set of optional operations a backend implements natively.
///
/// Anything not in the set is served by the fallback layer.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Capabilities(u32);

impl Capabilities {
    /// Lockless fetch.
    pub const FETCH: Self = Self(1 << 0);
    /// Unlocked read-only traversal.
    pub const TRAVERSE_READ: Self = Self(1 << 1);
    /// Zero-copy record inspection.
    pub const PARSE_RECORD: Self = Self(1 << 2);
    /// Existence check without materializing the value.
    pub const EXISTS: Self = Self(1 << 3);
    /// Remove every record.
    pub const WIPE: Self = Self(1 << 4);
    /// Lock attempts that fail instead of waiting.
    pub const NONBLOCKING_LOCK: Self = Self(1 << 5);

    const NAMES: [(Self, &'static str); 6] = [
        (Self::FETCH, "fetch"),
        (Self::TRAVERSE_READ, "traverse_read"),
        (Self::PARSE_RECORD, "parse_record"),
        (Self::EXISTS, "exists"),
        (Self::WIPE, "wipe"),
        (Self::NONBLOCKING_LOCK, "nonblocking_lock"),
    ];

    /// No optional operation.
    #[must_use]
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Every optional operation.
    #[must_use]
    pub const fn all() -> Self {
        Self(0b11_1111)
    }

    /// Returns the raw bits.
    #[must_use]
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Builds a set from raw bits, dropping unknown ones.
    #[must_use]
    pub const fn from_bits_truncate(bits: u32) -> Self {
        Self(bits & Self::all().0)
    }

    /// Returns true if every capability in `other` is present.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Returns true if no capability is present.
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Iterates over the names of the present capabilities.
    pub fn names(self) -> impl Iterator<Item = &'static str> {
        Self::NAMES
            .into_iter()
            .filter(move |(flag, _)| self.contains(*flag))
            .map(|(_, name)| name)
    }
}

impl BitOr for Capabilities {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for Capabilities {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for Capabilities {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self {
        Self(self.0 & rhs.0)
    }
}

impl Not for Capabilities {
    type Output = Self;

    fn not(self) -> Self {
        Self(!self.0 & Self::all().0)
    }
}

impl fmt::Debug for Capabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.names()).finish()
    }
}

impl fmt::Display for Capabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("none");
        }
        let names: Vec<_> = self.names().collect();
        f.write_str(&names.join(","))
    }
}
