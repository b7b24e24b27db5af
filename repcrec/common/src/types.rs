use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::IdError;

/// A committed or buffered value of a variable.
pub type Value = i64;

/// Identifier of a transaction, written `T<n>` in scripts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TxnId(u32);

impl TxnId {
    #[inline]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    #[inline]
    pub const fn raw(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for TxnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "T{}", self.0)
    }
}

impl FromStr for TxnId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.strip_prefix('T')
            .and_then(|n| n.parse().ok())
            .map(Self)
            .ok_or_else(|| IdError::InvalidTxnId(s.to_string()))
    }
}

/// Identifier of a site. Sites are numbered from 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SiteId(u32);

impl SiteId {
    /// Returns `None` for the reserved id 0.
    #[inline]
    pub const fn new(id: u32) -> Option<Self> {
        if id == 0 { None } else { Some(Self(id)) }
    }

    #[inline]
    pub const fn raw(&self) -> u32 {
        self.0
    }

    /// Zero-based position of the site in a site table.
    #[inline]
    pub const fn index(&self) -> usize {
        (self.0 - 1) as usize
    }
}

impl fmt::Display for SiteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SiteId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse()
            .ok()
            .and_then(Self::new)
            .ok_or_else(|| IdError::InvalidSiteId(s.to_string()))
    }
}

/// Identifier of a data item, written `x<n>` in scripts. Variables are numbered from 1.
///
/// The index alone decides where the variable lives: even-indexed variables are replicated on
/// every site, odd-indexed ones live on exactly one site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VariableId(u32);

impl VariableId {
    /// Returns `None` for the reserved index 0.
    #[inline]
    pub const fn new(index: u32) -> Option<Self> {
        if index == 0 { None } else { Some(Self(index)) }
    }

    #[inline]
    pub const fn raw(&self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn is_replicated(&self) -> bool {
        self.0 % 2 == 0
    }

    /// The only site holding a non-replicated variable: `1 + index mod num_sites`.
    #[inline]
    pub const fn home_site(&self, num_sites: u32) -> SiteId {
        SiteId(1 + self.0 % num_sites)
    }

    /// Whether `site` holds a copy of this variable.
    #[inline]
    pub fn is_stored_at(&self, site: SiteId, num_sites: u32) -> bool {
        self.is_replicated() || self.home_site(num_sites) == site
    }

    /// Value every copy holds before any transaction runs.
    #[inline]
    pub const fn initial_value(&self) -> Value {
        10 * self.0 as Value
    }
}

impl fmt::Display for VariableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "x{}", self.0)
    }
}

impl FromStr for VariableId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.strip_prefix('x')
            .and_then(|n| n.parse().ok())
            .and_then(Self::new)
            .ok_or_else(|| IdError::InvalidVariable(s.to_string()))
    }
}
