//! # Logical-Unit Table
//!
//! At most one request is outstanding per logical unit. The table records
//! which one, so a completion can be checked against what the driver
//! actually sent and an abort can tell whether its victim is still live.

use crate::ccb::CcbHandle;
use crate::request::{LunAddress, RequestTag, MAX_LUNS, MAX_PATHS, MAX_TARGETS};

const ENTRIES: usize = MAX_PATHS as usize * MAX_TARGETS as usize * MAX_LUNS as usize;

/// The request currently owning a logical unit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Outstanding {
    /// Request
    pub tag: RequestTag,
    /// Its CCB
    pub ccb: CcbHandle,
}

/// Per-LUN outstanding request
#[derive(Debug)]
pub struct LunTable {
    entries: [Option<Outstanding>; ENTRIES],
}

impl Default for LunTable {
    fn default() -> Self {
        Self::new()
    }
}

impl LunTable {
    /// Empty table
    pub const fn new() -> Self {
        Self { entries: [None; ENTRIES] }
    }

    fn slot(address: LunAddress) -> Option<usize> {
        address.is_valid().then(|| {
            (address.path as usize * MAX_TARGETS as usize + address.target as usize) * MAX_LUNS as usize
                + address.lun as usize
        })
    }

    /// Outstanding request on `address`
    pub fn current(&self, address: LunAddress) -> Option<Outstanding> {
        Self::slot(address).and_then(|i| self.entries[i])
    }

    /// Record `outstanding` on `address`
    pub fn set(&mut self, address: LunAddress, outstanding: Outstanding) {
        if let Some(i) = Self::slot(address) {
            self.entries[i] = Some(outstanding);
        }
    }

    /// Clear `address`, returning what was there
    pub fn clear(&mut self, address: LunAddress) -> Option<Outstanding> {
        Self::slot(address).and_then(|i| self.entries[i].take())
    }

    /// Clear `address` only if `ccb` owns it
    pub fn clear_if(&mut self, address: LunAddress, ccb: CcbHandle) -> Option<Outstanding> {
        match self.current(address) {
            Some(current) if current.ccb == ccb => self.clear(address),
            _ => None,
        }
    }

    /// Clear every entry
    pub fn clear_all(&mut self) {
        self.entries = [None; ENTRIES];
    }

    /// Number of busy logical units
    pub fn busy(&self) -> usize {
        self.entries.iter().filter(|e| e.is_some()).count()
    }
}
