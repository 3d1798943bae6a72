//! Sector allocation tables.
//!
//! The FAT and the mini-FAT share one representation: an array indexed by sector number whose
//! slots hold the next sector of the owning chain, [`ENDOFCHAIN`], or one of the reserved markers.

use crate::error::{CfbError, ChainFault};
use crate::{ENDOFCHAIN, FREESECT, MAXREGSECT};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AllocationTable {
    next: Vec<u32>,
}

impl AllocationTable {
    /// A table of `len` free slots.
    pub fn with_len(len: usize) -> Self {
        Self {
            next: vec![FREESECT; len],
        }
    }

    /// Decode a table from concatenated little-endian slots. A trailing partial slot is ignored.
    pub fn from_le_bytes(bytes: &[u8]) -> Self {
        let next = bytes
            .chunks_exact(4)
            .map(|raw| u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
            .collect();
        Self { next }
    }

    pub fn len(&self) -> usize {
        self.next.len()
    }

    pub fn is_empty(&self) -> bool {
        self.next.is_empty()
    }

    pub fn get(&self, sector: u32) -> Option<u32> {
        self.next.get(sector as usize).copied()
    }

    pub fn as_slice(&self) -> &[u32] {
        &self.next
    }

    pub(crate) fn set(&mut self, sector: u32, value: u32) {
        self.next[sector as usize] = value;
    }

    /// Link `count` consecutive sectors starting at `start` into one terminated chain.
    pub(crate) fn link_run(&mut self, start: u32, count: u32) {
        for offset in 0..count {
            let sector = start + offset;
            let next = if offset + 1 < count {
                sector + 1
            } else {
                ENDOFCHAIN
            };
            self.set(sector, next);
        }
    }

    pub(crate) fn to_le_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.next.len() * 4);
        for slot in &self.next {
            out.extend_from_slice(&slot.to_le_bytes());
        }
        out
    }

    /// Follow the chain starting at `start` and return every sector it visits, in order.
    ///
    /// A chain that starts at [`ENDOFCHAIN`] is empty. Links past the end of the table, reserved
    /// markers in the middle of a chain, and chains longer than the table (which can only happen
    /// when they cycle) are reported as [`CfbError::BrokenChain`].
    pub fn chain(&self, start: u32, table: &'static str) -> Result<Vec<u32>, CfbError> {
        let broken = |reason| CfbError::BrokenChain {
            table,
            start,
            reason,
        };

        let mut sectors = Vec::new();
        let mut current = start;
        while current != ENDOFCHAIN {
            if current > MAXREGSECT {
                return Err(broken(ChainFault::UnexpectedMarker(current)));
            }
            let next = self
                .get(current)
                .ok_or(broken(ChainFault::OutOfRange(current)))?;
            if sectors.len() >= self.next.len() {
                return Err(broken(ChainFault::Cycle));
            }
            sectors.push(current);
            current = next;
        }
        Ok(sectors)
    }

    /// Number of slots holding `marker`.
    pub fn count_marker(&self, marker: u32) -> usize {
        self.next.iter().filter(|slot| **slot == marker).count()
    }
}
