//! Sparse byte-addressable memory used as the reference copy of a RAM.

use std::collections::BTreeMap;

/// Bytes never written read as zero, so only touched bytes take space.
#[derive(Debug, Clone, Default)]
pub struct ShadowMemory {
    bytes: BTreeMap<u64, u8>,
}

impl ShadowMemory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read_byte(&self, addr: u64) -> u8 {
        self.bytes.get(&addr).copied().unwrap_or(0)
    }

    pub fn write_byte(&mut self, addr: u64, value: u8) {
        self.bytes.insert(addr, value);
    }

    /// Little-endian value of the `len` bytes at `addr`, shifted up by
    /// `lane` bytes.
    pub fn read_lanes(&self, addr: u64, len: u64, lane: u64) -> u64 {
        (0..len).fold(0u64, |data, i| {
            data | (self.read_byte(addr + i) as u64) << (8 * (lane + i))
        })
    }

    /// Stores the `len` bytes of `data` starting at byte lane `lane` to `addr`.
    pub fn write_lanes(&mut self, addr: u64, len: u64, lane: u64, data: u64) {
        for i in 0..len {
            self.write_byte(addr + i, (data >> (8 * (lane + i))) as u8);
        }
    }

    /// Number of bytes ever written.
    pub fn touched(&self) -> usize {
        self.bytes.len()
    }
}
