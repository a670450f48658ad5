use std::collections::BTreeMap;

/// Byte ranges `[addr, addr + len)` with a transfer in flight, by owner tag.
#[derive(Debug, Default)]
pub struct AddressReservations {
    ranges: BTreeMap<u64, (u64, u64)>,
}

impl AddressReservations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_free(&self, addr: u64, len: u64) -> bool {
        let end = addr + len;
        self.ranges.values().all(|&(a, l)| end <= a || a + l <= addr)
    }

    /// Refused when the range overlaps a reservation or the tag is taken.
    pub fn reserve(&mut self, tag: u64, addr: u64, len: u64) -> bool {
        if len == 0 || self.ranges.contains_key(&tag) || !self.is_free(addr, len) {
            return false;
        }
        self.ranges.insert(tag, (addr, len));
        true
    }

    pub fn release(&mut self, tag: u64) -> bool {
        self.ranges.remove(&tag).is_some()
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overlaps_are_refused_until_released() {
        let mut r = AddressReservations::new();
        assert!(r.reserve(1, 0x100, 0x40));
        assert!(!r.reserve(2, 0x13f, 1));
        assert!(r.reserve(2, 0x140, 0x10));
        assert!(!r.reserve(2, 0x0, 1));
        assert!(r.release(1));
        assert!(r.reserve(3, 0x13f, 1));
        assert_eq!(r.len(), 2);
        r.release(2);
        r.release(3);
        assert!(r.is_empty());
    }
}
