//! Correlation id allocation.
//!
//! MQTT packet identifiers are non-zero 16-bit values. [MQTT-2.3.1-2] A
//! client MUST assign a currently unused identifier to each new SUBSCRIBE,
//! UNSUBSCRIBE or QoS > 0 PUBLISH. Ids wrap around and skip any id whose
//! acknowledgement is still outstanding.

const WORDS: usize = (u16::MAX as usize + 1) / 64;

/// Hands out packet identifiers and tracks which are in flight.
pub struct PacketIdAllocator {
    next_id: u16,
    in_use: Box<[u64; WORDS]>,
    in_use_count: usize,
}

impl Default for PacketIdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for PacketIdAllocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PacketIdAllocator")
            .field("next_id", &self.next_id)
            .field("in_use_count", &self.in_use_count)
            .finish()
    }
}

impl PacketIdAllocator {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            in_use: Box::new([0; WORDS]),
            in_use_count: 0,
        }
    }

    /// Allocate the next free id, or `None` when all 65535 are in flight.
    pub fn allocate(&mut self) -> Option<u16> {
        if self.in_use_count == u16::MAX as usize {
            return None;
        }
        loop {
            let id = self.next_id;
            self.next_id = match self.next_id.wrapping_add(1) {
                0 => 1,
                n => n,
            };
            if !self.is_in_use(id) {
                self.set(id, true);
                return Some(id);
            }
        }
    }

    /// Mark an id as free once its acknowledgement arrived.
    pub fn release(&mut self, id: u16) {
        if self.is_in_use(id) {
            self.set(id, false);
        }
    }

    pub fn is_in_use(&self, id: u16) -> bool {
        let (word, bit) = Self::slot(id);
        self.in_use[word] & bit != 0
    }

    pub fn in_use_count(&self) -> usize {
        self.in_use_count
    }

    /// Forget every in-flight id (used when a clean session reconnects).
    pub fn clear(&mut self) {
        self.in_use.fill(0);
        self.in_use_count = 0;
        self.next_id = 1;
    }

    fn slot(id: u16) -> (usize, u64) {
        (id as usize / 64, 1u64 << (id % 64))
    }

    fn set(&mut self, id: u16, used: bool) {
        let (word, bit) = Self::slot(id);
        if used {
            self.in_use[word] |= bit;
            self.in_use_count += 1;
        } else {
            self.in_use[word] &= !bit;
            self.in_use_count -= 1;
        }
    }
}
