//! Request sequence numbers.

/// Hands out sequence numbers for requests and batch members.
///
/// Values increase by one per allocation and wrap around at `u32::MAX`.
/// Zero is handed out like any other value; see
/// [`Filter`](crate::netlink::Filter) for how its replies are matched.
#[derive(Debug, Clone)]
pub struct SequenceAllocator {
    next: u32,
}

impl SequenceAllocator {
    /// Start at `seed`.
    pub fn new(seed: u32) -> Self {
        Self { next: seed }
    }

    /// Seed from the current UNIX time, truncated to 32 bits.
    pub fn from_time() -> Self {
        let secs = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        Self::new(secs as u32)
    }

    /// Return the current value and advance.
    pub fn allocate(&mut self) -> u32 {
        let seq = self.next;
        self.next = self.next.wrapping_add(1);
        seq
    }

    /// The value the next [`allocate`](Self::allocate) returns.
    pub fn peek(&self) -> u32 {
        self.next
    }
}

impl Default for SequenceAllocator {
    fn default() -> Self {
        Self::from_time()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strictly_increasing() {
        let mut seq = SequenceAllocator::new(100);
        let values: Vec<u32> = (0..1000).map(|_| seq.allocate()).collect();
        assert!(values.windows(2).all(|w| w[1] == w[0] + 1));
        assert_eq!(seq.peek(), 1100);
    }

    #[test]
    fn wraps_modulo_2_32() {
        let mut seq = SequenceAllocator::new(u32::MAX - 1);
        assert_eq!(seq.allocate(), u32::MAX - 1);
        assert_eq!(seq.allocate(), u32::MAX);
        assert_eq!(seq.allocate(), 0);
        assert_eq!(seq.allocate(), 1);
    }
}
