//! Chain registry: the discovered chain length.
//!
//! Discovery is the only writer. The codec validates targets against
//! [`ChainRegistry::current_count`]. The registry lives on the dispatcher's
//! worker task, so it needs no locking.

/// Known chain length and how many discoveries produced it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ChainRegistry {
    device_count: u16,
    discoveries: u32,
}

impl ChainRegistry {
    /// Empty registry (no devices known).
    pub const fn new() -> Self {
        Self {
            device_count: 0,
            discoveries: 0,
        }
    }

    /// Record the chain length reported by a completed discovery.
    pub fn record_discovery(&mut self, count: u16) {
        self.device_count = count;
        self.discoveries = self.discoveries.saturating_add(1);
    }

    /// Current chain length (`0` before discovery or after a reset).
    #[inline]
    pub const fn current_count(&self) -> u16 {
        self.device_count
    }

    /// Number of discoveries recorded since construction.
    #[inline]
    pub const fn discoveries(&self) -> u32 {
        self.discoveries
    }

    /// Forget the chain length (disconnect, transport failure, re-init).
    pub fn reset(&mut self) {
        self.device_count = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_empty() {
        let registry = ChainRegistry::new();
        assert_eq!(registry.current_count(), 0);
        assert_eq!(registry.discoveries(), 0);
    }

    #[test]
    fn discovery_sets_count() {
        let mut registry = ChainRegistry::new();
        registry.record_discovery(3);
        assert_eq!(registry.current_count(), 3);
        assert_eq!(registry.discoveries(), 1);

        registry.record_discovery(7);
        assert_eq!(registry.current_count(), 7);
    }

    #[test]
    fn reset_clears_count_but_keeps_discovery_tally() {
        let mut registry = ChainRegistry::new();
        registry.record_discovery(5);
        registry.reset();
        assert_eq!(registry.current_count(), 0);
        assert_eq!(registry.discoveries(), 1);

        registry.record_discovery(2);
        assert_eq!(registry.current_count(), 2);
        assert_eq!(registry.discoveries(), 2);
    }
}
