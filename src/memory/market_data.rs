//! Fixed-capacity buffer supply for quote / trade / snapshot message streams.

use crate::memory::error::ConfigError;
use crate::memory::sized_allocator::{Buffer, SizedAllocator};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Configuration for a [`MarketDataAllocator`]. All fields must be non-zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketDataConfig {
    /// Bytes per quote message.
    pub quote_size: usize,
    /// Bytes per trade message.
    pub trade_size: usize,
    /// Bytes per snapshot message.
    pub snapshot_size: usize,
    /// Number of messages of each kind the allocator can hold at once.
    pub buffer_capacity: usize,
}

impl Default for MarketDataConfig {
    fn default() -> Self {
        MarketDataConfig {
            quote_size: 64,
            trade_size: 48,
            snapshot_size: 1024,
            buffer_capacity: 1000,
        }
    }
}

impl MarketDataConfig {
    /// Validates that every field is non-zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.quote_size == 0 {
            return Err(ConfigError::zero("quote_size"));
        }
        if self.trade_size == 0 {
            return Err(ConfigError::zero("trade_size"));
        }
        if self.snapshot_size == 0 {
            return Err(ConfigError::zero("snapshot_size"));
        }
        if self.buffer_capacity == 0 {
            return Err(ConfigError::zero("buffer_capacity"));
        }
        Ok(())
    }
}

/// Per-kind allocation counts and bytes, returned by [`MarketDataAllocator::stats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MarketDataStats {
    /// Quote buffers currently allocated.
    pub quote_count: usize,
    /// Trade buffers currently allocated.
    pub trade_count: usize,
    /// Snapshot buffers currently allocated.
    pub snapshot_count: usize,
    /// Sum of bytes across all three kinds.
    pub total_memory_used: usize,
}

/// Issues fixed-capacity buffers for quote / trade / snapshot streams, backed
/// by a [`SizedAllocator`]. Every method takes `&self`: the only mutable
/// state here is a handful of atomics plus the allocator's own internal
/// synchronization, so no external lock is needed around this type (see
/// SPEC_FULL.md §5, "Rust lock granularity").
pub struct MarketDataAllocator {
    config: MarketDataConfig,
    allocator: Arc<SizedAllocator>,
    quote_count: AtomicUsize,
    trade_count: AtomicUsize,
    snapshot_count: AtomicUsize,
}

impl MarketDataAllocator {
    /// Builds a `MarketDataAllocator`, failing if any config field is zero.
    pub fn new(
        config: MarketDataConfig,
        allocator: Arc<SizedAllocator>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(MarketDataAllocator {
            config,
            allocator,
            quote_count: AtomicUsize::new(0),
            trade_count: AtomicUsize::new(0),
            snapshot_count: AtomicUsize::new(0),
        })
    }

    fn alloc_kind(&self, kind_size: usize, counter: &AtomicUsize) -> Option<Buffer> {
        if counter.load(Ordering::Relaxed) >= self.config.buffer_capacity {
            return None;
        }
        let size = kind_size * self.config.buffer_capacity;
        let buf = self.allocator.allocate(size, file!(), line!()).ok()?;
        counter.fetch_add(1, Ordering::Relaxed);
        Some(buf)
    }

    /// Allocates a quote-stream buffer, or `None` at capacity.
    pub fn alloc_quote_buf(&self) -> Option<Buffer> {
        self.alloc_kind(self.config.quote_size, &self.quote_count)
    }

    /// Allocates a trade-stream buffer, or `None` at capacity.
    pub fn alloc_trade_buf(&self) -> Option<Buffer> {
        self.alloc_kind(self.config.trade_size, &self.trade_count)
    }

    /// Allocates a snapshot-stream buffer, or `None` at capacity.
    pub fn alloc_snapshot_buf(&self) -> Option<Buffer> {
        self.alloc_kind(self.config.snapshot_size, &self.snapshot_count)
    }

    /// Releases a buffer previously returned by one of the `alloc_*` methods.
    /// Categorizes by matching `buffer.len()` against one of the three
    /// per-kind products.
    pub fn dealloc_buf(&self, buffer: Buffer) {
        let cap = self.config.buffer_capacity;
        let len = buffer.len();
        if len == self.config.quote_size * cap {
            self.quote_count.fetch_sub(1, Ordering::Relaxed);
        } else if len == self.config.trade_size * cap {
            self.trade_count.fetch_sub(1, Ordering::Relaxed);
        } else if len == self.config.snapshot_size * cap {
            self.snapshot_count.fetch_sub(1, Ordering::Relaxed);
        }
        self.allocator.deallocate(buffer);
    }

    /// Per-kind counts and total bytes in use.
    pub fn stats(&self) -> MarketDataStats {
        let quote_count = self.quote_count.load(Ordering::Relaxed);
        let trade_count = self.trade_count.load(Ordering::Relaxed);
        let snapshot_count = self.snapshot_count.load(Ordering::Relaxed);
        let cap = self.config.buffer_capacity;
        let total_memory_used = quote_count * self.config.quote_size * cap
            + trade_count * self.config.trade_size * cap
            + snapshot_count * self.config.snapshot_size * cap;
        MarketDataStats {
            quote_count,
            trade_count,
            snapshot_count,
            total_memory_used,
        }
    }

    /// True iff none of the three per-kind counts has reached capacity.
    pub fn has_capacity(&self) -> bool {
        let cap = self.config.buffer_capacity;
        self.quote_count.load(Ordering::Relaxed) < cap
            && self.trade_count.load(Ordering::Relaxed) < cap
            && self.snapshot_count.load(Ordering::Relaxed) < cap
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::tracker::Tracker;

    fn allocator() -> MarketDataAllocator {
        let sized = Arc::new(SizedAllocator::with_defaults(Arc::new(Tracker::new())));
        MarketDataAllocator::new(MarketDataConfig::default(), sized).unwrap()
    }

    #[test]
    fn zero_field_config_fails_construction() {
        let sized = Arc::new(SizedAllocator::with_defaults(Arc::new(Tracker::new())));
        let mut config = MarketDataConfig::default();
        config.quote_size = 0;
        assert_eq!(
            MarketDataAllocator::new(config, sized).unwrap_err(),
            ConfigError::zero("quote_size")
        );
    }

    #[test]
    fn alloc_and_dealloc_round_trips_counts() {
        let a = allocator();
        let q = a.alloc_quote_buf().unwrap();
        assert_eq!(a.stats().quote_count, 1);
        a.dealloc_buf(q);
        assert_eq!(a.stats().quote_count, 0);
    }

    #[test]
    fn has_capacity_false_once_one_kind_exhausted() {
        let sized = Arc::new(SizedAllocator::with_defaults(Arc::new(Tracker::new())));
        let a = MarketDataAllocator::new(
            MarketDataConfig {
                quote_size: 8,
                trade_size: 8,
                snapshot_size: 8,
                buffer_capacity: 1,
            },
            sized,
        )
        .unwrap();
        assert!(a.has_capacity());
        let q = a.alloc_quote_buf().unwrap();
        assert!(!a.has_capacity());
        assert!(a.alloc_quote_buf().is_none());
        a.dealloc_buf(q);
        assert!(a.has_capacity());
    }
}
