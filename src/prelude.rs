//! Prelude module that re-exports commonly used types.
//!
//! This module provides a convenient way to import the most commonly used
//! types from the `mercury-memory` crate. Instead of importing each type
//! individually, you can use:
//!
//! ```rust
//! use mercury_memory::prelude::*;
//! ```

// Pool allocator
pub use crate::memory::{Buffer, FixedPool, PoolStat, SizedAllocator, MAX_BLOCK, MIN_BLOCK};

// Allocation tracking
pub use crate::memory::{AllocationRecord, MemoryStats, Tracker};

// Market data
pub use crate::memory::{MarketDataAllocator, MarketDataConfig, MarketDataStats};

// Order book graph
pub use crate::memory::{OrderBookAllocator, OrderBookConfig, OrderBookStats, OrderRef, PriceLevelRef};

// Transactions
pub use crate::memory::{BatchRef, TransactionAllocator, TransactionConfig, TransactionStats, TxRef};

// Trading coordinator
pub use crate::memory::{
    CoordinatorConfig, CoordinatorStats, Lifecycle, MarketDataMessage, OrderRequest, OrderSide,
    OrderUpdate, TradingCoordinator,
};

// Error types
pub use crate::memory::{AllocError, ConfigError, CoordinatorError};
