//! Low-latency trading-system memory subsystem: a hierarchy of fixed-size
//! pool allocators, domain-specific allocators built on top of them, and a
//! trading coordinator composing all of it under a lifecycle state machine
//! with per-thread transactional guarantees.

pub mod book_allocator;
pub mod coordinator;
pub mod error;
pub mod fixed_pool;
pub mod market_data;
pub mod sized_allocator;
pub mod slab;
pub mod tracker;
pub mod transaction;

pub use book_allocator::{OrderBookAllocator, OrderBookConfig, OrderBookStats, OrderRef, PriceLevelRef};
pub use coordinator::{
    CoordinatorConfig, CoordinatorStats, Lifecycle, MarketDataMessage, OrderRequest, OrderSide,
    OrderUpdate, TradingCoordinator,
};
pub use error::{AllocError, ConfigError, CoordinatorError};
pub use fixed_pool::FixedPool;
pub use market_data::{MarketDataAllocator, MarketDataConfig, MarketDataStats};
pub use sized_allocator::{Buffer, PoolStat, SizedAllocator, MAX_BLOCK, MIN_BLOCK};
pub use slab::Slab;
pub use tracker::{AllocationRecord, MemoryStats, Tracker};
pub use transaction::{BatchRef, TransactionAllocator, TransactionConfig, TransactionStats, TxRef};
