//! # Trading System Memory Subsystem
//!
//! A low-latency memory subsystem for trading systems: a hierarchy of
//! fixed-size pool allocators, domain-specific allocators built on top
//! (market data, order book, transactions), and a trading coordinator that
//! composes them under a lifecycle state machine with transactional
//! guarantees.
//!
//! ## Key Features
//!
//! - **Lock-Free Pool Allocator**: [`memory::FixedPool`] is a Treiber-stack
//!   free list over a contiguous, cache-line-aligned arena — `allocate`/
//!   `deallocate` never block.
//! - **Size-Class Dispatch**: [`memory::SizedAllocator`] routes requests to
//!   one power-of-two `FixedPool` per size class, bypassing to the system
//!   allocator above the largest class.
//! - **Allocation Tracking**: [`memory::Tracker`] maintains a process-wide,
//!   explicitly-shared ledger of active allocations for leak detection,
//!   compiled away entirely when the `memory-tracking` feature is off.
//! - **Order-Book Graph Allocator**: [`memory::OrderBookAllocator`] threads a
//!   doubly-linked `Order`/`PriceLevel` graph over two arena slabs, addressed
//!   by `Copy` handles rather than raw pointers.
//! - **Batched Transactions**: [`memory::TransactionAllocator`] packs
//!   transaction nodes into batches with commit/rollback/end lifecycle.
//! - **Trading Coordinator**: [`memory::TradingCoordinator`] composes all of
//!   the above behind a `Starting → Running ⇄ Paused → Stopping` lifecycle,
//!   per-thread transactions, and running-average/peak latency metrics.
//!
//! ## Scope
//!
//! This crate allocates and threads memory structures; it does not implement
//! matching-engine semantics, durable persistence, crash recovery, or
//! price-time priority ordering across price levels — those are the
//! responsibility of a higher layer built on top of the handles this crate
//! hands out.

pub mod memory;

pub mod prelude;
