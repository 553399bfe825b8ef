//! Lifecycle state machine composing the order-book, transaction, and
//! market-data allocators behind per-thread transactions and latency metrics.

use crate::memory::book_allocator::{OrderBookAllocator, OrderBookConfig};
use crate::memory::error::{ConfigError, CoordinatorError};
use crate::memory::market_data::{MarketDataAllocator, MarketDataConfig};
use crate::memory::sized_allocator::SizedAllocator;
use crate::memory::tracker::Tracker;
use crate::memory::transaction::{TransactionAllocator, TransactionConfig, TxRef};
use crossbeam::atomic::AtomicCell;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::ThreadId;
use std::time::Instant;

/// Coordinator lifecycle state (SPEC_FULL.md §4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    /// Initial / post-stop state. Only `start()` is legal from here.
    Starting,
    /// Accepting ingress. `pause()`/`stop()` are legal from here.
    Running,
    /// Suspended. `resume()`/`stop()` are legal from here.
    Paused,
    /// Transient state entered by `stop()` while draining; never observed
    /// outside the call that produced it — `stop()` settles into `Starting`
    /// before returning.
    Stopping,
    /// Terminal failure state. No transitions out.
    Error,
}

/// Buy/sell side of an [`OrderRequest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderSide {
    /// Buy order.
    Buy,
    /// Sell order.
    Sell,
}

/// A new order to submit.
#[derive(Debug, Clone)]
pub struct OrderRequest {
    /// Caller-assigned unique order id.
    pub id: String,
    /// Instrument symbol.
    pub symbol: String,
    /// Limit price; must be strictly positive.
    pub price: f64,
    /// Order quantity; must be strictly positive.
    pub quantity: f64,
    /// Buy or sell.
    pub side: OrderSide,
}

/// New price/quantity for [`TradingCoordinator::modify_order`].
#[derive(Debug, Clone, Copy)]
pub struct OrderUpdate {
    /// Replacement price.
    pub price: f64,
    /// Replacement quantity.
    pub quantity: f64,
}

/// A market-data event driving [`TradingCoordinator::handle_market_data`].
#[derive(Debug, Clone)]
pub struct MarketDataMessage {
    /// Instrument symbol the update concerns.
    pub symbol: String,
}

/// Configuration for a [`TradingCoordinator`]. All counts must be non-zero.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Sizes the internal `OrderBookAllocator` (SPEC_FULL.md §4.7 fix: this
    /// value is actually used, not shadowed by a hardcoded default).
    pub max_orders: usize,
    /// Upper bound on distinct symbols the coordinator is expected to serve.
    /// Validated at construction; tracking per-symbol state is out of scope
    /// (Non-goals, §1).
    pub max_symbols: usize,
    /// Buffer capacity handed to the internal `MarketDataAllocator`.
    pub market_data_size: usize,
    /// Whether `submit_order`/`cancel_order`/`modify_order` wrap themselves
    /// in a per-thread transaction.
    pub enable_transactions: bool,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        CoordinatorConfig {
            max_orders: 100_000,
            max_symbols: 10_000,
            market_data_size: 1_000,
            enable_transactions: true,
        }
    }
}

impl CoordinatorConfig {
    /// Validates that every count is non-zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_orders == 0 {
            return Err(ConfigError::zero("max_orders"));
        }
        if self.max_symbols == 0 {
            return Err(ConfigError::zero("max_symbols"));
        }
        if self.market_data_size == 0 {
            return Err(ConfigError::zero("market_data_size"));
        }
        Ok(())
    }
}

/// Snapshot returned by [`TradingCoordinator::stats`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoordinatorStats {
    /// Currently live orders in the book.
    pub active_orders: usize,
    /// Currently open per-thread transactions.
    pub pending_transactions: usize,
    /// Trades observed (always 0: matching-engine semantics are out of
    /// scope, §1 Non-goals — the field exists for parity with §3's data
    /// model and is wired for a future matching layer to increment).
    pub total_trades: usize,
    /// Sum of bytes in use across the order-book, transaction, and
    /// market-data allocators.
    pub memory_used: usize,
    /// Running average of ingress-operation latency, in microseconds.
    pub avg_latency_us: f64,
    /// High-water mark of ingress-operation latency, in microseconds.
    pub max_latency_us: f64,
    /// Orders submitted per second since construction.
    pub order_rate: f64,
    /// Trades per second since construction (always 0, see `total_trades`).
    pub trade_rate: f64,
}

#[derive(Default)]
struct MetricsInner {
    samples: usize,
    avg_latency_us: f64,
    order_count: usize,
    trade_count: usize,
}

impl MetricsInner {
    fn record_sample(&mut self, sample_us: f64) {
        self.samples += 1;
        self.avg_latency_us += (sample_us - self.avg_latency_us) / self.samples as f64;
    }
}

/// Composes [`OrderBookAllocator`], [`TransactionAllocator`], and
/// [`MarketDataAllocator`] under a lifecycle state machine, per-thread
/// transactions, and latency metrics.
///
/// Field order matters for `Drop`: transactions release before the order
/// book, which releases before market data, which releases before the
/// shared `SizedAllocator`/`Tracker` they were all built on (Rust drops
/// struct fields in declaration order).
pub struct TradingCoordinator {
    config: CoordinatorConfig,
    state: Mutex<Lifecycle>,
    thread_transactions: Mutex<HashMap<ThreadId, TxRef>>,
    transactions: Mutex<TransactionAllocator>,
    order_book: Mutex<OrderBookAllocator>,
    market_data: MarketDataAllocator,
    #[allow(dead_code)]
    sized: Arc<SizedAllocator>,
    #[allow(dead_code)]
    tracker: Arc<Tracker>,
    metrics: Mutex<MetricsInner>,
    max_latency_us: AtomicCell<f64>,
    created_at: Instant,
    active_orders: AtomicUsize,
}

impl TradingCoordinator {
    /// Builds a `TradingCoordinator` in the `Starting` state, wiring fresh
    /// `OrderBookAllocator`/`TransactionAllocator`/`MarketDataAllocator`
    /// instances over one shared `Tracker`.
    pub fn new(config: CoordinatorConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let tracker = Arc::new(Tracker::new());
        let sized = Arc::new(SizedAllocator::with_defaults(Arc::clone(&tracker)));

        let order_book = OrderBookAllocator::new(OrderBookConfig {
            max_orders: config.max_orders,
            ..OrderBookConfig::default()
        })?;
        let transactions = TransactionAllocator::new(TransactionConfig::default())
            .map_err(|_| ConfigError::zero("max_transactions"))?;
        let market_data = MarketDataAllocator::new(
            MarketDataConfig {
                buffer_capacity: config.market_data_size,
                ..MarketDataConfig::default()
            },
            Arc::clone(&sized),
        )?;

        tracing::info!(?config, "TradingCoordinator constructed");

        Ok(TradingCoordinator {
            config,
            state: Mutex::new(Lifecycle::Starting),
            thread_transactions: Mutex::new(HashMap::new()),
            transactions: Mutex::new(transactions),
            order_book: Mutex::new(order_book),
            market_data,
            sized,
            tracker,
            metrics: Mutex::new(MetricsInner::default()),
            max_latency_us: AtomicCell::new(0.0),
            created_at: Instant::now(),
            active_orders: AtomicUsize::new(0),
        })
    }

    fn state(&self) -> Lifecycle {
        *self.state.lock().unwrap()
    }

    fn is_running(&self) -> bool {
        self.state() == Lifecycle::Running
    }

    /// `Starting -> Running`. Returns `false` from any other state.
    pub fn start(&self) -> bool {
        let mut state = self.state.lock().unwrap();
        if *state != Lifecycle::Starting {
            return false;
        }
        tracing::info!(from = ?*state, to = ?Lifecycle::Running, "lifecycle transition");
        *state = Lifecycle::Running;
        true
    }

    /// `Running -> Paused`. Returns `false` from any other state.
    pub fn pause(&self) -> bool {
        let mut state = self.state.lock().unwrap();
        if *state != Lifecycle::Running {
            return false;
        }
        tracing::info!(from = ?*state, to = ?Lifecycle::Paused, "lifecycle transition");
        *state = Lifecycle::Paused;
        true
    }

    /// `Paused -> Running`. Returns `false` from any other state.
    pub fn resume(&self) -> bool {
        let mut state = self.state.lock().unwrap();
        if *state != Lifecycle::Paused {
            return false;
        }
        tracing::info!(from = ?*state, to = ?Lifecycle::Running, "lifecycle transition");
        *state = Lifecycle::Running;
        true
    }

    /// `Running|Paused -> Stopping -> Starting`: rolls back and ends every
    /// active per-thread transaction, clears metrics, and settles back into
    /// `Starting`. Returns `false` from any other state.
    pub fn stop(&self) -> bool {
        {
            let mut state = self.state.lock().unwrap();
            if *state != Lifecycle::Running && *state != Lifecycle::Paused {
                return false;
            }
            tracing::info!(from = ?*state, to = ?Lifecycle::Stopping, "lifecycle transition");
            *state = Lifecycle::Stopping;
        }

        let threads: Vec<ThreadId> = self.thread_transactions.lock().unwrap().keys().copied().collect();
        for thread in threads {
            self.rollback_internal(thread);
        }
        *self.metrics.lock().unwrap() = MetricsInner::default();
        self.max_latency_us.store(0.0);
        self.active_orders.store(0, Ordering::Relaxed);

        let mut state = self.state.lock().unwrap();
        tracing::info!(from = ?*state, to = ?Lifecycle::Starting, "lifecycle transition");
        *state = Lifecycle::Starting;
        true
    }

    fn record_latency(&self, sample_us: f64) {
        self.metrics.lock().unwrap().record_sample(sample_us);
        let mut current = self.max_latency_us.load();
        while sample_us > current {
            match self.max_latency_us.compare_exchange(current, sample_us) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }
    }

    fn begin_internal(&self) -> Option<TxRef> {
        let thread = std::thread::current().id();
        let mut map = self.thread_transactions.lock().unwrap();
        if map.contains_key(&thread) {
            return None;
        }
        let tx = self.transactions.lock().unwrap().begin_transaction()?;
        map.insert(thread, tx);
        Some(tx)
    }

    fn commit_internal(&self, thread: ThreadId) -> bool {
        let tx = match self.thread_transactions.lock().unwrap().remove(&thread) {
            Some(tx) => tx,
            None => return false,
        };
        let mut txs = self.transactions.lock().unwrap();
        let committed = txs.commit(tx);
        txs.end(tx);
        committed
    }

    fn rollback_internal(&self, thread: ThreadId) -> bool {
        let tx = match self.thread_transactions.lock().unwrap().remove(&thread) {
            Some(tx) => tx,
            None => return false,
        };
        let mut txs = self.transactions.lock().unwrap();
        let rolled_back = txs.rollback(tx);
        txs.end(tx);
        rolled_back
    }

    /// Begins a transaction for the calling thread. Fails (`false`) if the
    /// calling thread already has one open, or transaction capacity is
    /// exhausted (invariant 6, testable property §8).
    pub fn begin_transaction(&self) -> bool {
        self.begin_internal().is_some()
    }

    /// Resolves and fully ends (commit-and-release) the calling thread's
    /// transaction (SPEC_FULL.md §4.7's "Ambiguity — commit/rollback without
    /// transaction argument"). Returns `false` if the calling thread has no
    /// active transaction.
    pub fn commit_transaction(&self) -> bool {
        self.commit_internal(std::thread::current().id())
    }

    /// Resolves and fully ends (rollback-and-release) the calling thread's
    /// transaction. Returns `false` if the calling thread has no active
    /// transaction.
    pub fn rollback_transaction(&self) -> bool {
        self.rollback_internal(std::thread::current().id())
    }

    fn validate_order(req: &OrderRequest) -> Result<(), CoordinatorError> {
        if req.id.is_empty() || req.symbol.is_empty() {
            return Err(CoordinatorError::InvalidOrder {
                reason: "id and symbol must be non-empty",
            });
        }
        if req.price <= 0.0 {
            return Err(CoordinatorError::InvalidOrder {
                reason: "price must be positive",
            });
        }
        if req.quantity <= 0.0 {
            return Err(CoordinatorError::InvalidOrder {
                reason: "quantity must be positive",
            });
        }
        Ok(())
    }

    /// Submits a new order. Requires `Running`. Validates `req`, optionally
    /// opens a per-thread transaction, allocates and registers an order
    /// node, drives `update_order_book`, and commits. Any failure rolls
    /// back and deallocates the partially-built order; never a partial
    /// commit.
    pub fn submit_order(&self, req: &OrderRequest) -> bool {
        let start = Instant::now();
        if !self.is_running() || Self::validate_order(req).is_err() {
            return false;
        }

        let thread = std::thread::current().id();
        let began_tx = if self.config.enable_transactions {
            match self.begin_internal() {
                Some(_) => true,
                None => return false,
            }
        } else {
            false
        };

        let result = (|| -> bool {
            let mut book = self.order_book.lock().unwrap();
            let order = match book.allocate_order() {
                Some(o) => o,
                None => return false,
            };
            book.set_order_fields(order, req.price, req.quantity);
            book.register_order(req.id.clone(), order);
            drop(book);

            if !self.update_order_book(&req.symbol) {
                let mut book = self.order_book.lock().unwrap();
                book.unregister_order(&req.id);
                book.deallocate_order(order);
                return false;
            }
            true
        })();

        if began_tx {
            if result {
                self.commit_internal(thread);
            } else {
                self.rollback_internal(thread);
            }
        }

        if result {
            self.active_orders.fetch_add(1, Ordering::Relaxed);
            self.metrics.lock().unwrap().order_count += 1;
        }
        self.record_latency(start.elapsed().as_secs_f64() * 1_000_000.0);
        result
    }

    /// Cancels an order by id. Requires `Running`.
    pub fn cancel_order(&self, id: &str) -> bool {
        let start = Instant::now();
        if !self.is_running() {
            return false;
        }
        let thread = std::thread::current().id();
        let began_tx = if self.config.enable_transactions {
            match self.begin_internal() {
                Some(_) => true,
                None => return false,
            }
        } else {
            false
        };

        let result = (|| -> bool {
            let mut book = self.order_book.lock().unwrap();
            match book.find_order(id) {
                Some(order) => {
                    book.unregister_order(id);
                    book.deallocate_order(order);
                    true
                }
                None => false,
            }
        })();

        if began_tx {
            if result {
                self.commit_internal(thread);
            } else {
                self.rollback_internal(thread);
            }
        }
        if result {
            self.active_orders.fetch_sub(1, Ordering::Relaxed);
        }
        self.record_latency(start.elapsed().as_secs_f64() * 1_000_000.0);
        result
    }

    /// Modifies an order's price/quantity. Requires `Running`. If the price
    /// changed and the order is linked into a price level, unlinks it from
    /// that level (clearing its parent) without re-attaching it elsewhere —
    /// re-attachment is a higher-layer policy decision (price-time priority
    /// ordering is out of scope, §1 Non-goals).
    pub fn modify_order(&self, id: &str, update: OrderUpdate) -> bool {
        let start = Instant::now();
        if !self.is_running() {
            return false;
        }
        let thread = std::thread::current().id();
        let began_tx = if self.config.enable_transactions {
            match self.begin_internal() {
                Some(_) => true,
                None => return false,
            }
        } else {
            false
        };

        let result = (|| -> bool {
            let mut book = self.order_book.lock().unwrap();
            let order = match book.find_order(id) {
                Some(o) => o,
                None => return false,
            };
            let (old_price, _) = match book.order_fields(order) {
                Some(f) => f,
                None => return false,
            };
            book.set_order_fields(order, update.price, update.quantity);
            if update.price != old_price {
                if let Some(level) = book.order_parent(order) {
                    book.remove_order_from_level(level, order);
                }
            }
            true
        })();

        if began_tx {
            if result {
                self.commit_internal(thread);
            } else {
                self.rollback_internal(thread);
            }
        }
        self.record_latency(start.elapsed().as_secs_f64() * 1_000_000.0);
        result
    }

    /// Handles a market-data event. A no-op outside `Running`. Allocates a
    /// quote buffer (silently giving up if the allocator is exhausted),
    /// drives `update_order_book`, and records latency.
    pub fn handle_market_data(&self, data: &MarketDataMessage) {
        let start = Instant::now();
        if !self.is_running() {
            return;
        }
        if let Some(buf) = self.market_data.alloc_quote_buf() {
            self.update_order_book(&data.symbol);
            self.market_data.dealloc_buf(buf);
        }
        self.record_latency(start.elapsed().as_secs_f64() * 1_000_000.0);
    }

    /// Empty-symbol fails fast. Otherwise a latency-instrumented
    /// placeholder: actual book repopulation is external policy
    /// (SPEC_FULL.md §4.7).
    pub fn update_order_book(&self, symbol: &str) -> bool {
        if symbol.is_empty() {
            return false;
        }
        tracing::debug!(symbol, "update_order_book placeholder invoked");
        true
    }

    /// Valid in `Running` or `Paused`. Queries `has_capacity()` on all three
    /// composed allocators (forcing their stats current) and logs the
    /// result. Not a functioning compactor: none of the three allocators
    /// support moving live allocations yet.
    pub fn optimize_memory(&self) -> bool {
        let state = self.state();
        if state != Lifecycle::Running && state != Lifecycle::Paused {
            return false;
        }
        let book_ok = self.order_book.lock().unwrap().has_capacity();
        let tx_ok = self.transactions.lock().unwrap().has_capacity();
        let md_ok = self.market_data.has_capacity();
        tracing::debug!(book_ok, tx_ok, md_ok, "optimize_memory capacity check");
        true
    }

    /// Current lifecycle state.
    pub fn status(&self) -> Lifecycle {
        self.state()
    }

    /// `Running ∧ has_capacity() ∧ avg_latency_us < 1000.0`.
    pub fn is_healthy(&self) -> bool {
        self.is_running() && self.has_capacity() && self.metrics.lock().unwrap().avg_latency_us < 1000.0
    }

    /// True iff the order book, transaction allocator, and market-data
    /// allocator all report remaining capacity.
    pub fn has_capacity(&self) -> bool {
        self.order_book.lock().unwrap().has_capacity()
            && self.transactions.lock().unwrap().has_capacity()
            && self.market_data.has_capacity()
    }

    /// Aggregate stats across every composed allocator plus latency/rate
    /// metrics.
    pub fn stats(&self) -> CoordinatorStats {
        let book_stats = self.order_book.lock().unwrap().stats();
        let tx_stats = self.transactions.lock().unwrap().stats();
        let md_stats = self.market_data.stats();
        let metrics = self.metrics.lock().unwrap();
        let elapsed = self.created_at.elapsed().as_secs_f64().max(f64::EPSILON);

        CoordinatorStats {
            active_orders: self.active_orders.load(Ordering::Relaxed),
            pending_transactions: tx_stats.active_transactions,
            total_trades: metrics.trade_count,
            memory_used: book_stats.total_memory_used + tx_stats.total_memory_used + md_stats.total_memory_used,
            avg_latency_us: metrics.avg_latency_us,
            max_latency_us: self.max_latency_us.load(),
            order_rate: metrics.order_count as f64 / elapsed,
            trade_rate: metrics.trade_count as f64 / elapsed,
        }
    }
}

impl Drop for TradingCoordinator {
    fn drop(&mut self) {
        if self.is_running() || self.state() == Lifecycle::Paused {
            self.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(id: &str) -> OrderRequest {
        OrderRequest {
            id: id.to_string(),
            symbol: "AAPL".to_string(),
            price: 150.0,
            quantity: 100.0,
            side: OrderSide::Buy,
        }
    }

    #[test]
    fn s6_start_submit_stats_stop() {
        let coordinator = TradingCoordinator::new(CoordinatorConfig::default()).unwrap();
        assert!(coordinator.start());

        assert!(coordinator.submit_order(&request("O1")));
        assert_eq!(coordinator.stats().active_orders, 1);

        assert!(coordinator.stop());
        assert_eq!(coordinator.stats().active_orders, 0);
        assert_eq!(coordinator.status(), Lifecycle::Starting);
    }

    #[test]
    fn submit_order_while_not_running_fails() {
        let coordinator = TradingCoordinator::new(CoordinatorConfig::default()).unwrap();
        assert!(!coordinator.submit_order(&request("O1")));
    }

    #[test]
    fn illegal_transitions_are_rejected() {
        let coordinator = TradingCoordinator::new(CoordinatorConfig::default()).unwrap();
        assert!(!coordinator.pause());
        assert!(!coordinator.stop());
        assert!(coordinator.start());
        assert!(!coordinator.start());
        assert!(coordinator.pause());
        assert!(!coordinator.pause());
        assert!(coordinator.resume());
    }

    #[test]
    fn per_thread_transaction_uniqueness() {
        let coordinator = TradingCoordinator::new(CoordinatorConfig::default()).unwrap();
        coordinator.start();
        assert!(coordinator.begin_transaction());
        assert!(!coordinator.begin_transaction());
        assert!(coordinator.commit_transaction());
        assert!(coordinator.begin_transaction());
    }

    #[test]
    fn cancel_of_unknown_order_fails_without_partial_state() {
        let coordinator = TradingCoordinator::new(CoordinatorConfig::default()).unwrap();
        coordinator.start();
        assert!(!coordinator.cancel_order("missing"));
        assert_eq!(coordinator.stats().active_orders, 0);
    }

    #[test]
    fn modify_order_unlinks_on_price_change_without_relinking() {
        let coordinator = TradingCoordinator::new(CoordinatorConfig::default()).unwrap();
        coordinator.start();
        assert!(coordinator.submit_order(&request("O1")));
        assert!(coordinator.modify_order(
            "O1",
            OrderUpdate {
                price: 151.0,
                quantity: 50.0,
            }
        ));
    }

    #[test]
    fn health_requires_running_and_capacity() {
        let coordinator = TradingCoordinator::new(CoordinatorConfig::default()).unwrap();
        assert!(!coordinator.is_healthy());
        coordinator.start();
        assert!(coordinator.is_healthy());
    }
}
