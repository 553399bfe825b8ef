//! Allocates `Order` and `PriceLevel` graph nodes; maintains a string-keyed
//! order index; threads the doubly-linked price-level graph.

use crate::memory::error::ConfigError;
use crate::memory::slab::Slab;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Handle to an arena-owned `Order` node. Never a raw pointer (DESIGN.md,
/// "Cyclic ownership").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OrderRef(u32);

/// Handle to an arena-owned `PriceLevel` node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PriceLevelRef(u32);

struct OrderNode {
    price: f64,
    quantity: f64,
    id: String,
    next: Option<OrderRef>,
    prev: Option<OrderRef>,
    parent: Option<PriceLevelRef>,
    #[allow(dead_code)]
    tail: Vec<u8>,
}

struct PriceLevelNode {
    #[allow(dead_code)]
    price: f64,
    total_quantity: f64,
    order_count: usize,
    first: Option<OrderRef>,
    last: Option<OrderRef>,
}

/// Configuration for an [`OrderBookAllocator`]. All counts must be non-zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBookConfig {
    /// Maximum number of live orders.
    pub max_orders: usize,
    /// Maximum number of live price levels.
    pub max_price_levels: usize,
    /// Size in bytes of each order's opaque tail payload.
    pub order_data_size: usize,
    /// Whether `deallocate_order`/linking operations bump `order_modifications`.
    pub track_modifications: bool,
}

impl Default for OrderBookConfig {
    fn default() -> Self {
        OrderBookConfig {
            max_orders: 100_000,
            max_price_levels: 10_000,
            order_data_size: 128,
            track_modifications: true,
        }
    }
}

impl OrderBookConfig {
    /// Validates that both capacity fields are non-zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_orders == 0 {
            return Err(ConfigError::zero("max_orders"));
        }
        if self.max_price_levels == 0 {
            return Err(ConfigError::zero("max_price_levels"));
        }
        Ok(())
    }
}

/// Occupancy/usage snapshot returned by [`OrderBookAllocator::stats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OrderBookStats {
    /// Currently live orders.
    pub active_orders: usize,
    /// Currently live price levels.
    pub active_price_levels: usize,
    /// Approximate bytes in use (`order_data_size` per order plus a fixed
    /// per-level overhead).
    pub total_memory_used: usize,
    /// Remaining order slots before [`OrderBookAllocator::allocate_order`]
    /// starts returning `None`.
    pub available_order_slots: usize,
    /// Remaining price-level slots.
    pub available_price_slots: usize,
    /// Count of structural mutations (links/unlinks), if configured to track.
    pub order_modifications: usize,
    /// High-water mark of `active_orders`.
    pub peak_orders: usize,
    /// High-water mark of `total_memory_used`.
    pub peak_memory: usize,
}

const PRICE_LEVEL_OVERHEAD: usize = std::mem::size_of::<f64>() * 2 + std::mem::size_of::<usize>();

/// Allocates and links `Order`/`PriceLevel` nodes over two fixed-capacity
/// arena slabs. Every mutating method (`allocate_*`, `deallocate_*`,
/// `register_order`, `unregister_order`) takes `&mut self`: the coordinator
/// is expected to hold a single `Mutex<OrderBookAllocator>` around the whole
/// graph, matching both the order-map mutex and the book mutex named in
/// SPEC_FULL.md §5 (see "Rust lock granularity" there for why these collapse
/// to one lock). Read-only queries (`find_order`, `stats`, `has_capacity`)
/// take `&self`.
pub struct OrderBookAllocator {
    config: OrderBookConfig,
    orders: Slab<OrderNode>,
    levels: Slab<PriceLevelNode>,
    order_map: HashMap<String, OrderRef>,
    peak_orders: usize,
    peak_memory: usize,
    order_modifications: usize,
}

impl OrderBookAllocator {
    /// Builds an `OrderBookAllocator`, failing if either capacity is zero.
    pub fn new(config: OrderBookConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(OrderBookAllocator {
            orders: Slab::with_capacity(config.max_orders),
            levels: Slab::with_capacity(config.max_price_levels),
            order_map: HashMap::new(),
            peak_orders: 0,
            peak_memory: 0,
            order_modifications: 0,
            config,
        })
    }

    /// Allocates a zero-initialized order (`price=0, quantity=0, id=""`), or
    /// `None` if `active_orders == max_orders`.
    pub fn allocate_order(&mut self) -> Option<OrderRef> {
        let idx = self.orders.try_insert(OrderNode {
            price: 0.0,
            quantity: 0.0,
            id: String::new(),
            next: None,
            prev: None,
            parent: None,
            tail: vec![0u8; self.config.order_data_size],
        })?;
        self.peak_orders = self.peak_orders.max(self.orders.len());
        self.bump_peak_memory();
        Some(OrderRef(idx))
    }

    /// Sets an order's price/quantity fields directly (used by
    /// `submit_order`/`modify_order` before/after linking).
    pub fn set_order_fields(&mut self, order: OrderRef, price: f64, quantity: f64) {
        if let Some(node) = self.orders.get_mut(order.0) {
            node.price = price;
            node.quantity = quantity;
        }
    }

    /// Reads back an order's `(price, quantity)`.
    pub fn order_fields(&self, order: OrderRef) -> Option<(f64, f64)> {
        self.orders.get(order.0).map(|n| (n.price, n.quantity))
    }

    /// Reads back the price level `order` is currently linked into, if any.
    pub fn order_parent(&self, order: OrderRef) -> Option<PriceLevelRef> {
        self.orders.get(order.0).and_then(|n| n.parent)
    }

    /// Deallocates an order: idempotent if already freed. Unlinks from its
    /// parent level (if any) and from its sibling chain, clears `id`,
    /// decrements `active_orders`.
    pub fn deallocate_order(&mut self, order: OrderRef) {
        if let Some(parent) = self.orders.get(order.0).and_then(|n| n.parent) {
            self.remove_order_from_level(parent, order);
        }
        self.orders.remove(order.0);
    }

    /// Allocates an empty price level, or `None` at capacity.
    pub fn allocate_price_level(&mut self, price: f64) -> Option<PriceLevelRef> {
        let idx = self.levels.try_insert(PriceLevelNode {
            price,
            total_quantity: 0.0,
            order_count: 0,
            first: None,
            last: None,
        })?;
        self.bump_peak_memory();
        Some(PriceLevelRef(idx))
    }

    /// Deallocates a price level, first deallocating every order still
    /// linked into it so no dangling reference can remain.
    pub fn deallocate_price_level(&mut self, level: PriceLevelRef) {
        let mut cursor = self.levels.get(level.0).and_then(|l| l.first);
        while let Some(order) = cursor {
            cursor = self.orders.get(order.0).and_then(|n| n.next);
            self.orders.remove(order.0);
        }
        self.levels.remove(level.0);
    }

    /// Inserts `order` at the tail of `level`'s list (§Linking protocol).
    pub fn insert_order_at_level(&mut self, level: PriceLevelRef, order: OrderRef) {
        let quantity = match self.orders.get(order.0) {
            Some(n) => n.quantity,
            None => return,
        };
        if let Some(node) = self.orders.get_mut(order.0) {
            node.parent = Some(level);
        }

        let old_last = match self.levels.get_mut(level.0) {
            Some(l) => {
                let old_last = l.last;
                if l.order_count == 0 {
                    l.first = Some(order);
                }
                l.last = Some(order);
                l.order_count += 1;
                l.total_quantity += quantity;
                old_last
            }
            None => return,
        };

        if let Some(prev) = old_last {
            if let Some(prev_node) = self.orders.get_mut(prev.0) {
                prev_node.next = Some(order);
            }
        }
        if let Some(node) = self.orders.get_mut(order.0) {
            node.prev = old_last;
        }
        self.note_modification();
    }

    /// Removes `order` from `level`'s list (§Linking protocol).
    pub fn remove_order_from_level(&mut self, level: PriceLevelRef, order: OrderRef) {
        let (prev, next, quantity) = match self.orders.get(order.0) {
            Some(n) => (n.prev, n.next, n.quantity),
            None => return,
        };

        if let Some(l) = self.levels.get_mut(level.0) {
            if l.first == Some(order) {
                l.first = next;
            }
            if l.last == Some(order) {
                l.last = prev;
            }
            l.order_count = l.order_count.saturating_sub(1);
            l.total_quantity -= quantity;
        }

        if let Some(p) = prev {
            if let Some(n) = self.orders.get_mut(p.0) {
                n.next = next;
            }
        }
        if let Some(n) = next {
            if let Some(nn) = self.orders.get_mut(n.0) {
                nn.prev = prev;
            }
        }
        if let Some(node) = self.orders.get_mut(order.0) {
            node.prev = None;
            node.next = None;
            node.parent = None;
        }
        self.note_modification();
    }

    fn note_modification(&mut self) {
        if self.config.track_modifications {
            self.order_modifications += 1;
        }
    }

    fn bump_peak_memory(&mut self) {
        let current = self.orders.len() * self.config.order_data_size
            + self.levels.len() * PRICE_LEVEL_OVERHEAD;
        self.peak_memory = self.peak_memory.max(current);
    }

    /// Sets `order.id`, inserting the reverse lookup entry.
    pub fn register_order(&mut self, id: impl Into<String>, order: OrderRef) {
        let id = id.into();
        if let Some(node) = self.orders.get_mut(order.0) {
            node.id = id.clone();
        }
        self.order_map.insert(id, order);
    }

    /// Removes the reverse lookup entry for `id` (does not deallocate the
    /// order itself).
    pub fn unregister_order(&mut self, id: &str) {
        self.order_map.remove(id);
    }

    /// Looks up the order registered under `id`.
    pub fn find_order(&self, id: &str) -> Option<OrderRef> {
        self.order_map.get(id).copied()
    }

    /// Drains the lookup map and every order/price level; zeroes counters.
    pub fn reset(&mut self) {
        self.order_map.clear();
        self.orders.clear();
        self.levels.clear();
        self.peak_orders = 0;
        self.peak_memory = 0;
        self.order_modifications = 0;
    }

    /// Occupancy/usage snapshot.
    pub fn stats(&self) -> OrderBookStats {
        let total_memory_used =
            self.orders.len() * self.config.order_data_size + self.levels.len() * PRICE_LEVEL_OVERHEAD;
        OrderBookStats {
            active_orders: self.orders.len(),
            active_price_levels: self.levels.len(),
            total_memory_used,
            available_order_slots: self.orders.remaining(),
            available_price_slots: self.levels.remaining(),
            order_modifications: self.order_modifications,
            peak_orders: self.peak_orders,
            peak_memory: self.peak_memory,
        }
    }

    /// True iff both order and price-level capacity remain.
    pub fn has_capacity(&self) -> bool {
        self.orders.remaining() > 0 && self.levels.remaining() > 0
    }
}

impl Drop for OrderBookAllocator {
    fn drop(&mut self) {
        if !self.orders.is_empty() || !self.levels.is_empty() {
            tracing::warn!(
                active_orders = self.orders.len(),
                active_price_levels = self.levels.len(),
                "OrderBookAllocator dropped without draining the graph"
            );
        }
        self.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn s3_allocate_register_find() {
        let mut book = OrderBookAllocator::new(OrderBookConfig::default()).unwrap();
        let order = book.allocate_order().unwrap();
        book.set_order_fields(order, 100.0, 10.0);
        book.register_order("A", order);
        assert_eq!(book.find_order("A"), Some(order));
        assert_eq!(book.stats().active_orders, 1);
    }

    #[test]
    fn s4_capacity_limits_are_enforced() {
        let mut book = OrderBookAllocator::new(OrderBookConfig {
            max_orders: 5,
            max_price_levels: 2,
            ..OrderBookConfig::default()
        })
        .unwrap();

        let orders_allocated = (0..7).filter(|_| book.allocate_order().is_some()).count();
        let levels_allocated = (0..4).filter(|_| book.allocate_price_level(1.0).is_some()).count();

        assert_eq!(orders_allocated, 5);
        assert_eq!(levels_allocated, 2);
    }

    #[test]
    fn linking_preserves_level_invariants() {
        let mut book = OrderBookAllocator::new(OrderBookConfig::default()).unwrap();
        let level = book.allocate_price_level(100.0).unwrap();
        let o1 = book.allocate_order().unwrap();
        let o2 = book.allocate_order().unwrap();
        book.set_order_fields(o1, 100.0, 5.0);
        book.set_order_fields(o2, 100.0, 7.0);
        book.insert_order_at_level(level, o1);
        book.insert_order_at_level(level, o2);

        let level_node = book.levels.get(level.0).unwrap();
        assert_eq!(level_node.order_count, 2);
        assert_eq!(level_node.total_quantity, 12.0);
        assert_eq!(level_node.first, Some(o1));
        assert_eq!(level_node.last, Some(o2));

        book.remove_order_from_level(level, o1);
        let level_node = book.levels.get(level.0).unwrap();
        assert_eq!(level_node.order_count, 1);
        assert_eq!(level_node.first, Some(o2));
        assert_eq!(level_node.total_quantity, 7.0);
        assert_eq!(book.orders.get(o1.0).unwrap().parent, None);
    }

    #[test]
    fn deallocating_a_level_drains_its_orders() {
        let mut book = OrderBookAllocator::new(OrderBookConfig::default()).unwrap();
        let level = book.allocate_price_level(100.0).unwrap();
        let o1 = book.allocate_order().unwrap();
        book.insert_order_at_level(level, o1);
        assert_eq!(book.stats().active_orders, 1);

        book.deallocate_price_level(level);
        assert_eq!(book.stats().active_orders, 0);
        assert_eq!(book.stats().active_price_levels, 0);
    }

    #[test]
    fn reset_is_idempotent_and_zeroes_counters() {
        let mut book = OrderBookAllocator::new(OrderBookConfig::default()).unwrap();
        let order = book.allocate_order().unwrap();
        book.register_order("A", order);
        book.reset();
        book.reset();
        assert_eq!(book.stats().active_orders, 0);
        assert_eq!(book.find_order("A"), None);
    }

    #[test]
    fn deallocate_order_clears_parent_link() {
        let mut book = OrderBookAllocator::new(OrderBookConfig::default()).unwrap();
        let level = book.allocate_price_level(1.0).unwrap();
        let order = book.allocate_order().unwrap();
        book.insert_order_at_level(level, order);
        book.deallocate_order(order);
        assert_eq!(book.levels.get(level.0).unwrap().order_count, 0);
        assert_eq!(book.stats().active_orders, 0);
    }
}
