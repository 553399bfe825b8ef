use mercury_memory::prelude::*;

#[test]
fn s1_allocate_32_and_64_then_deallocate_both() {
    let allocator = SizedAllocator::with_defaults(std::sync::Arc::new(Tracker::new()));
    let b32 = allocator.allocate(32, file!(), line!()).unwrap();
    let b64 = allocator.allocate(64, file!(), line!()).unwrap();
    allocator.deallocate(b32);
    allocator.deallocate(b64);

    let stats = allocator.memory_stats();
    assert_eq!(stats.current_in_use, 0);
    assert_eq!(stats.total_allocations, 2);
}

#[test]
fn s2_four_threads_mixed_ops_on_fixed_pool() {
    let pool = std::sync::Arc::new(FixedPool::new(64, 1000));
    std::thread::scope(|scope| {
        for _ in 0..4 {
            let pool = std::sync::Arc::clone(&pool);
            scope.spawn(move || {
                for _ in 0..250 {
                    if let Some(p) = pool.allocate() {
                        pool.deallocate(p);
                    }
                }
            });
        }
    });
    assert_eq!(pool.in_use(), 0);
    assert_eq!(pool.available(), 1000);
}

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
fn s5_begin_register_commit_end() {
    let mut txs = TransactionAllocator::new(TransactionConfig::default()).unwrap();
    let tx = txs.begin_transaction().unwrap();
    txs.register_transaction("T1", tx);
    assert!(txs.commit(tx));
    txs.end(tx);

    assert_eq!(txs.stats().active_transactions, 0);
    assert_eq!(txs.find_transaction("T1"), None);
}

#[test]
fn s6_coordinator_start_submit_stop() {
    let coordinator = TradingCoordinator::new(CoordinatorConfig::default()).unwrap();
    assert!(coordinator.start());

    let submitted = coordinator.submit_order(&OrderRequest {
        id: "O1".to_string(),
        symbol: "AAPL".to_string(),
        price: 150.0,
        quantity: 100.0,
        side: OrderSide::Buy,
    });
    assert!(submitted);
    assert_eq!(coordinator.stats().active_orders, 1);

    assert!(coordinator.stop());
    assert_eq!(coordinator.stats().active_orders, 0);
    assert_eq!(coordinator.status(), Lifecycle::Starting);
}
