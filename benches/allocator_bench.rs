use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use mercury_memory::memory::{
    FixedPool, OrderBookAllocator, OrderBookConfig, SizedAllocator, Tracker,
};
use std::hint::black_box;
use std::sync::Arc;

fn fixed_pool_allocate_deallocate(c: &mut Criterion) {
    let mut group = c.benchmark_group("FixedPool - allocate/deallocate pair");
    for &block_size in &[32usize, 64, 256] {
        group.bench_with_input(
            BenchmarkId::new("pair", block_size),
            &block_size,
            |b, &block_size| {
                let pool = FixedPool::new(block_size, 4096);
                b.iter(|| {
                    let ptr = black_box(pool.allocate().unwrap());
                    pool.deallocate(ptr);
                });
            },
        );
    }
    group.finish();
}

fn sized_allocator_allocate_deallocate(c: &mut Criterion) {
    let mut group = c.benchmark_group("SizedAllocator - allocate/deallocate pair");
    for &size in &[16usize, 128, 1024] {
        group.bench_with_input(BenchmarkId::new("pair", size), &size, |b, &size| {
            let allocator = SizedAllocator::with_defaults(Arc::new(Tracker::new()));
            b.iter(|| {
                let buf = black_box(allocator.allocate(size, file!(), line!()).unwrap());
                allocator.deallocate(buf);
            });
        });
    }
    group.finish();
}

fn order_book_churn(c: &mut Criterion) {
    let mut group = c.benchmark_group("OrderBookAllocator - order churn");
    for &order_count in &[100usize, 1_000, 10_000] {
        group.bench_with_input(
            BenchmarkId::new("allocate_register_deallocate", order_count),
            &order_count,
            |b, &count| {
                b.iter_with_setup(
                    || {
                        OrderBookAllocator::new(OrderBookConfig {
                            max_orders: count + 1,
                            ..OrderBookConfig::default()
                        })
                        .unwrap()
                    },
                    |mut book| {
                        let level = book.allocate_price_level(100.0).unwrap();
                        for i in 0..count {
                            let order = book.allocate_order().unwrap();
                            book.set_order_fields(order, 100.0, 10.0);
                            book.register_order(format!("O{i}"), order);
                            book.insert_order_at_level(level, order);
                        }
                        black_box(book.stats());
                    },
                );
            },
        );
    }
    group.finish();
}

criterion_group!(
    benches,
    fixed_pool_allocate_deallocate,
    sized_allocator_allocate_deallocate,
    order_book_churn
);
criterion_main!(benches);
