//! Process-wide per-address allocation ledger.
//!
//! Unlike the original this subsystem is modeled on, the tracker is never a
//! hidden global: callers share one `Arc<Tracker>` by construction, or build
//! their own for test isolation (see DESIGN.md, "Singleton Tracker").

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

/// A single tracked allocation.
#[derive(Debug, Clone)]
pub struct AllocationRecord {
    /// Size in bytes of the allocation.
    pub size: usize,
    /// When the allocation was made.
    pub timestamp: Instant,
    /// Source file that requested the allocation.
    pub file: &'static str,
    /// Source line that requested the allocation.
    pub line: u32,
    /// Whether the matching deallocation has not yet been observed.
    pub active: bool,
}

/// Snapshot of the tracker's aggregate counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryStats {
    /// Total number of `track_alloc` calls ever made.
    pub total_allocations: usize,
    /// Number of allocations currently active.
    pub active_allocations: usize,
    /// Sum of sizes over every allocation ever made.
    pub total_bytes_allocated: usize,
    /// Sum of sizes over currently active allocations.
    pub current_in_use: usize,
    /// High-water mark of `current_in_use`.
    pub peak_in_use: usize,
    /// Largest single allocation ever tracked.
    pub largest_allocation: usize,
}

#[derive(Default)]
struct Counters {
    total_allocations: AtomicUsize,
    active_allocations: AtomicUsize,
    total_bytes_allocated: AtomicUsize,
    current_in_use: AtomicUsize,
    peak_in_use: AtomicUsize,
    largest_allocation: AtomicUsize,
}

/// Process-wide allocation ledger, shared via `Arc` rather than exposed as a
/// global (see DESIGN.md).
pub struct Tracker {
    records: Mutex<HashMap<usize, AllocationRecord>>,
    counters: Counters,
}

impl Default for Tracker {
    fn default() -> Self {
        Self::new()
    }
}

impl Tracker {
    /// Builds an empty tracker.
    pub fn new() -> Self {
        Tracker {
            records: Mutex::new(HashMap::new()),
            counters: Counters::default(),
        }
    }

    /// Records a new allocation at `addr`. Overwrites any stale record at the
    /// same address (the allocator that owns `addr` guarantees it is not
    /// already live).
    #[cfg(feature = "memory-tracking")]
    pub fn track_alloc(&self, addr: usize, size: usize, file: &'static str, line: u32) {
        let record = AllocationRecord {
            size,
            timestamp: Instant::now(),
            file,
            line,
            active: true,
        };
        self.records.lock().unwrap().insert(addr, record);

        self.counters.total_allocations.fetch_add(1, Ordering::Relaxed);
        self.counters.active_allocations.fetch_add(1, Ordering::Relaxed);
        self.counters
            .total_bytes_allocated
            .fetch_add(size, Ordering::Relaxed);
        let current = self.counters.current_in_use.fetch_add(size, Ordering::Relaxed) + size;
        bump_max(&self.counters.peak_in_use, current);
        bump_max(&self.counters.largest_allocation, size);
    }

    /// No-op when the `memory-tracking` feature is disabled (Invariant I5).
    #[cfg(not(feature = "memory-tracking"))]
    pub fn track_alloc(&self, _addr: usize, _size: usize, _file: &'static str, _line: u32) {}

    /// Flips an active record to inactive and updates aggregates. Ignores
    /// unknown or already-inactive addresses (defensive, per the
    /// Internal-structural error taxonomy).
    #[cfg(feature = "memory-tracking")]
    pub fn track_dealloc(&self, addr: usize) {
        let mut records = self.records.lock().unwrap();
        if let Some(record) = records.get_mut(&addr) {
            if record.active {
                record.active = false;
                self.counters.active_allocations.fetch_sub(1, Ordering::Relaxed);
                self.counters
                    .current_in_use
                    .fetch_sub(record.size, Ordering::Relaxed);
            }
        }
    }

    #[cfg(not(feature = "memory-tracking"))]
    pub fn track_dealloc(&self, _addr: usize) {}

    /// Snapshot of the aggregate counters.
    pub fn stats(&self) -> MemoryStats {
        MemoryStats {
            total_allocations: self.counters.total_allocations.load(Ordering::Relaxed),
            active_allocations: self.counters.active_allocations.load(Ordering::Relaxed),
            total_bytes_allocated: self.counters.total_bytes_allocated.load(Ordering::Relaxed),
            current_in_use: self.counters.current_in_use.load(Ordering::Relaxed),
            peak_in_use: self.counters.peak_in_use.load(Ordering::Relaxed),
            largest_allocation: self.counters.largest_allocation.load(Ordering::Relaxed),
        }
    }

    /// Copy of every currently-active record.
    pub fn active_records(&self) -> Vec<AllocationRecord> {
        self.records
            .lock()
            .unwrap()
            .values()
            .filter(|r| r.active)
            .cloned()
            .collect()
    }

    /// Logs every active record via `tracing::warn!`.
    pub fn detect_leaks(&self) {
        for record in self.active_records() {
            tracing::warn!(
                size = record.size,
                file = record.file,
                line = record.line,
                "leaked allocation"
            );
        }
    }

    /// Clears every record and zeroes the aggregate counters.
    pub fn reset(&self) {
        self.records.lock().unwrap().clear();
        self.counters.total_allocations.store(0, Ordering::Relaxed);
        self.counters.active_allocations.store(0, Ordering::Relaxed);
        self.counters.total_bytes_allocated.store(0, Ordering::Relaxed);
        self.counters.current_in_use.store(0, Ordering::Relaxed);
        self.counters.peak_in_use.store(0, Ordering::Relaxed);
        self.counters.largest_allocation.store(0, Ordering::Relaxed);
    }
}

fn bump_max(counter: &AtomicUsize, value: usize) {
    let mut current = counter.load(Ordering::Relaxed);
    while value > current {
        match counter.compare_exchange_weak(current, value, Ordering::Relaxed, Ordering::Relaxed) {
            Ok(_) => break,
            Err(actual) => current = actual,
        }
    }
}
