//! Size-class pool manager: one [`FixedPool`] per power-of-two block size in
//! `[MIN_BLOCK, MAX_BLOCK]`, with a system-allocator bypass above that range.

use crate::memory::error::AllocError;
use crate::memory::fixed_pool::FixedPool;
use crate::memory::tracker::Tracker;
use std::alloc::Layout;
use std::sync::{Arc, Mutex};

/// Smallest block size a `SizedAllocator` will hand out via a pool.
pub const MIN_BLOCK: usize = 8;
/// Largest block size served from a pool; anything bigger bypasses to the
/// system allocator.
pub const MAX_BLOCK: usize = 4096;
/// Default block count for every size class's `FixedPool`.
pub const DEFAULT_POOL_SIZE: usize = 1024;

/// An owned allocation handed back by [`SizedAllocator::allocate`]. Carries
/// its own length so a caller can never mismatch the `size` a manual
/// `deallocate(ptr, size)` call would otherwise require by convention.
pub struct Buffer {
    ptr: std::ptr::NonNull<u8>,
    len: usize,
}

impl Buffer {
    /// Raw pointer to the first byte of the buffer.
    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    /// Size in bytes this buffer was allocated with.
    pub fn len(&self) -> usize {
        self.len
    }

    /// True when the buffer has zero length.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

struct SizeClass {
    block_size: usize,
    pool: FixedPool,
}

/// Per-class occupancy snapshot returned by [`SizedAllocator::pool_stats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStat {
    /// Block size of this class.
    pub block_size: usize,
    /// Blocks currently allocated.
    pub in_use: usize,
    /// Total blocks in this class.
    pub total: usize,
    /// `in_use * block_size`.
    pub bytes_used: usize,
}

/// Size-class pool manager. Dispatches fixed-size requests to the matching
/// [`FixedPool`]; requests larger than [`MAX_BLOCK`] go straight to the
/// system allocator. Every allocation/deallocation is mirrored into the
/// shared [`Tracker`].
pub struct SizedAllocator {
    classes: Vec<SizeClass>,
    selection_lock: Mutex<()>,
    tracker: Arc<Tracker>,
}

impl SizedAllocator {
    /// Builds a `SizedAllocator` with one [`FixedPool`] of `pool_size` blocks
    /// per power-of-two class from [`MIN_BLOCK`] to [`MAX_BLOCK`], wired to
    /// `tracker`.
    pub fn new(tracker: Arc<Tracker>, pool_size: usize) -> Self {
        let mut classes = Vec::new();
        let mut size = MIN_BLOCK;
        while size <= MAX_BLOCK {
            classes.push(SizeClass {
                block_size: size,
                pool: FixedPool::new(size, pool_size),
            });
            size *= 2;
        }
        SizedAllocator {
            classes,
            selection_lock: Mutex::new(()),
            tracker,
        }
    }

    /// Builds a `SizedAllocator` with the default pool size
    /// ([`DEFAULT_POOL_SIZE`] blocks per class).
    pub fn with_defaults(tracker: Arc<Tracker>) -> Self {
        Self::new(tracker, DEFAULT_POOL_SIZE)
    }

    fn class_index(rounded: usize) -> usize {
        rounded.trailing_zeros() as usize - MIN_BLOCK.trailing_zeros() as usize
    }

    /// Allocates `size` bytes. `size == 0` is treated as a `MIN_BLOCK`
    /// request; `size > MAX_BLOCK` bypasses to the system allocator (never
    /// raises [`AllocError`], per the boundary property in SPEC_FULL.md §8).
    pub fn allocate(
        &self,
        size: usize,
        file: &'static str,
        line: u32,
    ) -> Result<Buffer, AllocError> {
        let requested = size.max(1);
        if requested > MAX_BLOCK {
            let layout = Layout::from_size_align(requested, 1).expect("valid layout");
            // SAFETY: `layout` has non-zero size.
            let raw = unsafe { std::alloc::alloc(layout) };
            let ptr = std::ptr::NonNull::new(raw).ok_or(AllocError::OutOfMemory { requested })?;
            self.tracker.track_alloc(ptr.as_ptr() as usize, requested, file, line);
            return Ok(Buffer { ptr, len: requested });
        }

        let rounded = requested.next_power_of_two().max(MIN_BLOCK);
        let idx = Self::class_index(rounded);
        let _guard = self.selection_lock.lock().unwrap();
        let class = &self.classes[idx];
        let ptr = class
            .pool
            .allocate()
            .ok_or(AllocError::OutOfMemory { requested })?;
        drop(_guard);
        self.tracker.track_alloc(ptr.as_ptr() as usize, requested, file, line);
        Ok(Buffer { ptr, len: requested })
    }

    /// Releases a buffer previously returned by [`allocate`](Self::allocate).
    pub fn deallocate(&self, buffer: Buffer) {
        self.tracker.track_dealloc(buffer.ptr.as_ptr() as usize);
        if buffer.len > MAX_BLOCK {
            let layout = Layout::from_size_align(buffer.len, 1).expect("valid layout");
            // SAFETY: `buffer.ptr` was allocated with this exact layout in
            // `allocate`'s bypass path.
            unsafe { std::alloc::dealloc(buffer.ptr.as_ptr(), layout) };
            return;
        }
        let rounded = buffer.len.next_power_of_two().max(MIN_BLOCK);
        let idx = Self::class_index(rounded);
        let _guard = self.selection_lock.lock().unwrap();
        self.classes[idx].pool.deallocate(buffer.ptr);
    }

    /// Per-class occupancy snapshot.
    pub fn pool_stats(&self) -> Vec<PoolStat> {
        self.classes
            .iter()
            .map(|c| PoolStat {
                block_size: c.block_size,
                in_use: c.pool.in_use(),
                total: c.pool.capacity(),
                bytes_used: c.pool.in_use() * c.block_size,
            })
            .collect()
    }

    /// Tracker-wide memory stats (shared across every allocator wired to the
    /// same `Tracker`).
    pub fn memory_stats(&self) -> crate::memory::tracker::MemoryStats {
        self.tracker.stats()
    }

    /// Logs a leak report via the shared tracker.
    pub fn print_report(&self) {
        self.tracker.detect_leaks();
    }

    /// True if the tracker currently reports any active allocation.
    pub fn check_leaks(&self) -> bool {
        !self.tracker.active_records().is_empty()
    }

    /// Shared tracker handle, for allocators built on top of this one.
    pub fn tracker(&self) -> Arc<Tracker> {
        Arc::clone(&self.tracker)
    }
}

impl Drop for SizedAllocator {
    fn drop(&mut self) {
        if self.check_leaks() {
            tracing::warn!("SizedAllocator dropped with active allocations outstanding");
            self.print_report();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn allocator() -> SizedAllocator {
        SizedAllocator::with_defaults(Arc::new(Tracker::new()))
    }

    #[test]
    fn allocate_zero_is_treated_as_min_block() {
        let a = allocator();
        let buf = a.allocate(0, file!(), line!()).unwrap();
        assert_eq!(buf.len(), 1);
        let stat = a
            .pool_stats()
            .into_iter()
            .find(|s| s.block_size == MIN_BLOCK)
            .unwrap();
        assert_eq!(stat.in_use, 1);
        a.deallocate(buf);
    }

    #[test]
    fn allocate_above_max_bypasses_to_system_allocator() {
        let a = allocator();
        let buf = a.allocate(MAX_BLOCK + 1, file!(), line!()).unwrap();
        assert_eq!(buf.len(), MAX_BLOCK + 1);
        // No pool class should have absorbed this request.
        assert!(a.pool_stats().iter().all(|s| s.in_use == 0));
        a.deallocate(buf);
        assert_eq!(a.memory_stats().current_in_use, 0);
    }

    #[test]
    fn s1_allocate_32_and_64_then_deallocate_both() {
        let a = allocator();
        let b32 = a.allocate(32, file!(), line!()).unwrap();
        let b64 = a.allocate(64, file!(), line!()).unwrap();
        a.deallocate(b32);
        a.deallocate(b64);

        let stat32 = a.pool_stats().into_iter().find(|s| s.block_size == 32).unwrap();
        let stat64 = a.pool_stats().into_iter().find(|s| s.block_size == 64).unwrap();
        assert_eq!(stat32.in_use, 0);
        assert_eq!(stat64.in_use, 0);
        let stats = a.memory_stats();
        assert_eq!(stats.current_in_use, 0);
        assert_eq!(stats.total_allocations, 2);
    }

    #[test]
    fn allocate_deallocate_pair_leaves_pool_stats_unchanged() {
        let a = allocator();
        let before = a.pool_stats();
        let buf = a.allocate(100, file!(), line!()).unwrap();
        a.deallocate(buf);
        assert_eq!(a.pool_stats(), before);
    }
}
