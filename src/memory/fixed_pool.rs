//! Lock-free pool of equal-sized blocks over a contiguous arena.
//!
//! Each block is either on the free-list (reachable from `head`) or marked
//! allocated; never both, never neither (Invariant I1). The free-list is a
//! classic Treiber stack: `allocate` pops, `deallocate` pushes, both via a
//! CAS loop on `head`.

use std::sync::atomic::{AtomicBool, AtomicPtr, AtomicUsize, Ordering};

const CACHE_LINE: usize = 64;

/// Header preceding every block's payload. Padded to a cache line so that two
/// adjacent blocks never share a line (false sharing would otherwise make the
/// CAS loop on one block's `next` contend with an unrelated block's
/// `allocated` flag).
#[repr(C, align(64))]
struct BlockHeader {
    next: AtomicPtr<Block>,
    allocated: AtomicBool,
}

#[repr(C, align(64))]
struct Block {
    header: BlockHeader,
    payload: std::cell::UnsafeCell<[u8; 0]>,
}

/// A lock-free pool of `block_size`-byte blocks.
///
/// `FixedPool` is move-only (by Rust default — it contains no `Clone`) and is
/// not itself `Sync` by accident: the free-list is entirely managed through
/// atomics, so concurrent `allocate`/`deallocate` from many threads is sound.
pub struct FixedPool {
    arena: std::ptr::NonNull<u8>,
    layout: std::alloc::Layout,
    block_size: usize,
    stride: usize,
    count: usize,
    head: AtomicPtr<Block>,
    in_use: AtomicUsize,
}

// SAFETY: all mutable state reachable from `&FixedPool` is behind atomics;
// the arena itself is only ever touched through blocks handed out one at a
// time by the free-list, so no two callers ever alias the same payload.
unsafe impl Send for FixedPool {}
unsafe impl Sync for FixedPool {}

impl FixedPool {
    /// Builds a pool of `count` blocks, each holding `block_size` payload
    /// bytes, plus a cache-line-aligned header.
    pub fn new(block_size: usize, count: usize) -> Self {
        let header_size = std::mem::size_of::<BlockHeader>();
        let stride = round_up(header_size + block_size, CACHE_LINE);
        let arena_len = (stride * count.max(1)).max(CACHE_LINE);
        // Arena must start at a cache-line boundary: every block header is
        // `repr(align(64))`, and writing through a pointer that isn't
        // aligned for its pointee type is UB even if the bytes underneath
        // are otherwise valid. A plain `Vec<u8>` only guarantees the
        // allocator's default alignment, so we allocate by hand.
        let layout = std::alloc::Layout::from_size_align(arena_len, CACHE_LINE)
            .expect("arena layout is always valid for reasonable block sizes/counts");
        // SAFETY: `layout` has non-zero size (enforced by the `.max` above).
        let raw = unsafe { std::alloc::alloc_zeroed(layout) };
        let arena = std::ptr::NonNull::new(raw).unwrap_or_else(|| std::alloc::handle_alloc_error(layout));

        let base = arena.as_ptr();
        // SAFETY: each offset `i * stride` lies within `arena_len` bytes of
        // `base` by construction; `Block` is `repr(C)` so the header sits at
        // offset 0 of each slot, and `base` is cache-line aligned so every
        // `stride`-multiple offset is too.
        unsafe {
            for i in 0..count {
                let block_ptr = base.add(i * stride) as *mut Block;
                let next = if i + 1 < count {
                    base.add((i + 1) * stride) as *mut Block
                } else {
                    std::ptr::null_mut()
                };
                std::ptr::write(&raw mut (*block_ptr).header.next, AtomicPtr::new(next));
                std::ptr::write(
                    &raw mut (*block_ptr).header.allocated,
                    AtomicBool::new(false),
                );
            }
        }

        let head = if count == 0 {
            std::ptr::null_mut()
        } else {
            base as *mut Block
        };

        FixedPool {
            arena,
            layout,
            block_size,
            stride,
            count,
            head: AtomicPtr::new(head),
            in_use: AtomicUsize::new(0),
        }
    }

    /// Pops the head of the free-list and returns its payload pointer, or
    /// `None` if the pool is exhausted.
    pub fn allocate(&self) -> Option<std::ptr::NonNull<u8>> {
        loop {
            let h = self.head.load(Ordering::Acquire);
            if h.is_null() {
                return None;
            }
            // SAFETY: `h` came from the free-list, so it points at a live
            // block inside `self.arena`.
            let next = unsafe { (*h).header.next.load(Ordering::Acquire) };
            if self
                .head
                .compare_exchange_weak(h, next, Ordering::Release, Ordering::Relaxed)
                .is_ok()
            {
                // SAFETY: same as above; we now own this block exclusively
                // until it is deallocated.
                unsafe {
                    (*h).header.allocated.store(true, Ordering::Release);
                }
                self.in_use.fetch_add(1, Ordering::Relaxed);
                let payload = (h as *mut u8).wrapping_add(std::mem::size_of::<BlockHeader>());
                return std::ptr::NonNull::new(payload);
            }
        }
    }

    /// Pushes the block owning `ptr` back onto the free-list. Pointers
    /// outside the arena are ignored (defensive, per the Internal-structural
    /// error taxonomy) instead of corrupting the free-list.
    pub fn deallocate(&self, ptr: std::ptr::NonNull<u8>) {
        let header_size = std::mem::size_of::<BlockHeader>();
        let block_ptr = unsafe { ptr.as_ptr().sub(header_size) } as *mut Block;

        let base = self.arena.as_ptr();
        let offset = (block_ptr as *mut u8 as usize).wrapping_sub(base as usize);
        if self.count == 0 || offset % self.stride != 0 || offset / self.stride >= self.count {
            return;
        }

        // SAFETY: `block_ptr` now checked to be one of our slots.
        unsafe {
            (*block_ptr).header.allocated.store(false, Ordering::Release);
        }
        loop {
            let h = self.head.load(Ordering::Acquire);
            // SAFETY: `block_ptr` is a valid slot, never concurrently freed
            // twice by a well-behaved caller (double-free is documented UB
            // at the allocator layer above, same as the system allocator).
            unsafe {
                (*block_ptr).header.next.store(h, Ordering::Release);
            }
            if self
                .head
                .compare_exchange_weak(h, block_ptr, Ordering::Release, Ordering::Relaxed)
                .is_ok()
            {
                self.in_use.fetch_sub(1, Ordering::Relaxed);
                return;
            }
        }
    }

    /// Number of blocks currently allocated.
    pub fn in_use(&self) -> usize {
        self.in_use.load(Ordering::Relaxed)
    }

    /// Number of blocks currently free.
    pub fn available(&self) -> usize {
        self.count - self.in_use()
    }

    /// Total block count this pool was constructed with.
    pub fn capacity(&self) -> usize {
        self.count
    }

    /// Payload size (excluding header) of every block in this pool.
    pub fn block_size(&self) -> usize {
        self.block_size
    }
}

impl Drop for FixedPool {
    fn drop(&mut self) {
        // Arena drop reclaims the whole region in one shot; we do not (and
        // per the pool's contract, must not need to) walk individual blocks.
        // SAFETY: `self.arena`/`self.layout` were produced together by
        // `alloc_zeroed` in `new` and never handed to another allocator.
        unsafe {
            std::alloc::dealloc(self.arena.as_ptr(), self.layout);
        }
    }
}

fn round_up(value: usize, multiple: usize) -> usize {
    value.div_ceil(multiple) * multiple
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn allocate_exhausts_then_recovers() {
        let pool = FixedPool::new(32, 4);
        assert_eq!(pool.available(), 4);

        let a = pool.allocate().unwrap();
        let b = pool.allocate().unwrap();
        let c = pool.allocate().unwrap();
        let d = pool.allocate().unwrap();
        assert!(pool.allocate().is_none());
        assert_eq!(pool.in_use(), 4);

        pool.deallocate(b);
        assert_eq!(pool.available(), 1);
        let e = pool.allocate().unwrap();
        assert_eq!(pool.in_use(), 4);

        pool.deallocate(a);
        pool.deallocate(c);
        pool.deallocate(d);
        pool.deallocate(e);
        assert_eq!(pool.in_use(), 0);
        assert_eq!(pool.available(), 4);
    }

    #[test]
    fn returned_pointers_lie_inside_the_arena() {
        let pool = FixedPool::new(16, 8);
        let mut ptrs = Vec::new();
        for _ in 0..8 {
            ptrs.push(pool.allocate().unwrap());
        }
        let base = pool.arena.as_ptr() as usize;
        let end = base + pool.layout.size();
        for p in &ptrs {
            let addr = p.as_ptr() as usize;
            assert!(addr >= base && addr < end);
        }
    }

    #[test]
    fn deallocate_null_ish_out_of_arena_pointer_is_ignored() {
        let pool = FixedPool::new(16, 2);
        let mut stray = [0u8; 16];
        let stray_ptr = std::ptr::NonNull::new(stray.as_mut_ptr()).unwrap();
        // Should not panic or corrupt the free-list.
        pool.deallocate(stray_ptr);
        assert_eq!(pool.in_use(), 0);
        assert_eq!(pool.available(), 2);
    }

    #[test]
    fn concurrent_allocate_deallocate_preserves_invariant() {
        let pool = Arc::new(FixedPool::new(64, 1000));
        std::thread::scope(|scope| {
            for _ in 0..4 {
                let pool = Arc::clone(&pool);
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
}
