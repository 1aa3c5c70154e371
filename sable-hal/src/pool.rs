//! Best-fit sub-allocation over large device-memory blocks.
//!
//! [`BlockPool`] is the backend-independent part of every heap pool: it
//! tracks one free-chunk list per heap block, allocates by smallest waste,
//! splits the winning chunk in up to three pieces, and coalesces adjacent
//! free chunks on release. Creating and destroying the actual backend heaps
//! is the caller's job; the pool only hands out block indices and sizes.
//!
//! The chunk returned by [`BlockPool::allocate`] is owned by the caller and
//! is not represented in any free list until it comes back through
//! [`BlockPool::free`].

use sbt::PoolCategory;

use crate::DeviceError;

/// A leased range of one heap block.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HeapChunk {
    /// Index of the owning [`HeapEntry`] inside its pool. Stable for the
    /// pool's lifetime; entries are never removed.
    pub heap: usize,
    /// Byte offset inside the heap block.
    pub offset: u64,
    /// Byte size of the lease.
    pub size: u64,
}

/// One heap block and its free ranges, sorted by offset between
/// modifications.
#[derive(Debug)]
struct HeapEntry {
    size: u64,
    free_chunks: Vec<(u64, u64)>, // (offset, size)
}

/// Outcome of a [`BlockPool::try_allocate`] pass over the existing blocks.
#[derive(Debug, PartialEq, Eq)]
pub enum Placement {
    /// A chunk was carved out of an existing block.
    Existing(HeapChunk),
    /// No block fits; the caller must create a backend heap of this size,
    /// register it with [`BlockPool::add_heap`], and retry.
    NeedsHeap(u64),
}

/// The pure allocator state behind one category pool.
#[derive(Debug)]
pub struct BlockPool {
    category: PoolCategory,
    block_size: u64,
    min_allocation: u64,
}

/// Book-keeping for the blocks of one pool. Split from [`BlockPool`] so the
/// configuration can live outside the lock while entries live inside it.
#[derive(Debug)]
pub struct PoolEntries {
    entries: Vec<HeapEntry>,
}

impl BlockPool {
    /// A pool for `category` with its default block size.
    pub fn new(category: PoolCategory, min_allocation: u64) -> Self {
        Self::with_block_size(category, category.default_block_size(), min_allocation)
    }

    /// A pool with an explicit block size (the `Custom` category).
    pub fn with_block_size(category: PoolCategory, block_size: u64, min_allocation: u64) -> Self {
        debug_assert!(min_allocation.is_power_of_two());
        Self {
            category,
            block_size,
            min_allocation,
        }
    }

    /// The category this pool serves.
    pub fn category(&self) -> PoolCategory {
        self.category
    }

    /// The configured block size.
    pub fn block_size(&self) -> u64 {
        self.block_size
    }

    /// Requested size rounded up to `alignment` with the pool's
    /// minimum-allocation floor applied.
    pub fn aligned_size(&self, size: u64, alignment: u64) -> u64 {
        align_up(size, alignment).max(self.min_allocation)
    }

    /// Size of the backend heap to create when no existing block fits.
    pub fn grow_size(&self, aligned_size: u64) -> u64 {
        self.block_size.max(aligned_size * 2)
    }

    /// Find the best-fit chunk across `entries`, or report the heap size
    /// the caller needs to create.
    ///
    /// `size` must be non-zero; zero-byte requests are rejected before the
    /// pool is consulted.
    pub fn try_allocate(
        &self,
        entries: &mut PoolEntries,
        size: u64,
        alignment: u64,
    ) -> Result<Placement, DeviceError> {
        if size == 0 {
            return Err(DeviceError::InvalidArgument("zero-byte pool allocation"));
        }
        let aligned_size = self.aligned_size(size, alignment);

        // Best fit: smallest leftover across every free chunk of every heap.
        let mut best: Option<(usize, usize, u64)> = None; // (entry, chunk, waste)
        for (entry_index, entry) in entries.entries.iter().enumerate() {
            for (chunk_index, &(offset, chunk_size)) in entry.free_chunks.iter().enumerate() {
                let aligned_offset = align_up(offset, alignment);
                let padding = aligned_offset - offset;
                let required = padding + aligned_size;
                if chunk_size < required {
                    continue;
                }
                let waste = chunk_size - required;
                if best.map_or(true, |(_, _, best_waste)| waste < best_waste) {
                    best = Some((entry_index, chunk_index, waste));
                }
            }
        }

        let Some((entry_index, chunk_index, _)) = best else {
            return Ok(Placement::NeedsHeap(self.grow_size(aligned_size)));
        };

        let entry = &mut entries.entries[entry_index];
        let (offset, chunk_size) = entry.free_chunks.remove(chunk_index);
        let aligned_offset = align_up(offset, alignment);
        let padding = aligned_offset - offset;

        // Split into up to three pieces; the middle one is handed to the
        // caller and stays out of the free list until `free`.
        if padding != 0 {
            entry.free_chunks.push((offset, padding));
        }
        let back_offset = aligned_offset + aligned_size;
        let back_size = chunk_size - padding - aligned_size;
        if back_size != 0 {
            entry.free_chunks.push((back_offset, back_size));
        }
        entry.sort_and_coalesce();

        Ok(Placement::Existing(HeapChunk {
            heap: entry_index,
            offset: aligned_offset,
            size: aligned_size,
        }))
    }

    /// Return `chunk` to its owning entry and merge adjacent free ranges.
    pub fn free(&self, entries: &mut PoolEntries, chunk: HeapChunk) {
        let entry = &mut entries.entries[chunk.heap];
        debug_assert!(
            chunk.offset + chunk.size <= entry.size,
            "chunk exceeds its heap"
        );
        entry.free_chunks.push((chunk.offset, chunk.size));
        entry.sort_and_coalesce();
    }
}

impl PoolEntries {
    /// No blocks yet.
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Register a freshly created backend heap of `size` bytes as one
    /// all-free block. Returns its stable entry index.
    pub fn add_heap(&mut self, size: u64) -> usize {
        self.entries.push(HeapEntry {
            size,
            free_chunks: vec![(0, size)],
        });
        self.entries.len() - 1
    }

    /// Number of registered blocks.
    pub fn heap_count(&self) -> usize {
        self.entries.len()
    }

    /// Total bytes across all blocks.
    pub fn total_size(&self) -> u64 {
        self.entries.iter().map(|e| e.size).sum()
    }

    /// Total bytes sitting in free chunks.
    pub fn free_size(&self) -> u64 {
        self.entries
            .iter()
            .flat_map(|e| e.free_chunks.iter())
            .map(|&(_, size)| size)
            .sum()
    }

    /// Snapshot of one entry's free list, offset-sorted.
    pub fn free_chunks(&self, entry: usize) -> &[(u64, u64)] {
        &self.entries[entry].free_chunks
    }

    /// Whether every block is a single all-free chunk, i.e. every lease has
    /// been returned. Heap pools assert this before tearing down backend
    /// heaps.
    pub fn is_idle(&self) -> bool {
        self.entries
            .iter()
            .all(|e| e.free_chunks.as_slice() == [(0, e.size)])
    }
}

impl HeapEntry {
    fn sort_and_coalesce(&mut self) {
        self.free_chunks.sort_unstable_by_key(|&(offset, _)| offset);
        let mut merged: Vec<(u64, u64)> = Vec::with_capacity(self.free_chunks.len());
        for &(offset, size) in self.free_chunks.iter() {
            match merged.last_mut() {
                Some(last) if last.0 + last.1 == offset => last.1 += size,
                _ => merged.push((offset, size)),
            }
        }
        self.free_chunks = merged;
    }
}

/// Pool selection for an allocation request: explicit host-visible types
/// go to Upload/ReadBack, device-local buffers pick the smallest size class
/// that holds the request, textures pick the class of their dimensionality.
pub fn select_category(
    usage: sbt::VideoMemoryUsage,
    memory_type: sbt::VideoMemoryType,
    size: u64,
) -> PoolCategory {
    use sbt::VideoMemoryUsage as U;
    match memory_type {
        sbt::VideoMemoryType::HostVisible => PoolCategory::Upload,
        sbt::VideoMemoryType::DeviceReadback => PoolCategory::ReadBack,
        sbt::VideoMemoryType::DeviceLocal => match usage {
            U::VertexBuffer | U::IndexBuffer => PoolCategory::buffer_category_for(size),
            U::Texture1D => PoolCategory::SmallTexture,
            U::Texture2D => PoolCategory::MediumTexture,
            U::Texture3D => PoolCategory::LargeTexture,
        },
    }
}

fn align_up(value: u64, alignment: u64) -> u64 {
    debug_assert!(alignment.is_power_of_two());
    (value + alignment - 1) & !(alignment - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIB: u64 = 1 << 20;
    const KIB: u64 = 1 << 10;

    fn medium_pool() -> (BlockPool, PoolEntries) {
        // 16 MiB blocks, 256 KiB minimum allocation.
        let pool = BlockPool::with_block_size(PoolCategory::MediumBuffer, 16 * MIB, 256 * KIB);
        (pool, PoolEntries::new())
    }

    fn allocate(pool: &BlockPool, entries: &mut PoolEntries, size: u64) -> HeapChunk {
        match pool.try_allocate(entries, size, 256).unwrap() {
            Placement::Existing(chunk) => chunk,
            Placement::NeedsHeap(heap_size) => {
                entries.add_heap(heap_size);
                match pool.try_allocate(entries, size, 256).unwrap() {
                    Placement::Existing(chunk) => chunk,
                    Placement::NeedsHeap(_) => panic!("fresh heap did not fit the request"),
                }
            }
        }
    }

    fn assert_invariants(entries: &PoolEntries) {
        for index in 0..entries.heap_count() {
            let chunks = entries.free_chunks(index);
            for pair in chunks.windows(2) {
                let (a_offset, a_size) = pair[0];
                let (b_offset, _) = pair[1];
                assert!(a_offset + a_size <= b_offset, "free chunks overlap");
                assert_ne!(a_offset + a_size, b_offset, "adjacent chunks not merged");
            }
        }
    }

    #[test]
    fn zero_byte_allocation_is_rejected() {
        let (pool, mut entries) = medium_pool();
        assert!(pool.try_allocate(&mut entries, 0, 256).is_err());
    }

    #[test]
    fn first_allocation_asks_for_a_block() {
        let (pool, mut entries) = medium_pool();
        assert_eq!(
            pool.try_allocate(&mut entries, MIB, 256).unwrap(),
            Placement::NeedsHeap(16 * MIB)
        );
    }

    #[test]
    fn oversize_allocation_grows_twice_the_request() {
        let (pool, mut entries) = medium_pool();
        let request = 20 * MIB;
        match pool.try_allocate(&mut entries, request, 256).unwrap() {
            Placement::NeedsHeap(size) => assert_eq!(size, 2 * request),
            other => panic!("unexpected placement {other:?}"),
        }
        entries.add_heap(2 * request);
        let chunk = allocate(&pool, &mut entries, request);
        assert_eq!(chunk.size, request);
        assert_eq!(entries.total_size(), 2 * request);
    }

    #[test]
    fn free_order_independent_coalescing() {
        // Allocate A, B, C of 1 MiB; free A, C, B; one 16 MiB chunk at 0
        // must remain.
        let (pool, mut entries) = medium_pool();
        let a = allocate(&pool, &mut entries, MIB);
        let b = allocate(&pool, &mut entries, MIB);
        let c = allocate(&pool, &mut entries, MIB);
        assert_eq!(entries.heap_count(), 1);
        assert_eq!((a.offset, b.offset, c.offset), (0, MIB, 2 * MIB));

        pool.free(&mut entries, a);
        assert_invariants(&entries);
        pool.free(&mut entries, c);
        assert_invariants(&entries);
        pool.free(&mut entries, b);
        assert_invariants(&entries);

        assert_eq!(entries.free_chunks(0), &[(0, 16 * MIB)]);
        assert!(entries.is_idle());
    }

    #[test]
    fn accounting_is_conserved() {
        let (pool, mut entries) = medium_pool();
        let mut live = Vec::new();
        for size in [300 * KIB, MIB, 3 * MIB, 512 * KIB, 7 * MIB] {
            live.push(allocate(&pool, &mut entries, size));
        }
        let allocated: u64 = live.iter().map(|chunk| chunk.size).sum();
        assert_eq!(entries.free_size() + allocated, entries.total_size());

        for chunk in live.drain(..) {
            pool.free(&mut entries, chunk);
            assert_invariants(&entries);
        }
        assert_eq!(entries.free_size(), entries.total_size());
    }

    #[test]
    fn best_fit_prefers_smallest_waste() {
        let (pool, mut entries) = medium_pool();
        // Carve the block into two free gaps of different sizes.
        let a = allocate(&pool, &mut entries, 2 * MIB); // gap candidate
        let hold = allocate(&pool, &mut entries, MIB);
        let b = allocate(&pool, &mut entries, 4 * MIB); // gap candidate
        let tail_guard = allocate(&pool, &mut entries, MIB);
        pool.free(&mut entries, a);
        pool.free(&mut entries, b);

        // A 3 MiB request fits both the 4 MiB gap and the block tail; the
        // 4 MiB gap wastes less and must win.
        let chunk = allocate(&pool, &mut entries, 3 * MIB);
        assert_eq!(chunk.offset, b.offset);

        pool.free(&mut entries, chunk);
        pool.free(&mut entries, hold);
        pool.free(&mut entries, tail_guard);
        assert!(entries.is_idle());
    }

    #[test]
    fn allocate_free_round_trip_restores_state() {
        let (pool, mut entries) = medium_pool();
        let keep = allocate(&pool, &mut entries, MIB);
        let before: Vec<_> = entries.free_chunks(0).to_vec();

        let chunk = allocate(&pool, &mut entries, 2 * MIB);
        pool.free(&mut entries, chunk);

        assert_eq!(entries.free_chunks(0), before.as_slice());
        pool.free(&mut entries, keep);
    }

    #[test]
    fn min_allocation_floors_small_requests() {
        let (pool, mut entries) = medium_pool();
        let chunk = allocate(&pool, &mut entries, 60);
        assert_eq!(chunk.size, 256 * KIB);
        pool.free(&mut entries, chunk);
        assert!(entries.is_idle());
    }

    #[test]
    fn padding_returns_to_the_free_list() {
        let pool = BlockPool::with_block_size(PoolCategory::Custom, 4 * MIB, 256);
        let mut entries = PoolEntries::new();
        entries.add_heap(4 * MIB);

        // Burn an unaligned prefix so the next aligned allocation needs
        // front padding.
        let prefix = match pool.try_allocate(&mut entries, 300, 256).unwrap() {
            Placement::Existing(chunk) => chunk,
            other => panic!("unexpected placement {other:?}"),
        };
        let aligned = match pool.try_allocate(&mut entries, MIB, 4096).unwrap() {
            Placement::Existing(chunk) => chunk,
            other => panic!("unexpected placement {other:?}"),
        };
        assert_eq!(aligned.offset % 4096, 0);

        let live = prefix.size + aligned.size;
        assert_eq!(entries.free_size() + live, entries.total_size());

        pool.free(&mut entries, prefix);
        pool.free(&mut entries, aligned);
        assert!(entries.is_idle());
    }
}
