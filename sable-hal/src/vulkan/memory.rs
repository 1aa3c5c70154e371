//! Category-typed heap pools over `vk::DeviceMemory` blocks.
//!
//! Each pool keeps the backend-independent [`BlockPool`] state and the
//! matching `VkDeviceMemory` heaps under one mutex. Host-visible pools map
//! every heap persistently at creation; per-lease CPU pointers are the
//! mapped base plus the chunk offset.

use std::sync::Arc;

use ash::vk;
use parking_lot::Mutex;

use crate::{
    pool::{BlockPool, HeapChunk, Placement, PoolEntries},
    BindingGuard, DeviceError,
};

use super::{DeviceShared, VideoMemory};

struct HeapBlock {
    raw: vk::DeviceMemory,
    mapped: Option<*mut u8>,
}

struct PoolInner {
    entries: PoolEntries,
    heaps: Vec<HeapBlock>,
}

/// One category's pool of device-memory blocks.
pub struct MemoryPool {
    device: Arc<DeviceShared>,
    layout: BlockPool,
    category: sbt::PoolCategory,
    memory_type_index: u32,
    host_visible: bool,
    /// Conservative placement alignment for leases from this pool.
    alignment: u64,
    inner: Mutex<PoolInner>,
}

unsafe impl Send for MemoryPool {}
unsafe impl Sync for MemoryPool {}

fn category_properties(category: sbt::PoolCategory) -> (vk::MemoryPropertyFlags, bool) {
    use sbt::PoolCategory as C;
    match category {
        C::Upload => (
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            true,
        ),
        C::ReadBack => (
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_CACHED,
            true,
        ),
        _ => (vk::MemoryPropertyFlags::DEVICE_LOCAL, false),
    }
}

fn find_memory_type(
    properties: &vk::PhysicalDeviceMemoryProperties,
    flags: vk::MemoryPropertyFlags,
) -> Option<u32> {
    properties.memory_types[..properties.memory_type_count as usize]
        .iter()
        .position(|ty| ty.property_flags.contains(flags))
        .map(|index| index as u32)
}

impl MemoryPool {
    pub(super) fn new(
        device: Arc<DeviceShared>,
        category: sbt::PoolCategory,
    ) -> Result<Arc<Self>, DeviceError> {
        let (wanted_flags, host_visible) = category_properties(category);
        let memory_type_index = find_memory_type(&device.memory_properties, wanted_flags)
            .or_else(|| {
                // HOST_CACHED is a preference, not a requirement.
                find_memory_type(&device.memory_properties, vk::MemoryPropertyFlags::HOST_VISIBLE)
                    .filter(|_| host_visible)
            })
            .ok_or(DeviceError::OutOfMemory)?;

        let alignment = if matches!(
            category,
            sbt::PoolCategory::SmallBuffer
                | sbt::PoolCategory::MediumBuffer
                | sbt::PoolCategory::LargeBuffer
                | sbt::PoolCategory::Upload
                | sbt::PoolCategory::ReadBack
        ) {
            256
        } else {
            device.limits.buffer_image_granularity.max(4096)
        };

        Ok(Arc::new(Self {
            layout: BlockPool::new(category, alignment),
            device,
            category,
            memory_type_index,
            host_visible,
            alignment,
            inner: Mutex::new(PoolInner {
                entries: PoolEntries::new(),
                heaps: Vec::new(),
            }),
        }))
    }

    /// Lease `size` bytes from the pool, growing it if needed.
    pub(super) fn allocate(
        self: &Arc<Self>,
        size: u64,
        usage: sbt::VideoMemoryUsage,
        memory_type: sbt::VideoMemoryType,
    ) -> Result<VideoMemory, DeviceError> {
        let mut inner = self.inner.lock();
        let chunk = loop {
            match self
                .layout
                .try_allocate(&mut inner.entries, size, self.alignment)?
            {
                Placement::Existing(chunk) => break chunk,
                Placement::NeedsHeap(heap_size) => {
                    let block = self.create_heap(heap_size)?;
                    inner.heaps.push(block);
                    let index = inner.entries.add_heap(heap_size);
                    debug_assert_eq!(index, inner.heaps.len() - 1);
                }
            }
        };

        let heap = &inner.heaps[chunk.heap];
        let mapped_base = heap.mapped;
        let memory = heap.raw;
        drop(inner);

        Ok(VideoMemory {
            pool: Arc::clone(self),
            chunk,
            memory,
            mapped_base,
            size,
            usage,
            memory_type,
            binding: BindingGuard::new(),
        })
    }

    pub(super) fn free(&self, chunk: HeapChunk) {
        let mut inner = self.inner.lock();
        self.layout.free(&mut inner.entries, chunk);
    }

    fn create_heap(&self, size: u64) -> Result<HeapBlock, DeviceError> {
        profiling::scope!("vkAllocateMemory");
        let info = vk::MemoryAllocateInfo::builder()
            .allocation_size(size)
            .memory_type_index(self.memory_type_index);
        let raw = unsafe { self.device.raw.allocate_memory(&info, None) }?;

        let mapped = if self.host_visible {
            let ptr = unsafe {
                self.device
                    .raw
                    .map_memory(raw, 0, vk::WHOLE_SIZE, vk::MemoryMapFlags::empty())
            }
            .map_err(|err| {
                unsafe { self.device.raw.free_memory(raw, None) };
                DeviceError::from(err)
            })?;
            Some(ptr as *mut u8)
        } else {
            None
        };

        log::debug!(
            "created a {} MiB {:?} heap (memory type {})",
            size >> 20,
            self.category,
            self.memory_type_index
        );
        Ok(HeapBlock { raw, mapped })
    }
}

impl Drop for MemoryPool {
    fn drop(&mut self) {
        let inner = self.inner.get_mut();
        // Tearing down a pool with outstanding leases is undefined; all
        // `VideoMemory` handles must have been freed first.
        debug_assert!(
            inner.entries.is_idle(),
            "memory pool dropped with live allocations"
        );
        for heap in inner.heaps.drain(..) {
            unsafe {
                if heap.mapped.is_some() {
                    self.device.raw.unmap_memory(heap.raw);
                }
                self.device.raw.free_memory(heap.raw, None);
            }
        }
    }
}

/// The per-device collection of category pools, created lazily.
pub(super) struct MemoryPools {
    device: Arc<DeviceShared>,
    pools: Mutex<crate::FastHashMap<sbt::PoolCategory, Arc<MemoryPool>>>,
}

impl MemoryPools {
    pub(super) fn new(device: Arc<DeviceShared>) -> Self {
        Self {
            device,
            pools: Mutex::new(Default::default()),
        }
    }

    fn pool(&self, category: sbt::PoolCategory) -> Result<Arc<MemoryPool>, DeviceError> {
        let mut pools = self.pools.lock();
        if let Some(pool) = pools.get(&category) {
            return Ok(Arc::clone(pool));
        }
        let pool = MemoryPool::new(Arc::clone(&self.device), category)?;
        pools.insert(category, Arc::clone(&pool));
        Ok(pool)
    }

    pub(super) fn allocate(
        &self,
        size: u64,
        usage: sbt::VideoMemoryUsage,
        memory_type: sbt::VideoMemoryType,
    ) -> Result<VideoMemory, DeviceError> {
        if size == 0 {
            return Err(DeviceError::InvalidArgument("zero-byte video memory"));
        }
        let category = crate::pool::select_category(usage, memory_type, size);
        self.pool(category)?.allocate(size, usage, memory_type)
    }
}
