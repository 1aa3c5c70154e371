//! CPU-only descriptor heap pool for render-target views.

use winapi::um::d3d12;

use crate::DeviceError;

use super::HResult as _;

const HEAP_CAPACITY: u32 = 64;

struct Heap {
    raw: native::DescriptorHeap,
    start: d3d12::D3D12_CPU_DESCRIPTOR_HANDLE,
    next: u32,
    free: Vec<u32>,
}

/// Fixed-type CPU descriptor pool; RTVs here, extended per type when a
/// backend object needs DSVs or CBV/SRV staging descriptors.
pub(super) struct CpuPool {
    device: native::Device,
    ty: native::DescriptorHeapType,
    handle_size: u64,
    heaps: Vec<Heap>,
}

/// One allocated CPU descriptor.
#[derive(Clone, Copy, Debug)]
pub(super) struct Handle {
    pub raw: d3d12::D3D12_CPU_DESCRIPTOR_HANDLE,
    heap: usize,
    index: u32,
}

impl CpuPool {
    pub(super) fn new(device: native::Device, ty: native::DescriptorHeapType) -> Self {
        let handle_size = unsafe { device.GetDescriptorHandleIncrementSize(ty as u32) } as u64;
        Self {
            device,
            ty,
            handle_size,
            heaps: Vec::new(),
        }
    }

    pub(super) fn alloc_handle(&mut self) -> Result<Handle, DeviceError> {
        for (heap_index, heap) in self.heaps.iter_mut().enumerate() {
            if let Some(index) = heap.free.pop() {
                return Ok(Handle {
                    raw: heap.at(index, self.handle_size),
                    heap: heap_index,
                    index,
                });
            }
            if heap.next < HEAP_CAPACITY {
                let index = heap.next;
                heap.next += 1;
                return Ok(Handle {
                    raw: heap.at(index, self.handle_size),
                    heap: heap_index,
                    index,
                });
            }
        }

        let raw = self
            .device
            .create_descriptor_heap(
                HEAP_CAPACITY,
                self.ty,
                native::DescriptorHeapFlags::empty(),
                0,
            )
            .into_device_result("CreateDescriptorHeap")?;
        let start = raw.start_cpu_descriptor();
        self.heaps.push(Heap {
            raw,
            start,
            next: 1,
            free: Vec::new(),
        });
        let heap = self.heaps.len() - 1;
        Ok(Handle {
            raw: self.heaps[heap].at(0, self.handle_size),
            heap,
            index: 0,
        })
    }

    pub(super) fn free_handle(&mut self, handle: Handle) {
        self.heaps[handle.heap].free.push(handle.index);
    }
}

impl Heap {
    fn at(&self, index: u32, handle_size: u64) -> d3d12::D3D12_CPU_DESCRIPTOR_HANDLE {
        d3d12::D3D12_CPU_DESCRIPTOR_HANDLE {
            ptr: self.start.ptr + (index as u64 * handle_size) as usize,
        }
    }
}

impl Drop for CpuPool {
    fn drop(&mut self) {
        for heap in self.heaps.drain(..) {
            unsafe { heap.raw.destroy() };
        }
    }
}
