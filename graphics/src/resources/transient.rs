//! Per-slot pools of transient upload buffers.
//!
//! Each frame slot owns one [`TransientBufferPool`]. During a frame the pool
//! hands out buffers in append order; when the slot is reclaimed its lists are
//! truncated to zero length while the buffers themselves are kept, so the next
//! frame recorded in this slot reuses them by index instead of allocating.
//!
//! ```text
//! slot 0, frame 4:  [vb0][vb1][vb2]      len = 3
//! slot 0, reclaim:  [vb0][vb1][vb2]      len = 0   (capacity kept)
//! slot 0, frame 6:  [vb0][vb1][vb2]      len = 1   (vb0 reused)
//! ```
//!
//! # Example
//!
//! ```ignore
//! let constants = pool.acquire(device, TransientKind::Constant, CONSTANT_BUFFER_SIZE)?;
//! constants.write(device, 0, bytemuck::bytes_of(&parameters))?;
//! ```

use crate::backend::{
    BufferDescriptor, BufferHandle, BufferUsage, GpuDevice, MemoryLocation, write_buffer,
};
use crate::error::GraphicsError;

/// Smallest staging buffer allocated for pixel uploads.
const MIN_UPLOAD_SIZE: u64 = 64 * 1024;

/// What a transient buffer is used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransientKind {
    /// Vertex data of one `set_vertices` batch.
    Vertex,
    /// Index data of one `set_vertices` batch.
    Index,
    /// Per-draw shader constants.
    Constant,
    /// Staging memory for pixel uploads.
    Upload,
}

impl TransientKind {
    /// Every transient kind.
    pub const ALL: [Self; 4] = [Self::Vertex, Self::Index, Self::Constant, Self::Upload];

    fn index(self) -> usize {
        match self {
            Self::Vertex => 0,
            Self::Index => 1,
            Self::Constant => 2,
            Self::Upload => 3,
        }
    }

    fn usage(self) -> BufferUsage {
        match self {
            Self::Vertex => BufferUsage::VERTEX,
            Self::Index => BufferUsage::INDEX,
            Self::Constant => BufferUsage::CONSTANT,
            Self::Upload => BufferUsage::COPY_SRC,
        }
    }

    fn label(self) -> &'static str {
        match self {
            Self::Vertex => "transient_vertices",
            Self::Index => "transient_indices",
            Self::Constant => "transient_constants",
            Self::Upload => "transient_upload",
        }
    }

    fn allocation_size(self, required: u64) -> u64 {
        match self {
            Self::Upload => required.next_power_of_two().max(MIN_UPLOAD_SIZE),
            _ => required,
        }
    }
}

/// A buffer handed out by [`TransientBufferPool::acquire`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransientBuffer {
    pub buffer: BufferHandle,
    /// Physical size, at least the requested size.
    pub size: u64,
    /// Position in the slot's list for this kind.
    pub index: usize,
    /// Whether this acquire created a new GPU buffer.
    pub newly_allocated: bool,
}

impl TransientBuffer {
    /// Write `bytes` at `offset` through a scoped map/unmap.
    pub fn write(
        &self,
        device: &mut dyn GpuDevice,
        offset: u64,
        bytes: &[u8],
    ) -> Result<(), GraphicsError> {
        write_buffer(device, self.buffer, offset, bytes)
    }
}

#[derive(Debug, Default)]
struct BufferList {
    buffers: Vec<(BufferHandle, u64)>,
    len: usize,
}

/// Growable arena of transient buffers owned by one frame slot.
#[derive(Debug)]
pub struct TransientBufferPool {
    slot: usize,
    limit: usize,
    lists: [BufferList; 4],
}

impl TransientBufferPool {
    /// Create an empty pool for `slot` holding at most `limit` buffers per kind.
    pub fn new(slot: usize, limit: usize) -> Self {
        Self {
            slot,
            limit,
            lists: Default::default(),
        }
    }

    /// Hand out the next buffer of `kind` holding at least `required_size` bytes.
    ///
    /// Reuses the buffer at the list's current length when it is large enough,
    /// otherwise allocates one. The caller must only use the pool while its
    /// slot is recording, which guarantees the GPU is done with every buffer
    /// past the current length.
    pub fn acquire(
        &mut self,
        device: &mut dyn GpuDevice,
        kind: TransientKind,
        required_size: u64,
    ) -> Result<TransientBuffer, GraphicsError> {
        let limit = self.limit;
        let slot = self.slot;
        let list = &mut self.lists[kind.index()];
        let index = list.len;
        if index >= limit {
            return Err(GraphicsError::Capacity {
                resource: kind.label(),
                requested: index + 1,
                limit,
            });
        }

        if let Some(&(buffer, size)) = list.buffers.get(index)
            && size >= required_size
        {
            list.len += 1;
            return Ok(TransientBuffer {
                buffer,
                size,
                index,
                newly_allocated: false,
            });
        }

        let size = kind.allocation_size(required_size);
        let buffer = device.create_buffer(&BufferDescriptor {
            label: kind.label(),
            size,
            usage: kind.usage(),
            location: MemoryLocation::Upload,
        })?;

        if index < list.buffers.len() {
            let (old, old_size) = list.buffers[index];
            log::debug!(
                "Slot {slot}: growing {} #{index} from {old_size} to {size} bytes",
                kind.label()
            );
            device.release(old.into());
            list.buffers[index] = (buffer, size);
        } else {
            log::debug!(
                "Slot {slot}: allocated {} #{index} ({size} bytes)",
                kind.label()
            );
            list.buffers.push((buffer, size));
        }
        list.len += 1;

        Ok(TransientBuffer {
            buffer,
            size,
            index,
            newly_allocated: true,
        })
    }

    /// Most recently acquired buffer of `kind` in this frame.
    pub fn last(&self, kind: TransientKind) -> Option<TransientBuffer> {
        let list = &self.lists[kind.index()];
        let index = list.len.checked_sub(1)?;
        let (buffer, size) = list.buffers[index];
        Some(TransientBuffer {
            buffer,
            size,
            index,
            newly_allocated: false,
        })
    }

    /// Buffers of `kind` handed out since the last truncate.
    pub fn len(&self, kind: TransientKind) -> usize {
        self.lists[kind.index()].len
    }

    /// Physical buffers of `kind` owned by this pool.
    pub fn capacity(&self, kind: TransientKind) -> usize {
        self.lists[kind.index()].buffers.len()
    }

    /// Whether no buffer was handed out since the last truncate.
    pub fn is_empty(&self) -> bool {
        self.lists.iter().all(|list| list.len == 0)
    }

    /// Reset every list to zero length, keeping the buffers.
    ///
    /// Only call once the GPU has finished all work of this slot.
    pub fn truncate(&mut self) {
        for list in &mut self.lists {
            list.len = 0;
        }
    }

    /// Release every buffer. The GPU must be idle.
    pub fn release_all(&mut self, device: &mut dyn GpuDevice) {
        for list in &mut self.lists {
            for (buffer, _) in list.buffers.drain(..) {
                device.release(buffer.into());
            }
            list.len = 0;
        }
    }
}

#[cfg(all(test, feature = "dummy"))]
mod tests {
    use super::*;
    use crate::backend::dummy::DummyDevice;
    use rstest::rstest;

    #[test]
    fn test_acquire_appends() {
        let mut device = DummyDevice::new();
        let mut pool = TransientBufferPool::new(0, 8);

        let a = pool.acquire(&mut device, TransientKind::Constant, 256).unwrap();
        let b = pool.acquire(&mut device, TransientKind::Constant, 256).unwrap();
        assert_eq!((a.index, b.index), (0, 1));
        assert!(a.newly_allocated && b.newly_allocated);
        assert_ne!(a.buffer, b.buffer);
        assert_eq!(pool.len(TransientKind::Constant), 2);
        assert_eq!(pool.len(TransientKind::Vertex), 0);
    }

    #[test]
    fn test_truncate_keeps_capacity() {
        let mut device = DummyDevice::new();
        let mut pool = TransientBufferPool::new(1, 8);
        let first = pool.acquire(&mut device, TransientKind::Vertex, 1024).unwrap();
        pool.acquire(&mut device, TransientKind::Vertex, 1024).unwrap();

        pool.truncate();
        assert!(pool.is_empty());
        assert_eq!(pool.capacity(TransientKind::Vertex), 2);

        let reused = pool.acquire(&mut device, TransientKind::Vertex, 1024).unwrap();
        assert_eq!(reused.buffer, first.buffer);
        assert!(!reused.newly_allocated);
        assert_eq!(device.stats().buffers_created, 2);
    }

    #[test]
    fn test_small_upload_buffer_is_replaced() {
        let mut device = DummyDevice::new();
        let mut pool = TransientBufferPool::new(0, 8);
        let small = pool.acquire(&mut device, TransientKind::Upload, 16).unwrap();
        assert_eq!(small.size, MIN_UPLOAD_SIZE);
        pool.truncate();

        let big = pool
            .acquire(&mut device, TransientKind::Upload, MIN_UPLOAD_SIZE + 1)
            .unwrap();
        assert!(big.newly_allocated);
        assert_eq!(big.size, MIN_UPLOAD_SIZE * 2);
        assert!(!device.is_live(small.buffer));
        assert_eq!(pool.capacity(TransientKind::Upload), 1);
    }

    #[rstest]
    #[case::vertex(TransientKind::Vertex)]
    #[case::constant(TransientKind::Constant)]
    fn test_budget_exceeded(#[case] kind: TransientKind) {
        let mut device = DummyDevice::new();
        let mut pool = TransientBufferPool::new(0, 2);
        pool.acquire(&mut device, kind, 64).unwrap();
        pool.acquire(&mut device, kind, 64).unwrap();
        let err = pool.acquire(&mut device, kind, 64).unwrap_err();
        assert!(matches!(
            err,
            GraphicsError::Capacity {
                requested: 3,
                limit: 2,
                ..
            }
        ));
    }

    #[test]
    fn test_release_all() {
        let mut device = DummyDevice::new();
        let mut pool = TransientBufferPool::new(0, 4);
        let buffer = pool.acquire(&mut device, TransientKind::Index, 64).unwrap();
        pool.release_all(&mut device);
        assert!(!device.is_live(buffer.buffer));
        assert_eq!(device.release_count(buffer.buffer), 1);
        assert_eq!(pool.capacity(TransientKind::Index), 0);
    }

    #[test]
    fn test_last() {
        let mut device = DummyDevice::new();
        let mut pool = TransientBufferPool::new(0, 4);
        assert!(pool.last(TransientKind::Vertex).is_none());
        pool.acquire(&mut device, TransientKind::Vertex, 64).unwrap();
        let second = pool.acquire(&mut device, TransientKind::Vertex, 64).unwrap();
        assert_eq!(pool.last(TransientKind::Vertex).unwrap().buffer, second.buffer);
    }
}
