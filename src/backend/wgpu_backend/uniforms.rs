//! Frame-wide uniform storage addressed through dynamic offsets

/// Sub-allocates per-draw uniform blocks from one buffer
///
/// Blocks are written through the queue as they are recorded and land before
/// the next submission. When the buffer fills up mid-frame a larger one
/// replaces it; the old one stays alive until the next reset because recorded
/// draws still refer to it.
pub struct UniformArena {
    buffers: Vec<wgpu::Buffer>,
    capacity: u64,
    cursor: u64,
    alignment: u64,
}

const INITIAL_CAPACITY: u64 = 64 * 1024;

impl UniformArena {
    pub fn new(device: &wgpu::Device) -> Self {
        let alignment = device.limits().min_uniform_buffer_offset_alignment as u64;
        Self {
            buffers: vec![Self::allocate(device, INITIAL_CAPACITY)],
            capacity: INITIAL_CAPACITY,
            cursor: 0,
            alignment,
        }
    }

    fn allocate(device: &wgpu::Device, size: u64) -> wgpu::Buffer {
        device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("frame uniforms"),
            size,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        })
    }

    /// Copy a block in; returns the buffer index and dynamic offset to bind
    pub fn push(&mut self, device: &wgpu::Device, queue: &wgpu::Queue, bytes: &[u8]) -> (usize, u32) {
        let size = bytes.len() as u64;
        let offset = self.cursor.div_ceil(self.alignment) * self.alignment;
        if offset + size > self.capacity {
            self.capacity = (self.capacity * 2).max(size.div_ceil(self.alignment) * self.alignment);
            log::debug!("Growing frame uniform buffer to {} bytes", self.capacity);
            self.buffers.push(Self::allocate(device, self.capacity));
            self.cursor = 0;
            return self.push(device, queue, bytes);
        }

        let index = self.buffers.len() - 1;
        queue.write_buffer(&self.buffers[index], offset, bytes);
        self.cursor = offset + size;
        (index, offset as u32)
    }

    pub fn buffer(&self, index: usize) -> Option<&wgpu::Buffer> {
        self.buffers.get(index)
    }

    /// Start over after a submission, keeping only the largest buffer
    pub fn reset(&mut self) {
        if self.buffers.len() > 1 {
            self.buffers.drain(..self.buffers.len() - 1);
        }
        self.cursor = 0;
    }
}
