use ash::vk;

use crate::{
    allocator::{Allocation, MemoryUsage},
    context::Device,
    error::{CallSite, MisuseError, ResourceError},
};

///Buffer handle with its own memory. The buffer is destroyed before its memory is freed.
pub(crate) struct RawBuffer<'d> {
    device: &'d Device,
    pub inner: vk::Buffer,
    ///Size the buffer was created with. The backing allocation might be larger.
    pub size: u64,
    allocation: Option<Allocation<'d>>,
}

impl<'d> RawBuffer<'d> {
    pub fn new(
        device: &'d Device,
        size: u64,
        usage: vk::BufferUsageFlags,
        memory_usage: MemoryUsage,
    ) -> Result<Self, ResourceError> {
        let create_info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let inner =
            unsafe { device.inner.create_buffer(&create_info, None) }.during("vkCreateBuffer")?;

        let mut buffer = RawBuffer {
            device,
            inner,
            size,
            allocation: None,
        };

        let requirements = unsafe { device.inner.get_buffer_memory_requirements(inner) };
        let allocation = Allocation::new(device, requirements, memory_usage)?;
        unsafe {
            device
                .inner
                .bind_buffer_memory(inner, allocation.memory, 0)
        }
        .during("vkBindBufferMemory")?;
        buffer.allocation = Some(allocation);

        Ok(buffer)
    }

    pub fn write(&self, data: &[u8]) -> Result<(), ResourceError> {
        check_upload(data.len() as u64, self.size)?;
        self.allocation()?.write(data)
    }

    pub fn read(&self) -> Result<Vec<u8>, ResourceError> {
        self.allocation()?.read(self.size as usize)
    }

    fn allocation(&self) -> Result<&Allocation<'d>, ResourceError> {
        self.allocation.as_ref().ok_or(ResourceError::NotMappable)
    }
}

impl Drop for RawBuffer<'_> {
    fn drop(&mut self) {
        if self.inner != vk::Buffer::null() {
            unsafe { self.device.inner.destroy_buffer(self.inner, None) };
        }
        //memory is freed when `allocation` drops, after the buffer is gone
    }
}

///Fails if `requested` bytes do not fit into the `allocated` size.
pub fn check_upload(requested: u64, allocated: u64) -> Result<(), MisuseError> {
    if requested > allocated {
        Err(MisuseError::UploadExceedsAllocation {
            requested,
            allocated,
        })
    } else {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexType {
    U16,
    U32,
    ///Needs `VK_EXT_index_type_uint8`.
    U8,
}

impl IndexType {
    pub fn size(&self) -> u64 {
        match self {
            IndexType::U16 => 2,
            IndexType::U32 => 4,
            IndexType::U8 => 1,
        }
    }
}

impl From<IndexType> for vk::IndexType {
    fn from(value: IndexType) -> Self {
        match value {
            IndexType::U16 => vk::IndexType::UINT16,
            IndexType::U32 => vk::IndexType::UINT32,
            IndexType::U8 => vk::IndexType::UINT8_EXT,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferKind {
    Vertex,
    Index(IndexType),
    Uniform,
    Staging,
}

impl BufferKind {
    pub fn usage(&self) -> vk::BufferUsageFlags {
        match self {
            BufferKind::Vertex => vk::BufferUsageFlags::VERTEX_BUFFER,
            BufferKind::Index(_) => vk::BufferUsageFlags::INDEX_BUFFER,
            BufferKind::Uniform => vk::BufferUsageFlags::UNIFORM_BUFFER,
            BufferKind::Staging => vk::BufferUsageFlags::TRANSFER_SRC,
        }
    }
}

///Vertex or index buffer in host visible, coherent memory.
///
/// The native buffer is created on the first [upload](Buffer::upload) and sized to that payload. It never grows:
/// a later upload may be smaller, but a larger one fails with [MisuseError::UploadExceedsAllocation].
pub struct Buffer<'d> {
    device: &'d Device,
    kind: BufferKind,
    raw: Option<RawBuffer<'d>>,
}

impl<'d> Buffer<'d> {
    pub fn new(device: &'d Device, kind: BufferKind) -> Self {
        Buffer {
            device,
            kind,
            raw: None,
        }
    }

    ///Copies `data` into the buffer, creating it on first use. Empty payloads are ignored.
    pub fn upload(&mut self, data: &[u8]) -> Result<(), ResourceError> {
        if data.is_empty() {
            return Ok(());
        }
        if self.raw.is_none() {
            self.raw = Some(RawBuffer::new(
                self.device,
                data.len() as u64,
                self.kind.usage(),
                MemoryUsage::CpuToGpu,
            )?);
        }
        match &self.raw {
            Some(raw) => raw.write(data),
            None => Err(MisuseError::BufferNotUploaded.into()),
        }
    }

    ///Uploads a slice of plain data, for instance vertices or indices.
    pub fn upload_slice<T: bytemuck::Pod>(&mut self, data: &[T]) -> Result<(), ResourceError> {
        self.upload(bytemuck::cast_slice(data))
    }

    ///Native handle, `None` until the first upload.
    pub fn handle(&self) -> Option<vk::Buffer> {
        self.raw.as_ref().map(|r| r.inner)
    }

    ///Size of the first upload, if there was one.
    pub fn size(&self) -> Option<u64> {
        self.raw.as_ref().map(|r| r.size)
    }

    pub fn kind(&self) -> BufferKind {
        self.kind
    }

    pub fn index_type(&self) -> Option<IndexType> {
        if let BufferKind::Index(ty) = self.kind {
            Some(ty)
        } else {
            None
        }
    }

    ///Number of indices the last upload would fit, for index buffers.
    pub fn index_count(&self) -> Option<u32> {
        let ty = self.index_type()?;
        self.size().map(|s| (s / ty.size()) as u32)
    }

    ///Debug read of the whole buffer.
    pub fn read_back(&self) -> Result<Vec<u8>, ResourceError> {
        match &self.raw {
            Some(raw) => raw.read(),
            None => Err(MisuseError::BufferNotUploaded.into()),
        }
    }
}

fn nonzero_block_size(size: u64) -> Result<u64, MisuseError> {
    if size == 0 {
        Err(MisuseError::ZeroSizedUniformBlock)
    } else {
        Ok(size)
    }
}

///Uniform buffer of a fixed size, created eagerly. Meant for repeated uploads of the same size, like per frame matrices.
pub struct UniformBlock<'d> {
    raw: RawBuffer<'d>,
}

impl<'d> UniformBlock<'d> {
    ///Creates the block with room for `size` bytes. A size of 0 is rejected.
    pub fn create(device: &'d Device, size: u64) -> Result<Self, ResourceError> {
        let raw = RawBuffer::new(
            device,
            nonzero_block_size(size)?,
            BufferKind::Uniform.usage(),
            MemoryUsage::CpuToGpu,
        )?;
        Ok(UniformBlock { raw })
    }

    pub fn upload(&self, data: &[u8]) -> Result<(), ResourceError> {
        self.raw.write(data)
    }

    pub fn upload_value<T: bytemuck::Pod>(&self, value: &T) -> Result<(), ResourceError> {
        self.upload(bytemuck::bytes_of(value))
    }

    ///Maps the block and copies its content. Meant for debugging.
    pub fn read_back(&self) -> Result<Vec<u8>, ResourceError> {
        self.raw.read()
    }

    pub fn handle(&self) -> vk::Buffer {
        self.raw.inner
    }

    pub fn size(&self) -> u64 {
        self.raw.size
    }

    pub(crate) fn descriptor_info(&self) -> vk::DescriptorBufferInfo {
        vk::DescriptorBufferInfo::default()
            .buffer(self.raw.inner)
            .offset(0)
            .range(self.raw.size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::headless_test_device as headless;
    use static_assertions::assert_impl_all;

    #[test]
    fn impl_send_sync() {
        assert_impl_all!(Buffer: Send, Sync);
        assert_impl_all!(UniformBlock: Send, Sync);
    }

    #[test]
    fn larger_reupload_is_misuse() {
        assert!(check_upload(12, 12).is_ok());
        assert!(check_upload(8, 12).is_ok());
        assert_eq!(
            check_upload(24, 12),
            Err(MisuseError::UploadExceedsAllocation {
                requested: 24,
                allocated: 12
            })
        );
    }

    #[test]
    fn empty_uniform_block_is_misuse() {
        assert_eq!(nonzero_block_size(0), Err(MisuseError::ZeroSizedUniformBlock));
        assert_eq!(nonzero_block_size(64), Ok(64));
    }

    #[test]
    #[ignore = "needs a Vulkan device"]
    fn empty_uniform_block_is_rejected_by_device() {
        let device = headless();
        assert!(matches!(
            device.make_uniform_block(0),
            Err(ResourceError::Misuse(MisuseError::ZeroSizedUniformBlock))
        ));
    }

    #[test]
    fn index_types() {
        assert_eq!(vk::IndexType::from(IndexType::U16), vk::IndexType::UINT16);
        assert_eq!(vk::IndexType::from(IndexType::U32), vk::IndexType::UINT32);
        assert_eq!(vk::IndexType::from(IndexType::U8), vk::IndexType::UINT8_EXT);
        assert_eq!(
            BufferKind::Index(IndexType::U8).usage(),
            vk::BufferUsageFlags::INDEX_BUFFER
        );
    }

    #[test]
    #[ignore = "needs a Vulkan device"]
    fn uniform_block_round_trip() {
        let device = headless();
        let payload: [f32; 4] = [1.0, -2.5, 3.25, 42.0];
        let block = device
            .make_uniform_block(std::mem::size_of_val(&payload) as u64)
            .unwrap();
        block.upload_value(&payload).unwrap();
        assert_eq!(block.read_back().unwrap(), bytemuck::bytes_of(&payload));
    }

    #[test]
    #[ignore = "needs a Vulkan device"]
    fn buffer_does_not_grow() {
        let device = headless();
        let mut buffer = device.make_buffer();
        assert!(buffer.handle().is_none());
        buffer.upload(&[1u8; 12]).unwrap();
        let handle = buffer.handle();
        buffer.upload(&[2u8; 8]).unwrap();
        assert_eq!(buffer.handle(), handle);

        let err = buffer.upload(&[3u8; 24]).unwrap_err();
        assert!(matches!(
            err,
            ResourceError::Misuse(MisuseError::UploadExceedsAllocation {
                requested: 24,
                allocated: 12
            })
        ));
        assert_eq!(buffer.size(), Some(12));
    }
}
