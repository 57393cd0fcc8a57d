//! ## Allocator
//!
//! In Vulkan the application itself is responsible for allocating memory. tessera allocates one
//! [DeviceMemory](ash::vk::DeviceMemory) per resource. The memory type is found by a linear search over the
//! physical device's memory types, see [find_memory_type].
//!
//! Host visible memory is always requested together with `HOST_COHERENT`, therefore writes never need an explicit flush.

use ash::vk;

use crate::{
    context::Device,
    error::{CallSite, DeviceError, MisuseError, ResourceError},
};

///Types of memory usage. Make sure to use GpuOnly wherever it applies to get optimal performance.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum MemoryUsage {
    ///Device local, not mappable.
    GpuOnly,
    ///Host visible and coherent. Used for staging, uniforms and the vertex/index buffers.
    CpuToGpu,
}

impl MemoryUsage {
    pub fn property_flags(&self) -> vk::MemoryPropertyFlags {
        match self {
            MemoryUsage::GpuOnly => vk::MemoryPropertyFlags::DEVICE_LOCAL,
            MemoryUsage::CpuToGpu => {
                vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT
            }
        }
    }

    pub fn is_mappable(&self) -> bool {
        matches!(self, MemoryUsage::CpuToGpu)
    }
}

///Returns the first memory type index whose bit is set in `type_filter` and whose property flags contain all of `flags`.
pub fn find_memory_type(
    memory_properties: &vk::PhysicalDeviceMemoryProperties,
    type_filter: u32,
    flags: vk::MemoryPropertyFlags,
) -> Result<u32, DeviceError> {
    memory_properties
        .memory_types_as_slice()
        .iter()
        .enumerate()
        .find(|(idx, ty)| (type_filter & (1 << idx)) != 0 && ty.property_flags.contains(flags))
        .map(|(idx, _)| idx as u32)
        .ok_or(DeviceError::NoMemoryType {
            filter: type_filter,
            flags,
        })
}

///Single device memory allocation that is freed when dropped.
pub struct Allocation<'d> {
    pub device: &'d Device,
    pub memory: vk::DeviceMemory,
    pub size: vk::DeviceSize,
    pub usage: MemoryUsage,
}

impl<'d> Allocation<'d> {
    pub fn new(
        device: &'d Device,
        requirements: vk::MemoryRequirements,
        usage: MemoryUsage,
    ) -> Result<Self, ResourceError> {
        let memory_type_index = find_memory_type(
            &device.adapter.memory_properties,
            requirements.memory_type_bits,
            usage.property_flags(),
        )?;

        let info = vk::MemoryAllocateInfo::default()
            .allocation_size(requirements.size)
            .memory_type_index(memory_type_index);
        let memory =
            unsafe { device.inner.allocate_memory(&info, None) }.during("vkAllocateMemory")?;

        Ok(Allocation {
            device,
            memory,
            size: requirements.size,
            usage,
        })
    }

    ///Maps the whole allocation, copies `data` to its start and unmaps again.
    pub fn write(&self, data: &[u8]) -> Result<(), ResourceError> {
        if data.len() as u64 > self.size {
            return Err(MisuseError::UploadExceedsAllocation {
                requested: data.len() as u64,
                allocated: self.size,
            }
            .into());
        }
        if !self.usage.is_mappable() {
            #[cfg(feature = "logging")]
            log::error!("Tried to map allocation that has usage: {:?}", self.usage);
            return Err(ResourceError::NotMappable);
        }

        let ptr = unsafe {
            self.device.inner.map_memory(
                self.memory,
                0,
                self.size,
                vk::MemoryMapFlags::empty(),
            )
        }
        .during("vkMapMemory")?;
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), ptr as *mut u8, data.len());
            self.device.inner.unmap_memory(self.memory);
        }
        Ok(())
    }

    ///Maps the allocation and copies its first `len` bytes out. Meant for debugging and tests.
    pub fn read(&self, len: usize) -> Result<Vec<u8>, ResourceError> {
        if !self.usage.is_mappable() {
            return Err(ResourceError::NotMappable);
        }
        let len = len.min(self.size as usize);
        let ptr = unsafe {
            self.device.inner.map_memory(
                self.memory,
                0,
                self.size,
                vk::MemoryMapFlags::empty(),
            )
        }
        .during("vkMapMemory")?;
        let mut out = vec![0u8; len];
        unsafe {
            std::ptr::copy_nonoverlapping(ptr as *const u8, out.as_mut_ptr(), len);
            self.device.inner.unmap_memory(self.memory);
        }
        Ok(out)
    }
}

impl Drop for Allocation<'_> {
    fn drop(&mut self) {
        if self.memory != vk::DeviceMemory::null() {
            unsafe { self.device.inner.free_memory(self.memory, None) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn properties(types: &[vk::MemoryPropertyFlags]) -> vk::PhysicalDeviceMemoryProperties {
        let mut props = vk::PhysicalDeviceMemoryProperties::default();
        for (idx, flags) in types.iter().enumerate() {
            props.memory_types[idx] = vk::MemoryType {
                property_flags: *flags,
                heap_index: 0,
            };
        }
        props.memory_type_count = types.len() as u32;
        props
    }

    #[test]
    fn finds_first_superset() {
        let props = properties(&[
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::MemoryPropertyFlags::HOST_VISIBLE,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            vk::MemoryPropertyFlags::HOST_VISIBLE
                | vk::MemoryPropertyFlags::HOST_COHERENT
                | vk::MemoryPropertyFlags::HOST_CACHED,
        ]);
        let flags = MemoryUsage::CpuToGpu.property_flags();
        assert_eq!(find_memory_type(&props, 0b1111, flags).unwrap(), 2);
        assert_eq!(
            find_memory_type(&props, 0b1111, MemoryUsage::GpuOnly.property_flags()).unwrap(),
            0
        );
    }

    #[test]
    fn respects_type_filter() {
        let props = properties(&[
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        ]);
        let flags = MemoryUsage::CpuToGpu.property_flags();
        assert_eq!(find_memory_type(&props, 0b10, flags).unwrap(), 1);
    }

    #[test]
    fn fails_without_match() {
        let props = properties(&[vk::MemoryPropertyFlags::DEVICE_LOCAL]);
        let err = find_memory_type(&props, 0b1, MemoryUsage::CpuToGpu.property_flags());
        assert!(matches!(err, Err(DeviceError::NoMemoryType { filter: 1, .. })));
        //bits outside of memory_type_count are never considered
        assert!(find_memory_type(&props, 0b10, vk::MemoryPropertyFlags::empty()).is_err());
    }
}
