use ahash::{AHashMap, AHashSet};
use ash::vk;

use super::{ShaderStage, Texture, UniformBlock};
use crate::{
    context::Device,
    error::{CallSite, MisuseError, PipelineError, VkCallError},
};

///Resource that is bound to a descriptor.
#[derive(Clone, Copy)]
pub enum DescriptorResource<'a> {
    Uniform(&'a UniformBlock<'a>),
    Texture(&'a Texture<'a>),
}

impl DescriptorResource<'_> {
    pub fn descriptor_type(&self) -> vk::DescriptorType {
        match self {
            DescriptorResource::Uniform(_) => vk::DescriptorType::UNIFORM_BUFFER,
            DescriptorResource::Texture(_) => vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
        }
    }
}

///Resource attached to `binding` of set 0, visible to `stage`.
#[derive(Clone, Copy)]
pub struct DescriptorBinding<'a> {
    pub binding: u32,
    pub stage: ShaderStage,
    pub resource: DescriptorResource<'a>,
}

impl DescriptorBinding<'_> {
    pub fn layout_binding(&self) -> vk::DescriptorSetLayoutBinding<'static> {
        vk::DescriptorSetLayoutBinding::default()
            .binding(self.binding)
            .descriptor_type(self.resource.descriptor_type())
            .descriptor_count(1)
            .stage_flags(self.stage.flags())
    }
}

///One pool size per descriptor type, large enough for a single set of `bindings`. Sorted by type.
pub fn pool_sizes(bindings: &[vk::DescriptorSetLayoutBinding]) -> Vec<vk::DescriptorPoolSize> {
    let counts = bindings
        .iter()
        .fold(AHashMap::default(), |mut map, binding| {
            if let Some(count) = map.get_mut(&binding.descriptor_type) {
                *count += binding.descriptor_count;
            } else {
                map.insert(binding.descriptor_type, binding.descriptor_count);
            }

            map
        });

    let mut sizes = counts
        .into_iter()
        .map(|(ty, descriptor_count)| vk::DescriptorPoolSize {
            ty,
            descriptor_count,
        })
        .collect::<Vec<_>>();
    sizes.sort_by_key(|s| s.ty.as_raw());
    sizes
}

///Fails on the first binding number that occurs twice.
pub fn check_unique_bindings(bindings: &[vk::DescriptorSetLayoutBinding]) -> Result<(), MisuseError> {
    let mut seen = AHashSet::with_capacity(bindings.len());
    for binding in bindings {
        if !seen.insert(binding.binding) {
            return Err(MisuseError::DuplicateBinding(binding.binding));
        }
    }
    Ok(())
}

/// Wrapped descriptor set layout. Handles on-drop destruction of the resource.
pub struct DescriptorSetLayout<'d> {
    device: &'d Device,
    pub inner: vk::DescriptorSetLayout,
}

impl<'d> DescriptorSetLayout<'d> {
    pub fn new(
        device: &'d Device,
        bindings: &[vk::DescriptorSetLayoutBinding],
    ) -> Result<Self, VkCallError> {
        let info = vk::DescriptorSetLayoutCreateInfo::default().bindings(bindings);
        let inner = unsafe { device.inner.create_descriptor_set_layout(&info, None) }
            .during("vkCreateDescriptorSetLayout")?;
        Ok(DescriptorSetLayout { device, inner })
    }
}

impl Drop for DescriptorSetLayout<'_> {
    fn drop(&mut self) {
        if self.inner != vk::DescriptorSetLayout::null() {
            unsafe {
                self.device
                    .inner
                    .destroy_descriptor_set_layout(self.inner, None)
            }
        }
    }
}

///Descriptor pool. Sets allocated from it are freed together with the pool.
pub struct DescriptorPool<'d> {
    device: &'d Device,
    pub inner: vk::DescriptorPool,
    ///Allocatable sizes
    pub sizes: AHashMap<vk::DescriptorType, u32>,
}

impl<'d> DescriptorPool<'d> {
    pub fn new(
        device: &'d Device,
        sizes: &[vk::DescriptorPoolSize],
        set_count: u32,
    ) -> Result<Self, VkCallError> {
        let create_info = vk::DescriptorPoolCreateInfo::default()
            .max_sets(set_count)
            .pool_sizes(sizes);
        let inner = unsafe { device.inner.create_descriptor_pool(&create_info, None) }
            .during("vkCreateDescriptorPool")?;

        Ok(DescriptorPool {
            device,
            inner,
            sizes: sizes
                .iter()
                .map(|s| (s.ty, s.descriptor_count))
                .collect(),
        })
    }

    pub fn allocate(&self, layout: &DescriptorSetLayout<'_>) -> Result<vk::DescriptorSet, PipelineError> {
        let info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(self.inner)
            .set_layouts(core::slice::from_ref(&layout.inner));
        let mut sets = unsafe { self.device.inner.allocate_descriptor_sets(&info) }
            .during("vkAllocateDescriptorSets")?;
        sets.pop().ok_or(PipelineError::DescriptorAllocation)
    }
}

impl Drop for DescriptorPool<'_> {
    fn drop(&mut self) {
        if self.inner != vk::DescriptorPool::null() {
            unsafe { self.device.inner.destroy_descriptor_pool(self.inner, None) }
        }
    }
}

enum WriteInfo {
    Buffer(vk::DescriptorBufferInfo),
    Image(vk::DescriptorImageInfo),
}

///Descriptor set 0 of a pipeline, with every attached resource written into it.
///
/// The set is allocated from its own pool that is sized exactly for it. Holding the bindings keeps the bound
/// uniform blocks and textures borrowed for as long as the set exists.
pub struct BoundDescriptors<'a> {
    pub set: vk::DescriptorSet,
    pool: DescriptorPool<'a>,
    pub layout: DescriptorSetLayout<'a>,
    bindings: Vec<DescriptorBinding<'a>>,
}

impl<'a> BoundDescriptors<'a> {
    pub fn new(
        device: &'a Device,
        bindings: Vec<DescriptorBinding<'a>>,
    ) -> Result<Self, PipelineError> {
        let layout_bindings = bindings
            .iter()
            .map(|b| b.layout_binding())
            .collect::<Vec<_>>();
        check_unique_bindings(&layout_bindings)?;
        let layout = DescriptorSetLayout::new(device, &layout_bindings)?;
        let pool = DescriptorPool::new(device, &pool_sizes(&layout_bindings), 1)?;
        let set = pool.allocate(&layout)?;

        let infos = bindings
            .iter()
            .map(|b| match b.resource {
                DescriptorResource::Uniform(block) => WriteInfo::Buffer(block.descriptor_info()),
                DescriptorResource::Texture(texture) => WriteInfo::Image(texture.descriptor_info()),
            })
            .collect::<Vec<_>>();
        let writes = bindings
            .iter()
            .zip(infos.iter())
            .map(|(binding, info)| {
                let write = vk::WriteDescriptorSet::default()
                    .dst_set(set)
                    .dst_binding(binding.binding)
                    .dst_array_element(0)
                    .descriptor_type(binding.resource.descriptor_type());
                match info {
                    WriteInfo::Buffer(i) => write.buffer_info(core::slice::from_ref(i)),
                    WriteInfo::Image(i) => write.image_info(core::slice::from_ref(i)),
                }
            })
            .collect::<Vec<_>>();
        unsafe { device.inner.update_descriptor_sets(&writes, &[]) };

        Ok(BoundDescriptors {
            set,
            pool,
            layout,
            bindings,
        })
    }

    pub fn bindings(&self) -> &[DescriptorBinding<'a>] {
        &self.bindings
    }

    pub fn pool(&self) -> &DescriptorPool<'a> {
        &self.pool
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn binding(
        binding: u32,
        ty: vk::DescriptorType,
        stage: vk::ShaderStageFlags,
    ) -> vk::DescriptorSetLayoutBinding<'static> {
        vk::DescriptorSetLayoutBinding::default()
            .binding(binding)
            .descriptor_type(ty)
            .descriptor_count(1)
            .stage_flags(stage)
    }

    #[test]
    fn pool_sizes_fold_per_type() {
        let bindings = [
            binding(0, vk::DescriptorType::UNIFORM_BUFFER, vk::ShaderStageFlags::VERTEX),
            binding(
                1,
                vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                vk::ShaderStageFlags::FRAGMENT,
            ),
            binding(2, vk::DescriptorType::UNIFORM_BUFFER, vk::ShaderStageFlags::FRAGMENT),
        ];
        let sizes = pool_sizes(&bindings)
            .into_iter()
            .map(|s| (s.ty, s.descriptor_count))
            .collect::<Vec<_>>();
        assert_eq!(
            sizes,
            vec![
                (vk::DescriptorType::COMBINED_IMAGE_SAMPLER, 1),
                (vk::DescriptorType::UNIFORM_BUFFER, 2)
            ]
        );
    }

    #[test]
    fn binding_numbers_must_be_unique() {
        let uniform = binding(0, vk::DescriptorType::UNIFORM_BUFFER, vk::ShaderStageFlags::VERTEX);
        let texture = binding(
            1,
            vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            vk::ShaderStageFlags::FRAGMENT,
        );
        assert!(check_unique_bindings(&[uniform, texture]).is_ok());
        assert!(check_unique_bindings(&[]).is_ok());

        let clash = binding(
            0,
            vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            vk::ShaderStageFlags::FRAGMENT,
        );
        assert_eq!(
            check_unique_bindings(&[uniform, texture, clash]),
            Err(MisuseError::DuplicateBinding(0))
        );
    }

    #[test]
    fn no_bindings_no_sizes() {
        assert!(pool_sizes(&[]).is_empty());
    }
}
