use ash::vk;

use crate::error::MisuseError;

///Semantic format of one vertex attribute. All components are 32bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InputFormat {
    Float,
    Vec2,
    Vec3,
    Vec4,
    ///RGBA color with float components.
    Color,
    Int,
    Uint,
    ///Packed as 32bit unsigned integer.
    Bool,
    ///Three `Vec3` columns on consecutive locations.
    Mat3,
    ///Four `Vec4` columns on consecutive locations.
    Mat4,
}

impl InputFormat {
    ///Size in bytes.
    pub fn size(&self) -> u32 {
        self.location_size() * self.locations()
    }

    ///Number of shader locations the attribute occupies.
    pub fn locations(&self) -> u32 {
        match self {
            InputFormat::Mat3 => 3,
            InputFormat::Mat4 => 4,
            _ => 1,
        }
    }

    ///Native format of a single location.
    pub fn format(&self) -> vk::Format {
        match self {
            InputFormat::Float => vk::Format::R32_SFLOAT,
            InputFormat::Vec2 => vk::Format::R32G32_SFLOAT,
            InputFormat::Vec3 | InputFormat::Mat3 => vk::Format::R32G32B32_SFLOAT,
            InputFormat::Vec4 | InputFormat::Color | InputFormat::Mat4 => {
                vk::Format::R32G32B32A32_SFLOAT
            }
            InputFormat::Int => vk::Format::R32_SINT,
            InputFormat::Uint | InputFormat::Bool => vk::Format::R32_UINT,
        }
    }

    fn location_size(&self) -> u32 {
        match self {
            InputFormat::Float | InputFormat::Int | InputFormat::Uint | InputFormat::Bool => 4,
            InputFormat::Vec2 => 8,
            InputFormat::Vec3 | InputFormat::Mat3 => 12,
            InputFormat::Vec4 | InputFormat::Color | InputFormat::Mat4 => 16,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputItem {
    pub location: u32,
    pub format: InputFormat,
}

///Ordered description of one interleaved vertex.
///
/// Attributes are tightly packed in the order they are added. No padding is inserted, so the vertex struct on the
/// host side must be `#[repr(C)]` with matching field order and no implicit padding.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InputDescriptor {
    items: Vec<InputItem>,
    capacity: Option<usize>,
}

impl InputDescriptor {
    pub fn new() -> Self {
        Self::default()
    }

    ///Descriptor that accepts at most `capacity` items.
    pub fn with_capacity(capacity: usize) -> Self {
        InputDescriptor {
            items: Vec::with_capacity(capacity),
            capacity: Some(capacity),
        }
    }

    pub fn add_item(&mut self, location: u32, format: InputFormat) -> Result<(), MisuseError> {
        if let Some(capacity) = self.capacity {
            if self.items.len() >= capacity {
                return Err(MisuseError::InputCapacityExceeded { capacity });
            }
        }
        self.items.push(InputItem { location, format });
        Ok(())
    }

    ///Chaining version of [add_item](InputDescriptor::add_item).
    pub fn with_item(mut self, location: u32, format: InputFormat) -> Result<Self, MisuseError> {
        self.add_item(location, format)?;
        Ok(self)
    }

    pub fn items(&self) -> &[InputItem] {
        &self.items
    }

    ///Byte size of one vertex.
    pub fn stride(&self) -> u32 {
        self.items.iter().map(|i| i.format.size()).sum()
    }

    ///Single binding 0 with per vertex rate. Each attribute starts where the previous one ended.
    pub fn build_input_layout(&self) -> InputLayout {
        let binding = vk::VertexInputBindingDescription::default()
            .binding(0)
            .stride(self.stride())
            .input_rate(vk::VertexInputRate::VERTEX);

        let mut attributes = Vec::with_capacity(self.items.len());
        let mut offset = 0;
        for item in &self.items {
            for column in 0..item.format.locations() {
                attributes.push(
                    vk::VertexInputAttributeDescription::default()
                        .location(item.location + column)
                        .binding(0)
                        .format(item.format.format())
                        .offset(offset + column * item.format.location_size()),
                );
            }
            offset += item.format.size();
        }

        InputLayout {
            binding,
            attributes,
        }
    }
}

///Vertex input state derived from an [InputDescriptor].
#[derive(Debug, Clone)]
pub struct InputLayout {
    pub binding: vk::VertexInputBindingDescription,
    pub attributes: Vec<vk::VertexInputAttributeDescription>,
}

impl InputLayout {
    ///Layout without any vertex input, for shaders that generate their vertices.
    pub fn empty() -> Self {
        InputDescriptor::new().build_input_layout()
    }

    pub fn vertex_input_state(&self) -> vk::PipelineVertexInputStateCreateInfo<'_> {
        if self.attributes.is_empty() {
            vk::PipelineVertexInputStateCreateInfo::default()
        } else {
            vk::PipelineVertexInputStateCreateInfo::default()
                .vertex_binding_descriptions(core::slice::from_ref(&self.binding))
                .vertex_attribute_descriptions(&self.attributes)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stride_and_offsets_are_prefix_sums() {
        let formats = [
            InputFormat::Vec3,
            InputFormat::Color,
            InputFormat::Vec2,
            InputFormat::Float,
            InputFormat::Int,
        ];
        let mut desc = InputDescriptor::new();
        for (loc, f) in formats.iter().enumerate() {
            desc.add_item(loc as u32, *f).unwrap();
        }
        let layout = desc.build_input_layout();
        assert_eq!(layout.binding.stride, 12 + 16 + 8 + 4 + 4);
        assert_eq!(layout.binding.binding, 0);
        assert_eq!(layout.binding.input_rate, vk::VertexInputRate::VERTEX);

        let mut expected_offset = 0;
        for (attrib, f) in layout.attributes.iter().zip(formats.iter()) {
            assert_eq!(attrib.offset, expected_offset);
            assert_eq!(attrib.format, f.format());
            assert_eq!(attrib.binding, 0);
            expected_offset += f.size();
        }
    }

    #[test]
    fn matrices_take_consecutive_locations() {
        let layout = InputDescriptor::new()
            .with_item(0, InputFormat::Vec3)
            .and_then(|d| d.with_item(1, InputFormat::Mat4))
            .and_then(|d| d.with_item(5, InputFormat::Float))
            .unwrap()
            .build_input_layout();

        assert_eq!(layout.binding.stride, 12 + 64 + 4);
        let locs = layout
            .attributes
            .iter()
            .map(|a| (a.location, a.offset))
            .collect::<Vec<_>>();
        assert_eq!(
            locs,
            vec![(0, 0), (1, 12), (2, 28), (3, 44), (4, 60), (5, 76)]
        );
    }

    #[test]
    fn capacity_is_enforced() {
        let mut desc = InputDescriptor::with_capacity(2);
        desc.add_item(0, InputFormat::Vec3).unwrap();
        desc.add_item(1, InputFormat::Vec3).unwrap();
        assert_eq!(
            desc.add_item(2, InputFormat::Vec3),
            Err(MisuseError::InputCapacityExceeded { capacity: 2 })
        );
        assert_eq!(desc.items().len(), 2);
    }

    #[test]
    fn empty_layout_has_no_bindings() {
        let layout = InputLayout::empty();
        assert_eq!(layout.binding.stride, 0);
        let state = layout.vertex_input_state();
        assert_eq!(state.vertex_binding_description_count, 0);
        assert_eq!(state.vertex_attribute_description_count, 0);
    }

    #[test]
    fn sizes() {
        assert_eq!(InputFormat::Mat3.size(), 36);
        assert_eq!(InputFormat::Mat4.size(), 64);
        assert_eq!(InputFormat::Bool.size(), 4);
        assert_eq!(InputFormat::Color.size(), 16);
    }
}
