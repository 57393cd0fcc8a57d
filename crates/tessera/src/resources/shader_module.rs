use std::{borrow::Cow, ffi::CString, path::Path};

use ash::vk;
use smallvec::SmallVec;

use super::compiler::compile_glsl;
use crate::{
    context::Device,
    error::{CallSite, ShaderError},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Fragment,
}

impl ShaderStage {
    pub fn flags(&self) -> vk::ShaderStageFlags {
        match self {
            ShaderStage::Vertex => vk::ShaderStageFlags::VERTEX,
            ShaderStage::Fragment => vk::ShaderStageFlags::FRAGMENT,
        }
    }
}

impl From<ShaderStage> for vk::ShaderStageFlags {
    fn from(value: ShaderStage) -> Self {
        value.flags()
    }
}

///Where the code of a [ShaderModule] comes from. GLSL sources need the `shader_compiler` feature.
#[derive(Debug, Clone, Copy)]
pub enum ShaderSource<'a> {
    SpirV(&'a [u32]),
    SpirVFile(&'a Path),
    Glsl { source: &'a str, name: &'a str },
    GlslFile(&'a Path),
}

impl<'a> ShaderSource<'a> {
    ///`*.spv` files are loaded as SPIR-V, everything else is treated as GLSL.
    pub fn from_path(path: &'a Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some("spv") => ShaderSource::SpirVFile(path),
            _ => ShaderSource::GlslFile(path),
        }
    }

    fn load(self, stage: ShaderStage) -> Result<Cow<'a, [u32]>, ShaderError> {
        match self {
            ShaderSource::SpirV(code) => Ok(Cow::Borrowed(code)),
            ShaderSource::SpirVFile(path) => {
                let mut file = std::fs::File::open(path)?;
                Ok(Cow::Owned(ash::util::read_spv(&mut file)?))
            }
            ShaderSource::Glsl { source, name } => {
                Ok(Cow::Owned(compile_glsl(source, stage, name)?))
            }
            ShaderSource::GlslFile(path) => {
                let source = std::fs::read_to_string(path)?;
                let name = path.to_string_lossy();
                Ok(Cow::Owned(compile_glsl(&source, stage, &name)?))
            }
        }
    }
}

///Typed specialization constant value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SpecValue {
    ///Packed as a 32bit `VkBool32`.
    Bool(bool),
    Int(i32),
    Uint(u32),
    Float(f32),
    Double(f64),
}

impl SpecValue {
    pub fn size(&self) -> usize {
        match self {
            SpecValue::Double(_) => 8,
            _ => 4,
        }
    }

    pub fn bytes(&self) -> SmallVec<[u8; 8]> {
        match self {
            SpecValue::Bool(b) => SmallVec::from_slice(&(*b as u32).to_ne_bytes()),
            SpecValue::Int(i) => SmallVec::from_slice(&i.to_ne_bytes()),
            SpecValue::Uint(u) => SmallVec::from_slice(&u.to_ne_bytes()),
            SpecValue::Float(f) => SmallVec::from_slice(&f.to_ne_bytes()),
            SpecValue::Double(d) => SmallVec::from_slice(&d.to_ne_bytes()),
        }
    }
}

impl From<bool> for SpecValue {
    fn from(value: bool) -> Self {
        SpecValue::Bool(value)
    }
}

impl From<i32> for SpecValue {
    fn from(value: i32) -> Self {
        SpecValue::Int(value)
    }
}

impl From<u32> for SpecValue {
    fn from(value: u32) -> Self {
        SpecValue::Uint(value)
    }
}

impl From<f32> for SpecValue {
    fn from(value: f32) -> Self {
        SpecValue::Float(value)
    }
}

impl From<f64> for SpecValue {
    fn from(value: f64) -> Self {
        SpecValue::Double(value)
    }
}

///Ordered list of specialization constants.
///
/// Adding the same constant id twice is a usage error. Both values are packed and both map entries are kept,
/// which constant the driver ends up using is undefined.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Specialization {
    values: Vec<(u32, SpecValue)>,
}

impl Specialization {
    pub fn new() -> Self {
        Self::default()
    }

    ///Adds `value` for `constant_id`. Ids are not deduplicated, adding the same id twice is invalid usage.
    pub fn add(mut self, constant_id: u32, value: impl Into<SpecValue>) -> Self {
        self.values.push((constant_id, value.into()));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    ///Concatenates all values in insertion order and records one map entry per value.
    pub fn pack(&self) -> PackedSpecialization {
        let mut data = Vec::with_capacity(self.values.iter().map(|(_, v)| v.size()).sum());
        let mut entries = Vec::with_capacity(self.values.len());
        for (id, value) in &self.values {
            entries.push(
                vk::SpecializationMapEntry::default()
                    .constant_id(*id)
                    .offset(data.len() as u32)
                    .size(value.size()),
            );
            data.extend_from_slice(&value.bytes());
        }
        PackedSpecialization { data, entries }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PackedSpecialization {
    pub data: Vec<u8>,
    pub entries: Vec<vk::SpecializationMapEntry>,
}

impl PackedSpecialization {
    pub fn info(&self) -> vk::SpecializationInfo<'_> {
        vk::SpecializationInfo::default()
            .map_entries(&self.entries)
            .data(&self.data)
    }
}

///Loaded shader code for one stage.
pub struct ShaderModule<'d> {
    device: &'d Device,
    pub module: vk::ShaderModule,
    pub stage: ShaderStage,
}

impl<'d> ShaderModule<'d> {
    pub fn new(
        device: &'d Device,
        stage: ShaderStage,
        source: ShaderSource<'_>,
    ) -> Result<Self, ShaderError> {
        let code = source.load(stage)?;
        let create_info = vk::ShaderModuleCreateInfo::default().code(&code);
        let module = unsafe { device.inner.create_shader_module(&create_info, None) }
            .during("vkCreateShaderModule")?;
        Ok(ShaderModule {
            device,
            module,
            stage,
        })
    }

    ///Finalizes entry point and specialization constants for use in a pipeline.
    pub fn compile(
        &self,
        entry_point: &str,
        specialization: Specialization,
    ) -> Result<CompiledShader<'_>, ShaderError> {
        let entry_point = CString::new(entry_point)
            .map_err(|_| ShaderError::InvalidEntryPoint(entry_point.to_owned()))?;
        Ok(CompiledShader {
            module: self,
            entry_point,
            specialization: specialization.pack(),
        })
    }
}

impl Drop for ShaderModule<'_> {
    fn drop(&mut self) {
        if self.module != vk::ShaderModule::null() {
            unsafe { self.device.inner.destroy_shader_module(self.module, None) }
        }
    }
}

///Shader module ready for pipeline creation.
pub struct CompiledShader<'a> {
    pub module: &'a ShaderModule<'a>,
    pub entry_point: CString,
    pub specialization: PackedSpecialization,
}

impl CompiledShader<'_> {
    pub fn stage(&self) -> ShaderStage {
        self.module.stage
    }

    ///`specialization` must be the [info](PackedSpecialization::info) of this shader's packed constants.
    pub fn stage_create_info<'s>(
        &'s self,
        specialization: &'s vk::SpecializationInfo<'s>,
    ) -> vk::PipelineShaderStageCreateInfo<'s> {
        let info = vk::PipelineShaderStageCreateInfo::default()
            .stage(self.module.stage.flags())
            .module(self.module.module)
            .name(&self.entry_point);
        if self.specialization.entries.is_empty() {
            info
        } else {
            info.specialization_info(specialization)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offsets_accumulate_in_order() {
        let packed = Specialization::new()
            .add(0, true)
            .add(3, 2.5f64)
            .add(1, -7i32)
            .add(2, 1.0f32)
            .pack();

        assert_eq!(packed.data.len(), 4 + 8 + 4 + 4);
        let layout = packed
            .entries
            .iter()
            .map(|e| (e.constant_id, e.offset, e.size))
            .collect::<Vec<_>>();
        assert_eq!(layout, vec![(0, 0, 4), (3, 4, 8), (1, 12, 4), (2, 16, 4)]);

        assert_eq!(&packed.data[0..4], &1u32.to_ne_bytes());
        assert_eq!(&packed.data[4..12], &2.5f64.to_ne_bytes());
        assert_eq!(&packed.data[12..16], &(-7i32).to_ne_bytes());
    }

    #[test]
    fn duplicate_ids_are_kept() {
        let packed = Specialization::new().add(5, 1u32).add(5, 2u32).pack();
        assert_eq!(packed.entries.len(), 2);
        assert_eq!(packed.entries[0].constant_id, packed.entries[1].constant_id);
        assert_eq!(packed.entries[1].offset, 4);
    }

    #[test]
    fn empty_specialization() {
        let packed = Specialization::new().pack();
        assert!(packed.data.is_empty());
        let info = packed.info();
        assert_eq!(info.map_entry_count, 0);
        assert_eq!(info.data_size, 0);
    }

    #[test]
    fn source_from_extension() {
        assert!(matches!(
            ShaderSource::from_path(Path::new("shaders/triangle.vert.spv")),
            ShaderSource::SpirVFile(_)
        ));
        assert!(matches!(
            ShaderSource::from_path(Path::new("shaders/triangle.frag")),
            ShaderSource::GlslFile(_)
        ));
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = ShaderSource::SpirVFile(Path::new("does/not/exist.spv"))
            .load(ShaderStage::Vertex)
            .unwrap_err();
        assert!(matches!(err, ShaderError::FileError(_)));
    }
}
