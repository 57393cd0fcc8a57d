//! GLSL to SPIR-V compilation through shaderc. Without the `shader_compiler` feature only SPIR-V sources can be loaded.

use super::ShaderStage;
use crate::error::ShaderError;

///Compiles `source` for `stage`, targeting Vulkan 1.2 and SPIR-V 1.5. `name` is used in diagnostics only.
#[cfg(feature = "shader_compiler")]
pub fn compile_glsl(source: &str, stage: ShaderStage, name: &str) -> Result<Vec<u32>, ShaderError> {
    let compiler = shaderc::Compiler::new().ok_or(ShaderError::CompilerUnavailable)?;
    let mut options = shaderc::CompileOptions::new().ok_or(ShaderError::CompilerUnavailable)?;
    options.set_target_env(
        shaderc::TargetEnv::Vulkan,
        shaderc::EnvVersion::Vulkan1_2 as u32,
    );
    options.set_target_spirv(shaderc::SpirvVersion::V1_5);

    let kind = match stage {
        ShaderStage::Vertex => shaderc::ShaderKind::Vertex,
        ShaderStage::Fragment => shaderc::ShaderKind::Fragment,
    };

    let artifact = compiler
        .compile_into_spirv(source, kind, name, "main", Some(&options))
        .map_err(|e| ShaderError::Compilation {
            name: name.to_owned(),
            diagnostic: e.to_string(),
        })?;

    if artifact.get_num_warnings() > 0 {
        #[cfg(feature = "logging")]
        log::warn!("{}: {}", name, artifact.get_warning_messages());
    }

    Ok(artifact.as_binary().to_vec())
}

#[cfg(not(feature = "shader_compiler"))]
pub fn compile_glsl(
    _source: &str,
    _stage: ShaderStage,
    _name: &str,
) -> Result<Vec<u32>, ShaderError> {
    Err(ShaderError::CompilerUnavailable)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(not(feature = "shader_compiler"))]
    #[test]
    fn glsl_needs_compiler() {
        assert!(matches!(
            compile_glsl("void main() {}", ShaderStage::Vertex, "empty.vert"),
            Err(ShaderError::CompilerUnavailable)
        ));
    }

    #[cfg(feature = "shader_compiler")]
    #[test]
    fn compiles_minimal_vertex_shader() {
        let src = "#version 450\nvoid main() { gl_Position = vec4(0.0); }\n";
        let words = compile_glsl(src, ShaderStage::Vertex, "minimal.vert").unwrap();
        assert_eq!(words[0], 0x0723_0203);
    }

    #[cfg(feature = "shader_compiler")]
    #[test]
    fn diagnostics_name_the_source() {
        let err = compile_glsl("#version 450\nvoid main() { nope }\n", ShaderStage::Fragment, "broken.frag")
            .unwrap_err();
        match err {
            ShaderError::Compilation { name, diagnostic } => {
                assert_eq!(name, "broken.frag");
                assert!(diagnostic.contains("broken.frag"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }
}
