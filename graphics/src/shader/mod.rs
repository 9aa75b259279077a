//! Embedded shader program and its compilation to SPIR-V.
//!
//! Every pipeline runs the same vertex/fragment pair from [`SPRITE_SHADER_SOURCE`]:
//! the vertex stage maps pixel coordinates to clip space with an orthographic
//! projection built from the viewport size and premultiplies the vertex color,
//! the fragment stage multiplies that color with a texture sample.
//!
//! Compilation goes through naga (WGSL → validated IR → SPIR-V 1.3), so it does
//! not depend on the backend.

use crate::error::GraphicsError;

/// WGSL source of the 2D triangle program.
pub const SPRITE_SHADER_SOURCE: &str = include_str!("sprite.wgsl");

/// Vertex entry point of [`SPRITE_SHADER_SOURCE`].
pub const VERTEX_ENTRY_POINT: &str = "vs_main";

/// Fragment entry point of [`SPRITE_SHADER_SOURCE`].
pub const FRAGMENT_ENTRY_POINT: &str = "fs_main";

/// SPIR-V of a vertex/fragment program pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledProgram {
    pub vertex: Vec<u32>,
    pub fragment: Vec<u32>,
}

/// Compile the vertex and fragment entry points of a WGSL source.
pub fn compile_program(
    source: &str,
    vertex_entry: &str,
    fragment_entry: &str,
) -> Result<CompiledProgram, GraphicsError> {
    let module = naga::front::wgsl::parse_str(source).map_err(|e| {
        GraphicsError::ShaderCompilation(format!("WGSL parse error: {}", e.emit_to_string(source)))
    })?;

    let mut validator = naga::valid::Validator::new(
        naga::valid::ValidationFlags::all(),
        naga::valid::Capabilities::empty(),
    );
    let info = validator
        .validate(&module)
        .map_err(|e| GraphicsError::ShaderCompilation(format!("validation error: {e}")))?;

    let vertex = write_stage(&module, &info, naga::ShaderStage::Vertex, vertex_entry)?;
    let fragment = write_stage(&module, &info, naga::ShaderStage::Fragment, fragment_entry)?;
    log::debug!(
        "Compiled shader program ({} + {} SPIR-V words)",
        vertex.len(),
        fragment.len()
    );
    Ok(CompiledProgram { vertex, fragment })
}

fn write_stage(
    module: &naga::Module,
    info: &naga::valid::ModuleInfo,
    stage: naga::ShaderStage,
    entry_point: &str,
) -> Result<Vec<u32>, GraphicsError> {
    if !module
        .entry_points
        .iter()
        .any(|ep| ep.name == entry_point && ep.stage == stage)
    {
        return Err(GraphicsError::ShaderCompilation(format!(
            "entry point '{entry_point}' not found for stage {stage:?}"
        )));
    }

    // WGSL clip space has +Y up; let naga flip it for Vulkan.
    let options = naga::back::spv::Options {
        lang_version: (1, 3),
        flags: naga::back::spv::WriterFlags::ADJUST_COORDINATE_SPACE,
        capabilities: None,
        bounds_check_policies: naga::proc::BoundsCheckPolicies::default(),
        binding_map: Default::default(),
        debug_info: None,
        zero_initialize_workgroup_memory: naga::back::spv::ZeroInitializeWorkgroupMemoryMode::None,
    };

    let pipeline_options = naga::back::spv::PipelineOptions {
        shader_stage: stage,
        entry_point: entry_point.to_string(),
    };

    naga::back::spv::write_vec(module, info, &options, Some(&pipeline_options))
        .map_err(|e| GraphicsError::ShaderCompilation(format!("SPIR-V generation error: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SPIRV_MAGIC: u32 = 0x0723_0203;

    #[test]
    fn test_sprite_program_compiles() {
        let program =
            compile_program(SPRITE_SHADER_SOURCE, VERTEX_ENTRY_POINT, FRAGMENT_ENTRY_POINT)
                .unwrap();
        assert_eq!(program.vertex[0], SPIRV_MAGIC);
        assert_eq!(program.fragment[0], SPIRV_MAGIC);
        assert_ne!(program.vertex, program.fragment);
    }

    #[test]
    fn test_parse_error_is_reported() {
        let err = compile_program("fn broken(", "vs_main", "fs_main").unwrap_err();
        assert!(matches!(err, GraphicsError::ShaderCompilation(_)));
    }

    #[test]
    fn test_missing_entry_point() {
        let err = compile_program(SPRITE_SHADER_SOURCE, "main", FRAGMENT_ENTRY_POINT).unwrap_err();
        let GraphicsError::ShaderCompilation(message) = err else {
            panic!("unexpected error {err:?}");
        };
        assert!(message.contains("'main'"));
    }
}
