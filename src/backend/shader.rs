// Shader module loading
//
// Vulkan consumes SPIR-V bytecode. The build script compiles GLSL sources
// into `shaders/<demo>/<name>.spv`; this module loads them at startup.

use super::VulkanDevice;
use anyhow::{Context, Result};
use ash::vk;
use std::fs::File;
use std::path::Path;

/// Load a compiled SPIR-V file and create a shader module from it
pub fn load_shader_module(
    device: &VulkanDevice,
    shader_dir: &Path,
    name: &str,
) -> Result<vk::ShaderModule> {
    let path = shader_dir.join(format!("{name}.spv"));
    let mut file =
        File::open(&path).with_context(|| format!("Failed to open shader {:?}", path))?;

    // read_spv handles the byte-to-word conversion and alignment
    let code = ash::util::read_spv(&mut file)
        .with_context(|| format!("Failed to read SPIR-V from {:?}", path))?;

    let create_info = vk::ShaderModuleCreateInfo::builder().code(&code);

    unsafe {
        device
            .device
            .create_shader_module(&create_info, None)
            .with_context(|| format!("Failed to create shader module for {:?}", path))
    }
}

/// Shader stage entry point, shared by every pipeline
pub const SHADER_ENTRY: &std::ffi::CStr =
    unsafe { std::ffi::CStr::from_bytes_with_nul_unchecked(b"main\0") };
