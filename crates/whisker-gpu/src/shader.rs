//! SPIR-V shader modules.

use crate::device::{Device, ObjectTag};
use crate::error::{GpuError, Result};
use ash::vk;
use std::io::Cursor;
use whisker_core::ShaderStage;

const SPIRV_MAGIC: u32 = 0x0723_0203;

/// Decode SPIR-V bytes into words, accepting either endianness.
fn decode_spirv(code: &[u8]) -> Result<Vec<u32>> {
    let words = ash::util::read_spv(&mut Cursor::new(code))
        .map_err(|e| GpuError::ShaderCompilation(e.to_string()))?;
    match words.first() {
        Some(&SPIRV_MAGIC) => Ok(words),
        Some(&other) => Err(GpuError::ShaderCompilation(format!(
            "bad SPIR-V magic number {other:#010x}"
        ))),
        None => Err(GpuError::ShaderCompilation("empty SPIR-V module".to_string())),
    }
}

/// A compiled shader module for one stage.
pub struct Shader {
    pub(crate) tag: ObjectTag,
    stage: ShaderStage,
    pub(crate) module: vk::ShaderModule,
}

impl Shader {
    pub(crate) fn new(device: &Device, stage: ShaderStage, code: &[u8]) -> Result<Self> {
        let words = decode_spirv(code)?;
        let module = device.driver().create_shader_module(&words)?;
        tracing::debug!("Created {:?} shader ({} words)", stage, words.len());
        Ok(Self {
            tag: device.tag(),
            stage,
            module,
        })
    }

    pub fn stage(&self) -> ShaderStage {
        self.stage
    }

    pub(crate) fn destroy(self, device: &Device) {
        device.driver().destroy_shader_module(self.module);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Smallest byte stream that passes header validation.
    pub(crate) fn spirv_header() -> Vec<u8> {
        let words: [u32; 5] = [SPIRV_MAGIC, 0x0001_0000, 0, 1, 0];
        bytemuck::cast_slice(&words).to_vec()
    }

    #[test]
    fn accepts_a_valid_header() {
        let device = Device::headless();
        let shader = Shader::new(&device, ShaderStage::Vertex, &spirv_header()).unwrap();
        assert_eq!(shader.stage(), ShaderStage::Vertex);
        shader.destroy(&device);
        assert_eq!(device.headless_driver().unwrap().live_objects(), 0);
    }

    #[test]
    fn rejects_bad_magic_and_truncated_code() {
        let device = Device::headless();
        let mut code = spirv_header();
        code[0] = 0;
        assert!(matches!(
            Shader::new(&device, ShaderStage::Fragment, &code),
            Err(GpuError::ShaderCompilation(_))
        ));

        let truncated = &spirv_header()[..6];
        assert!(matches!(
            Shader::new(&device, ShaderStage::Fragment, truncated),
            Err(GpuError::ShaderCompilation(_))
        ));
        assert!(Shader::new(&device, ShaderStage::Fragment, &[]).is_err());
    }
}
