//! Shader module resource.

use std::sync::Arc;

use crate::backend::{GpuBackend, ShaderHandle, ShaderStageInfo};
use crate::device::GraphicsDevice;
use crate::error::GraphicsError;
use crate::types::{ShaderDescriptor, ShaderStage};

/// First word of every SPIR-V module.
pub const SPIRV_MAGIC: u32 = 0x0723_0203;

/// A compiled SPIR-V shader module.
pub struct Shader {
    backend: Arc<dyn GpuBackend>,
    handle: ShaderHandle,
    descriptor: ShaderDescriptor,
}

impl Shader {
    pub(crate) fn new(
        device: &Arc<GraphicsDevice>,
        descriptor: ShaderDescriptor,
    ) -> Result<Self, GraphicsError> {
        let code = &descriptor.code;
        if code.len() < 4 || code.len() % 4 != 0 {
            return Err(GraphicsError::InvalidParameter(format!(
                "SPIR-V length {} is not a non-zero multiple of 4",
                code.len()
            )));
        }
        let magic = u32::from_le_bytes([code[0], code[1], code[2], code[3]]);
        if magic != SPIRV_MAGIC {
            return Err(GraphicsError::InvalidParameter(format!(
                "bad SPIR-V magic {magic:#010x}"
            )));
        }
        if descriptor.entry_point.is_empty() {
            return Err(GraphicsError::InvalidParameter(
                "shader entry point must not be empty".to_string(),
            ));
        }

        let backend = Arc::clone(device.backend());
        let handle = backend.create_shader(&descriptor)?;
        log::trace!(
            "GraphicsDevice: created {:?} shader {:?}",
            descriptor.stage,
            descriptor.label
        );
        Ok(Self {
            backend,
            handle,
            descriptor,
        })
    }

    /// Get the backend handle.
    pub fn handle(&self) -> ShaderHandle {
        self.handle
    }

    /// Get the stage this module runs in.
    pub fn stage(&self) -> ShaderStage {
        self.descriptor.stage
    }

    /// Get the entry point name.
    pub fn entry_point(&self) -> &str {
        &self.descriptor.entry_point
    }

    pub(crate) fn stage_info(&self) -> ShaderStageInfo {
        ShaderStageInfo {
            shader: self.handle,
            stage: self.descriptor.stage,
            entry_point: self.descriptor.entry_point.clone(),
        }
    }
}

impl Drop for Shader {
    fn drop(&mut self) {
        self.backend.destroy_shader(self.handle);
    }
}

impl std::fmt::Debug for Shader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shader")
            .field("stage", &self.descriptor.stage)
            .field("entry_point", &self.descriptor.entry_point)
            .field("label", &self.descriptor.label)
            .finish()
    }
}

static_assertions::assert_impl_all!(Shader: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::test_device;

    fn spirv(words: usize) -> Vec<u8> {
        let mut code = SPIRV_MAGIC.to_le_bytes().to_vec();
        code.resize(words * 4, 0);
        code
    }

    #[test]
    fn test_accepts_spirv() {
        let (device, _backend) = test_device();
        let shader = device
            .create_shader(&ShaderDescriptor::new(ShaderStage::Compute, spirv(5)))
            .unwrap();
        assert_eq!(shader.stage(), ShaderStage::Compute);
        assert_eq!(shader.entry_point(), "main");
    }

    #[test]
    fn test_rejects_malformed_code() {
        let (device, _backend) = test_device();
        let mut unaligned = spirv(2);
        unaligned.push(0);
        let cases = [
            ShaderDescriptor::new(ShaderStage::Vertex, Vec::new()),
            ShaderDescriptor::new(ShaderStage::Vertex, unaligned),
            ShaderDescriptor::new(ShaderStage::Vertex, vec![0u8; 8]),
            ShaderDescriptor::new(ShaderStage::Vertex, spirv(2)).with_entry_point(""),
        ];
        for desc in cases {
            assert!(device.create_shader(&desc).is_err());
        }
    }
}
