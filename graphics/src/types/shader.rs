//! Shader descriptors.

/// Pipeline stage a shader module runs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Fragment,
    Compute,
}

/// Descriptor for creating a shader module from SPIR-V.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ShaderDescriptor {
    /// Debug label for the shader.
    pub label: Option<String>,
    /// Stage the module is used in.
    pub stage: ShaderStage,
    /// Entry point function name.
    pub entry_point: String,
    /// SPIR-V bytecode. Length must be a multiple of four.
    pub code: Vec<u8>,
}

impl ShaderDescriptor {
    /// Create a new shader descriptor with the `main` entry point.
    pub fn new(stage: ShaderStage, code: impl Into<Vec<u8>>) -> Self {
        Self {
            label: None,
            stage,
            entry_point: "main".to_string(),
            code: code.into(),
        }
    }

    /// Set the debug label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Set the entry point.
    pub fn with_entry_point(mut self, entry_point: impl Into<String>) -> Self {
        self.entry_point = entry_point.into();
        self
    }
}
