//! Pipeline states.
//!
//! A [`GraphicsState`] is an immutable graphics pipeline compiled against a
//! [`Pass`] shape; a [`ComputeState`] is an immutable compute pipeline. Both
//! own their pipeline layout, built from the descriptor tables they bind.

use std::sync::Arc;

use crate::backend::{
    ComputePipelineInfo, GpuBackend, GraphicsPipelineInfo, PipelineHandle, PipelineLayoutHandle,
};
use crate::device::GraphicsDevice;
use crate::error::GraphicsError;
use crate::pass::Pass;
use crate::resources::{DcTable, Shader};
use crate::types::{
    CullMode, DeviceLimits, Format, PolygonMode, ShaderStage, Topology, VertexInput, Winding,
};

/// Configuration of a graphics pipeline.
///
/// # Example
///
/// ```ignore
/// let config = GraphicsStateConfig::new(pass, vec![vertex_shader, fragment_shader])
///     .with_dc_tables(vec![table])
///     .with_vertex_input(VertexInput::new(12, vec![VertexAttribute::new(0, Format::Rgb32Float, 0)]))
///     .with_cull_mode(CullMode::Back);
/// let state = device.create_graphics_state(config)?;
/// ```
#[derive(Debug, Clone)]
pub struct GraphicsStateConfig {
    pub pass: Arc<Pass>,
    pub shaders: Vec<Arc<Shader>>,
    pub dc_tables: Vec<Arc<DcTable>>,
    pub vertex_inputs: Vec<VertexInput>,
    pub topology: Topology,
    pub polygon_mode: PolygonMode,
    pub cull_mode: CullMode,
    pub winding: Winding,
}

impl GraphicsStateConfig {
    /// Create a configuration with default fixed-function settings.
    pub fn new(pass: Arc<Pass>, shaders: Vec<Arc<Shader>>) -> Self {
        Self {
            pass,
            shaders,
            dc_tables: Vec::new(),
            vertex_inputs: Vec::new(),
            topology: Topology::default(),
            polygon_mode: PolygonMode::default(),
            cull_mode: CullMode::default(),
            winding: Winding::default(),
        }
    }

    /// Set the descriptor tables, in set order.
    pub fn with_dc_tables(mut self, dc_tables: Vec<Arc<DcTable>>) -> Self {
        self.dc_tables = dc_tables;
        self
    }

    /// Append a vertex input binding.
    pub fn with_vertex_input(mut self, input: VertexInput) -> Self {
        self.vertex_inputs.push(input);
        self
    }

    /// Set the primitive topology.
    pub fn with_topology(mut self, topology: Topology) -> Self {
        self.topology = topology;
        self
    }

    /// Set the polygon mode.
    pub fn with_polygon_mode(mut self, polygon_mode: PolygonMode) -> Self {
        self.polygon_mode = polygon_mode;
        self
    }

    /// Set the cull mode.
    pub fn with_cull_mode(mut self, cull_mode: CullMode) -> Self {
        self.cull_mode = cull_mode;
        self
    }

    /// Set the front face winding.
    pub fn with_winding(mut self, winding: Winding) -> Self {
        self.winding = winding;
        self
    }

    fn validate(&self, limits: &DeviceLimits) -> Result<(), GraphicsError> {
        let invalid = |msg: String| Err(GraphicsError::InvalidParameter(msg));

        if self.shaders.is_empty() {
            return invalid("graphics state needs at least one shader".to_string());
        }
        for (i, shader) in self.shaders.iter().enumerate() {
            if shader.stage() == ShaderStage::Compute {
                return invalid("compute shader in a graphics state".to_string());
            }
            if self.shaders[..i].iter().any(|s| s.stage() == shader.stage()) {
                return invalid(format!("duplicate {:?} shader", shader.stage()));
            }
        }
        if !self.shaders.iter().any(|s| s.stage() == ShaderStage::Vertex) {
            return invalid("graphics state needs a vertex shader".to_string());
        }

        validate_dc_tables(&self.dc_tables, limits)?;

        if self.vertex_inputs.len() > limits.max_vertex_inputs as usize {
            return invalid(format!(
                "{} vertex inputs exceed the limit of {}",
                self.vertex_inputs.len(),
                limits.max_vertex_inputs
            ));
        }
        let mut locations = Vec::new();
        for attribute in self.vertex_inputs.iter().flat_map(|input| &input.attributes) {
            if attribute.format == Format::Undefined || attribute.format.is_depth_stencil() {
                return invalid(format!(
                    "vertex attribute {} has unusable format {:?}",
                    attribute.location, attribute.format
                ));
            }
            if locations.contains(&attribute.location) {
                return invalid(format!(
                    "duplicate vertex attribute location {}",
                    attribute.location
                ));
            }
            locations.push(attribute.location);
        }
        Ok(())
    }
}

fn validate_dc_tables(dc_tables: &[Arc<DcTable>], limits: &DeviceLimits) -> Result<(), GraphicsError> {
    if dc_tables.len() > limits.max_bound_dc_tables as usize {
        return Err(GraphicsError::InvalidParameter(format!(
            "{} descriptor tables exceed the limit of {}",
            dc_tables.len(),
            limits.max_bound_dc_tables
        )));
    }
    Ok(())
}

fn create_layout(
    backend: &Arc<dyn GpuBackend>,
    dc_tables: &[Arc<DcTable>],
) -> Result<PipelineLayoutHandle, GraphicsError> {
    let layouts: Vec<_> = dc_tables.iter().map(|table| table.layout()).collect();
    Ok(backend.create_pipeline_layout(&layouts)?)
}

/// An immutable graphics pipeline.
pub struct GraphicsState {
    backend: Arc<dyn GpuBackend>,
    config: GraphicsStateConfig,
    layout: PipelineLayoutHandle,
    pipeline: PipelineHandle,
}

impl GraphicsState {
    pub(crate) fn new(
        device: &Arc<GraphicsDevice>,
        config: GraphicsStateConfig,
    ) -> Result<Self, GraphicsError> {
        config.validate(device.limits())?;

        let backend = Arc::clone(device.backend());
        let render_pass = config.pass.compatible_render_pass()?;
        let layout = create_layout(&backend, &config.dc_tables)?;
        let info = GraphicsPipelineInfo {
            layout,
            render_pass,
            stages: config.shaders.iter().map(|s| s.stage_info()).collect(),
            vertex_inputs: config.vertex_inputs.clone(),
            topology: config.topology,
            polygon_mode: config.polygon_mode,
            cull_mode: config.cull_mode,
            winding: config.winding,
            color_count: config.pass.colors().len() as u32,
            samples: config.pass.samples(),
            depth_stencil: config.pass.depth_stencil().map(|desc| desc.format),
        };
        let pipeline = match backend.create_graphics_pipeline(&info) {
            Ok(pipeline) => pipeline,
            Err(e) => {
                backend.destroy_pipeline_layout(layout);
                return Err(e.into());
            }
        };
        log::debug!(
            "GraphicsDevice: created graphics state with {} shaders, {} tables",
            config.shaders.len(),
            config.dc_tables.len()
        );

        Ok(Self {
            backend,
            config,
            layout,
            pipeline,
        })
    }

    /// Get the configuration.
    pub fn config(&self) -> &GraphicsStateConfig {
        &self.config
    }

    /// Get the pass this state was compiled against.
    pub fn pass(&self) -> &Arc<Pass> {
        &self.config.pass
    }

    /// Get the descriptor tables, in set order.
    pub fn dc_tables(&self) -> &[Arc<DcTable>] {
        &self.config.dc_tables
    }

    pub(crate) fn layout(&self) -> PipelineLayoutHandle {
        self.layout
    }

    pub(crate) fn pipeline(&self) -> PipelineHandle {
        self.pipeline
    }
}

impl Drop for GraphicsState {
    fn drop(&mut self) {
        self.backend.destroy_pipeline(self.pipeline);
        self.backend.destroy_pipeline_layout(self.layout);
    }
}

impl std::fmt::Debug for GraphicsState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphicsState")
            .field("pipeline", &self.pipeline)
            .field("topology", &self.config.topology)
            .field("shaders", &self.config.shaders.len())
            .finish()
    }
}

/// Configuration of a compute pipeline.
#[derive(Debug, Clone)]
pub struct ComputeStateConfig {
    pub shader: Arc<Shader>,
    pub dc_tables: Vec<Arc<DcTable>>,
}

impl ComputeStateConfig {
    /// Create a configuration for a compute shader.
    pub fn new(shader: Arc<Shader>) -> Self {
        Self {
            shader,
            dc_tables: Vec::new(),
        }
    }

    /// Set the descriptor tables, in set order.
    pub fn with_dc_tables(mut self, dc_tables: Vec<Arc<DcTable>>) -> Self {
        self.dc_tables = dc_tables;
        self
    }
}

/// An immutable compute pipeline.
pub struct ComputeState {
    backend: Arc<dyn GpuBackend>,
    config: ComputeStateConfig,
    layout: PipelineLayoutHandle,
    pipeline: PipelineHandle,
}

impl ComputeState {
    pub(crate) fn new(
        device: &Arc<GraphicsDevice>,
        config: ComputeStateConfig,
    ) -> Result<Self, GraphicsError> {
        if config.shader.stage() != ShaderStage::Compute {
            return Err(GraphicsError::InvalidParameter(format!(
                "compute state needs a compute shader, got {:?}",
                config.shader.stage()
            )));
        }
        validate_dc_tables(&config.dc_tables, device.limits())?;

        let backend = Arc::clone(device.backend());
        let layout = create_layout(&backend, &config.dc_tables)?;
        let info = ComputePipelineInfo {
            layout,
            stage: config.shader.stage_info(),
        };
        let pipeline = match backend.create_compute_pipeline(&info) {
            Ok(pipeline) => pipeline,
            Err(e) => {
                backend.destroy_pipeline_layout(layout);
                return Err(e.into());
            }
        };
        log::debug!(
            "GraphicsDevice: created compute state with {} tables",
            config.dc_tables.len()
        );

        Ok(Self {
            backend,
            config,
            layout,
            pipeline,
        })
    }

    /// Get the configuration.
    pub fn config(&self) -> &ComputeStateConfig {
        &self.config
    }

    /// Get the descriptor tables, in set order.
    pub fn dc_tables(&self) -> &[Arc<DcTable>] {
        &self.config.dc_tables
    }

    pub(crate) fn layout(&self) -> PipelineLayoutHandle {
        self.layout
    }

    pub(crate) fn pipeline(&self) -> PipelineHandle {
        self.pipeline
    }
}

impl Drop for ComputeState {
    fn drop(&mut self) {
        self.backend.destroy_pipeline(self.pipeline);
        self.backend.destroy_pipeline_layout(self.layout);
    }
}

impl std::fmt::Debug for ComputeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComputeState")
            .field("pipeline", &self.pipeline)
            .field("entry_point", &self.config.shader.entry_point())
            .finish()
    }
}

static_assertions::assert_impl_all!(GraphicsState: Send, Sync);
static_assertions::assert_impl_all!(ComputeState: Send, Sync);

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::backend::DummyFailure;
    use crate::device::test_device;
    use crate::resources::SPIRV_MAGIC;
    use crate::types::{AttachmentDesc, DcEntry, DcType, ShaderDescriptor, VertexAttribute};

    pub(crate) fn shader(device: &Arc<GraphicsDevice>, stage: ShaderStage) -> Arc<Shader> {
        let mut code = SPIRV_MAGIC.to_le_bytes().to_vec();
        code.resize(20, 0);
        device
            .create_shader(&ShaderDescriptor::new(stage, code))
            .unwrap()
    }

    fn pass(device: &Arc<GraphicsDevice>) -> Arc<Pass> {
        device
            .create_pass(&[AttachmentDesc::single(Format::Rgba8Unorm)], &[], None)
            .unwrap()
    }

    #[test]
    fn test_graphics_state_shader_rules() {
        let (device, _backend) = test_device();
        let pass = pass(&device);
        let vs = shader(&device, ShaderStage::Vertex);
        let fs = shader(&device, ShaderStage::Fragment);
        let cs = shader(&device, ShaderStage::Compute);

        let ok = GraphicsStateConfig::new(pass.clone(), vec![vs.clone(), fs.clone()]);
        assert!(device.create_graphics_state(ok).is_ok());

        let cases = [
            vec![],
            vec![fs.clone()],
            vec![vs.clone(), vs.clone()],
            vec![vs.clone(), cs.clone()],
        ];
        for shaders in cases {
            let config = GraphicsStateConfig::new(pass.clone(), shaders);
            assert!(device.create_graphics_state(config).is_err());
        }
    }

    #[test]
    fn test_vertex_input_rules() {
        let (device, _backend) = test_device();
        let pass = pass(&device);
        let vs = shader(&device, ShaderStage::Vertex);

        let depth_attr = GraphicsStateConfig::new(pass.clone(), vec![vs.clone()]).with_vertex_input(
            VertexInput::new(4, vec![VertexAttribute::new(0, Format::D32Float, 0)]),
        );
        assert!(device.create_graphics_state(depth_attr).is_err());

        let duplicate = GraphicsStateConfig::new(pass.clone(), vec![vs.clone()]).with_vertex_input(
            VertexInput::new(
                8,
                vec![
                    VertexAttribute::new(0, Format::R32Float, 0),
                    VertexAttribute::new(0, Format::R32Float, 4),
                ],
            ),
        );
        assert!(device.create_graphics_state(duplicate).is_err());

        let mut too_many = GraphicsStateConfig::new(pass, vec![vs]);
        for _ in 0..17 {
            too_many = too_many.with_vertex_input(VertexInput::new(4, Vec::new()));
        }
        assert!(device.create_graphics_state(too_many).is_err());
    }

    #[test]
    fn test_pipeline_failure_releases_layout() {
        let (device, backend) = test_device();
        let table = device
            .create_dc_table(&[DcEntry::new(0, DcType::Uniform, 1)])
            .unwrap();
        let config = ComputeStateConfig::new(shader(&device, ShaderStage::Compute))
            .with_dc_tables(vec![table]);

        backend.fail_next(DummyFailure::CreatePipeline);
        assert!(device.create_compute_state(config.clone()).is_err());
        assert_eq!(backend.live_count("pipeline_layout"), 0);

        let state = device.create_compute_state(config).unwrap();
        assert_eq!(state.dc_tables().len(), 1);
        drop(state);
        assert_eq!(backend.live_count("pipeline"), 0);
    }

    #[test]
    fn test_compute_state_requires_compute_shader() {
        let (device, _backend) = test_device();
        let config = ComputeStateConfig::new(shader(&device, ShaderStage::Fragment));
        assert!(device.create_compute_state(config).is_err());
    }
}
