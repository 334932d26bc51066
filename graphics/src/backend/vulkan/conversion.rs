//! Type conversions between cmdgfx types and Vulkan types.
//!
//! Every function here is pure. Values without a Vulkan equivalent are
//! rejected with [`BackendError::InvalidParameter`] instead of being replaced
//! by a default.

use ash::vk;

use crate::backend::BackendError;
use crate::types::{
    AddressMode, Aspect, BufferUsage, ClearValue, CompareFunction, CullMode, DcType, FilterMode,
    Format, ImageUsage, ImageViewDimension, IndexType, LoadOp, PipelineStage, PolygonMode,
    Samples, ShaderStage, StoreOp, Topology, VertexStepMode, Winding,
};

/// Convert a pixel format to a Vulkan format.
pub fn convert_format(format: Format) -> Result<vk::Format, BackendError> {
    let vk_format = match format {
        Format::Undefined => {
            return Err(BackendError::InvalidParameter(
                "undefined format has no Vulkan equivalent".to_string(),
            ));
        }

        // 8-bit formats
        Format::R8Unorm => vk::Format::R8_UNORM,
        Format::R8Snorm => vk::Format::R8_SNORM,
        Format::R8Uint => vk::Format::R8_UINT,
        Format::R8Sint => vk::Format::R8_SINT,

        // 16-bit formats
        Format::R16Uint => vk::Format::R16_UINT,
        Format::R16Sint => vk::Format::R16_SINT,
        Format::R16Float => vk::Format::R16_SFLOAT,
        Format::Rg8Unorm => vk::Format::R8G8_UNORM,
        Format::Rg8Snorm => vk::Format::R8G8_SNORM,
        Format::Rg8Uint => vk::Format::R8G8_UINT,
        Format::Rg8Sint => vk::Format::R8G8_SINT,

        // 32-bit formats
        Format::R32Uint => vk::Format::R32_UINT,
        Format::R32Sint => vk::Format::R32_SINT,
        Format::R32Float => vk::Format::R32_SFLOAT,
        Format::Rg16Uint => vk::Format::R16G16_UINT,
        Format::Rg16Sint => vk::Format::R16G16_SINT,
        Format::Rg16Float => vk::Format::R16G16_SFLOAT,
        Format::Rgba8Unorm => vk::Format::R8G8B8A8_UNORM,
        Format::Rgba8Srgb => vk::Format::R8G8B8A8_SRGB,
        Format::Rgba8Snorm => vk::Format::R8G8B8A8_SNORM,
        Format::Rgba8Uint => vk::Format::R8G8B8A8_UINT,
        Format::Rgba8Sint => vk::Format::R8G8B8A8_SINT,
        Format::Bgra8Unorm => vk::Format::B8G8R8A8_UNORM,
        Format::Bgra8Srgb => vk::Format::B8G8R8A8_SRGB,
        Format::Rgb10a2Unorm => vk::Format::A2B10G10R10_UNORM_PACK32,
        Format::Rg11b10Float => vk::Format::B10G11R11_UFLOAT_PACK32,

        // 64-bit formats
        Format::Rg32Uint => vk::Format::R32G32_UINT,
        Format::Rg32Sint => vk::Format::R32G32_SINT,
        Format::Rg32Float => vk::Format::R32G32_SFLOAT,
        Format::Rgba16Uint => vk::Format::R16G16B16A16_UINT,
        Format::Rgba16Sint => vk::Format::R16G16B16A16_SINT,
        Format::Rgba16Float => vk::Format::R16G16B16A16_SFLOAT,

        // 96/128-bit formats
        Format::Rgb32Float => vk::Format::R32G32B32_SFLOAT,
        Format::Rgba32Uint => vk::Format::R32G32B32A32_UINT,
        Format::Rgba32Sint => vk::Format::R32G32B32A32_SINT,
        Format::Rgba32Float => vk::Format::R32G32B32A32_SFLOAT,

        // Depth/stencil formats
        Format::D16Unorm => vk::Format::D16_UNORM,
        Format::D32Float => vk::Format::D32_SFLOAT,
        Format::S8 => vk::Format::S8_UINT,
        Format::D24UnormS8 => vk::Format::D24_UNORM_S8_UINT,
        Format::D32FloatS8 => vk::Format::D32_SFLOAT_S8_UINT,
    };
    Ok(vk_format)
}

/// Convert a surface format reported by the presentation engine.
///
/// Only formats swapchains commonly expose are recognized.
pub fn format_from_vk(format: vk::Format) -> Option<Format> {
    match format {
        vk::Format::B8G8R8A8_SRGB => Some(Format::Bgra8Srgb),
        vk::Format::B8G8R8A8_UNORM => Some(Format::Bgra8Unorm),
        vk::Format::R8G8B8A8_SRGB => Some(Format::Rgba8Srgb),
        vk::Format::R8G8B8A8_UNORM => Some(Format::Rgba8Unorm),
        vk::Format::A2B10G10R10_UNORM_PACK32 => Some(Format::Rgb10a2Unorm),
        vk::Format::R16G16B16A16_SFLOAT => Some(Format::Rgba16Float),
        _ => None,
    }
}

/// Convert a sample count.
pub fn convert_samples(samples: Samples) -> vk::SampleCountFlags {
    match samples {
        Samples::S1 => vk::SampleCountFlags::TYPE_1,
        Samples::S2 => vk::SampleCountFlags::TYPE_2,
        Samples::S4 => vk::SampleCountFlags::TYPE_4,
        Samples::S8 => vk::SampleCountFlags::TYPE_8,
        Samples::S16 => vk::SampleCountFlags::TYPE_16,
        Samples::S32 => vk::SampleCountFlags::TYPE_32,
        Samples::S64 => vk::SampleCountFlags::TYPE_64,
    }
}

/// Convert image aspects.
pub fn convert_aspect(aspect: Aspect) -> Result<vk::ImageAspectFlags, BackendError> {
    if aspect.is_empty() {
        return Err(BackendError::InvalidParameter(
            "empty image aspect".to_string(),
        ));
    }
    Ok(aspect_flags(aspect))
}

/// Convert image aspects already checked to be non-empty.
pub fn aspect_flags(aspect: Aspect) -> vk::ImageAspectFlags {
    let mut result = vk::ImageAspectFlags::empty();
    if aspect.contains(Aspect::COLOR) {
        result |= vk::ImageAspectFlags::COLOR;
    }
    if aspect.contains(Aspect::DEPTH) {
        result |= vk::ImageAspectFlags::DEPTH;
    }
    if aspect.contains(Aspect::STENCIL) {
        result |= vk::ImageAspectFlags::STENCIL;
    }
    result
}

/// Convert BufferUsage flags to Vulkan buffer usage flags.
pub fn convert_buffer_usage(usage: BufferUsage) -> vk::BufferUsageFlags {
    let mut result = vk::BufferUsageFlags::empty();

    if usage.contains(BufferUsage::VERTEX) {
        result |= vk::BufferUsageFlags::VERTEX_BUFFER;
    }
    if usage.contains(BufferUsage::INDEX) {
        result |= vk::BufferUsageFlags::INDEX_BUFFER;
    }
    if usage.contains(BufferUsage::UNIFORM) {
        result |= vk::BufferUsageFlags::UNIFORM_BUFFER;
    }
    if usage.contains(BufferUsage::STORAGE) {
        result |= vk::BufferUsageFlags::STORAGE_BUFFER;
    }
    if usage.contains(BufferUsage::COPY_SRC) {
        result |= vk::BufferUsageFlags::TRANSFER_SRC;
    }
    if usage.contains(BufferUsage::COPY_DST) {
        result |= vk::BufferUsageFlags::TRANSFER_DST;
    }

    result
}

/// Convert ImageUsage flags to Vulkan image usage flags.
///
/// The format decides whether ATTACHMENT maps to a color or a
/// depth/stencil attachment.
pub fn convert_image_usage(usage: ImageUsage, format: Format) -> vk::ImageUsageFlags {
    let mut result = vk::ImageUsageFlags::empty();

    if usage.contains(ImageUsage::COPY_SRC) {
        result |= vk::ImageUsageFlags::TRANSFER_SRC;
    }
    if usage.contains(ImageUsage::COPY_DST) {
        result |= vk::ImageUsageFlags::TRANSFER_DST;
    }
    if usage.contains(ImageUsage::SAMPLED) {
        result |= vk::ImageUsageFlags::SAMPLED;
    }
    if usage.contains(ImageUsage::STORAGE) {
        result |= vk::ImageUsageFlags::STORAGE;
    }
    if usage.contains(ImageUsage::ATTACHMENT) {
        if format.is_depth_stencil() {
            result |= vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT;
        } else {
            result |= vk::ImageUsageFlags::COLOR_ATTACHMENT;
        }
    }

    result
}

/// Convert an image view dimension.
pub fn convert_view_dimension(dimension: ImageViewDimension) -> vk::ImageViewType {
    match dimension {
        ImageViewDimension::D1 => vk::ImageViewType::TYPE_1D,
        ImageViewDimension::D1Array => vk::ImageViewType::TYPE_1D_ARRAY,
        ImageViewDimension::D2 => vk::ImageViewType::TYPE_2D,
        ImageViewDimension::D2Array => vk::ImageViewType::TYPE_2D_ARRAY,
        ImageViewDimension::D3 => vk::ImageViewType::TYPE_3D,
    }
}

/// Convert a load operation.
pub fn convert_load_op(op: LoadOp) -> vk::AttachmentLoadOp {
    match op {
        LoadOp::Load => vk::AttachmentLoadOp::LOAD,
        LoadOp::Clear => vk::AttachmentLoadOp::CLEAR,
        LoadOp::DontCare => vk::AttachmentLoadOp::DONT_CARE,
    }
}

/// Convert a store operation.
pub fn convert_store_op(op: StoreOp) -> vk::AttachmentStoreOp {
    match op {
        StoreOp::Store => vk::AttachmentStoreOp::STORE,
        StoreOp::DontCare => vk::AttachmentStoreOp::DONT_CARE,
    }
}

/// Convert a clear value. Attachments that are not cleared get a zero value.
pub fn convert_clear_value(value: &ClearValue) -> vk::ClearValue {
    match *value {
        ClearValue::None => vk::ClearValue::default(),
        ClearValue::Color { r, g, b, a } => vk::ClearValue {
            color: vk::ClearColorValue {
                float32: [r, g, b, a],
            },
        },
        ClearValue::Depth(depth) => vk::ClearValue {
            depth_stencil: vk::ClearDepthStencilValue { depth, stencil: 0 },
        },
        ClearValue::Stencil(stencil) => vk::ClearValue {
            depth_stencil: vk::ClearDepthStencilValue {
                depth: 1.0,
                stencil,
            },
        },
        ClearValue::DepthStencil { depth, stencil } => vk::ClearValue {
            depth_stencil: vk::ClearDepthStencilValue { depth, stencil },
        },
    }
}

/// Convert a pipeline stage mask.
///
/// An empty mask has no meaning as a wait stage and is rejected.
pub fn convert_pipeline_stage(stage: PipelineStage) -> Result<vk::PipelineStageFlags, BackendError> {
    if stage.is_empty() {
        return Err(BackendError::InvalidParameter(
            "empty pipeline stage mask".to_string(),
        ));
    }
    if stage.contains(PipelineStage::ALL_COMMANDS) {
        return Ok(vk::PipelineStageFlags::ALL_COMMANDS);
    }

    const MAPPING: [(PipelineStage, vk::PipelineStageFlags); 11] = [
        (PipelineStage::TOP_OF_PIPE, vk::PipelineStageFlags::TOP_OF_PIPE),
        (PipelineStage::DRAW_INDIRECT, vk::PipelineStageFlags::DRAW_INDIRECT),
        (PipelineStage::VERTEX_INPUT, vk::PipelineStageFlags::VERTEX_INPUT),
        (PipelineStage::VERTEX_SHADER, vk::PipelineStageFlags::VERTEX_SHADER),
        (PipelineStage::FRAGMENT_SHADER, vk::PipelineStageFlags::FRAGMENT_SHADER),
        (
            PipelineStage::EARLY_FRAGMENT_TESTS,
            vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
        ),
        (
            PipelineStage::LATE_FRAGMENT_TESTS,
            vk::PipelineStageFlags::LATE_FRAGMENT_TESTS,
        ),
        (
            PipelineStage::COLOR_ATTACHMENT_OUTPUT,
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        ),
        (PipelineStage::COMPUTE_SHADER, vk::PipelineStageFlags::COMPUTE_SHADER),
        (PipelineStage::TRANSFER, vk::PipelineStageFlags::TRANSFER),
        (PipelineStage::BOTTOM_OF_PIPE, vk::PipelineStageFlags::BOTTOM_OF_PIPE),
    ];

    let mut result = vk::PipelineStageFlags::empty();
    for (stage_bit, vk_bit) in MAPPING {
        if stage.contains(stage_bit) {
            result |= vk_bit;
        }
    }
    Ok(result)
}

/// Convert a descriptor type.
pub fn convert_descriptor_type(kind: DcType) -> vk::DescriptorType {
    match kind {
        DcType::Uniform => vk::DescriptorType::UNIFORM_BUFFER,
        DcType::Storage => vk::DescriptorType::STORAGE_BUFFER,
        DcType::Image => vk::DescriptorType::SAMPLED_IMAGE,
        DcType::ImgSampler => vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
        DcType::Sampler => vk::DescriptorType::SAMPLER,
    }
}

/// Convert a shader stage.
pub fn convert_shader_stage(stage: ShaderStage) -> vk::ShaderStageFlags {
    match stage {
        ShaderStage::Vertex => vk::ShaderStageFlags::VERTEX,
        ShaderStage::Fragment => vk::ShaderStageFlags::FRAGMENT,
        ShaderStage::Compute => vk::ShaderStageFlags::COMPUTE,
    }
}

/// Convert a primitive topology.
pub fn convert_topology(topology: Topology) -> vk::PrimitiveTopology {
    match topology {
        Topology::Point => vk::PrimitiveTopology::POINT_LIST,
        Topology::Line => vk::PrimitiveTopology::LINE_LIST,
        Topology::Triangle => vk::PrimitiveTopology::TRIANGLE_LIST,
        Topology::LineStrip => vk::PrimitiveTopology::LINE_STRIP,
        Topology::TriangleStrip => vk::PrimitiveTopology::TRIANGLE_STRIP,
        Topology::TriangleFan => vk::PrimitiveTopology::TRIANGLE_FAN,
    }
}

/// Convert a polygon fill mode.
pub fn convert_polygon_mode(mode: PolygonMode) -> vk::PolygonMode {
    match mode {
        PolygonMode::Fill => vk::PolygonMode::FILL,
        PolygonMode::Line => vk::PolygonMode::LINE,
        PolygonMode::Point => vk::PolygonMode::POINT,
    }
}

/// Convert a cull mode.
pub fn convert_cull_mode(mode: CullMode) -> vk::CullModeFlags {
    match mode {
        CullMode::None => vk::CullModeFlags::NONE,
        CullMode::Front => vk::CullModeFlags::FRONT,
        CullMode::Back => vk::CullModeFlags::BACK,
        CullMode::Any => vk::CullModeFlags::FRONT_AND_BACK,
    }
}

/// Convert a front face winding.
pub fn convert_winding(winding: Winding) -> vk::FrontFace {
    match winding {
        Winding::Clockwise => vk::FrontFace::CLOCKWISE,
        Winding::CounterClockwise => vk::FrontFace::COUNTER_CLOCKWISE,
    }
}

/// Convert a vertex step mode.
pub fn convert_step_mode(mode: VertexStepMode) -> vk::VertexInputRate {
    match mode {
        VertexStepMode::Vertex => vk::VertexInputRate::VERTEX,
        VertexStepMode::Instance => vk::VertexInputRate::INSTANCE,
    }
}

/// Convert an index type.
pub fn convert_index_type(index_type: IndexType) -> vk::IndexType {
    match index_type {
        IndexType::U16 => vk::IndexType::UINT16,
        IndexType::U32 => vk::IndexType::UINT32,
    }
}

/// Convert FilterMode to Vulkan filter.
pub fn convert_filter_mode(mode: FilterMode) -> vk::Filter {
    match mode {
        FilterMode::Nearest => vk::Filter::NEAREST,
        FilterMode::Linear => vk::Filter::LINEAR,
    }
}

/// Convert FilterMode to Vulkan mipmap filter mode.
pub fn convert_mipmap_filter_mode(mode: FilterMode) -> vk::SamplerMipmapMode {
    match mode {
        FilterMode::Nearest => vk::SamplerMipmapMode::NEAREST,
        FilterMode::Linear => vk::SamplerMipmapMode::LINEAR,
    }
}

/// Convert AddressMode to Vulkan sampler address mode.
pub fn convert_address_mode(mode: AddressMode) -> vk::SamplerAddressMode {
    match mode {
        AddressMode::ClampToEdge => vk::SamplerAddressMode::CLAMP_TO_EDGE,
        AddressMode::Repeat => vk::SamplerAddressMode::REPEAT,
        AddressMode::MirrorRepeat => vk::SamplerAddressMode::MIRRORED_REPEAT,
        AddressMode::ClampToBorder => vk::SamplerAddressMode::CLAMP_TO_BORDER,
    }
}

/// Convert CompareFunction to Vulkan compare op.
pub fn convert_compare_function(func: CompareFunction) -> vk::CompareOp {
    match func {
        CompareFunction::Never => vk::CompareOp::NEVER,
        CompareFunction::Less => vk::CompareOp::LESS,
        CompareFunction::Equal => vk::CompareOp::EQUAL,
        CompareFunction::LessEqual => vk::CompareOp::LESS_OR_EQUAL,
        CompareFunction::Greater => vk::CompareOp::GREATER,
        CompareFunction::NotEqual => vk::CompareOp::NOT_EQUAL,
        CompareFunction::GreaterEqual => vk::CompareOp::GREATER_OR_EQUAL,
        CompareFunction::Always => vk::CompareOp::ALWAYS,
    }
}

/// Map a Vulkan error code to a backend error.
pub fn convert_result(result: vk::Result, what: &str) -> BackendError {
    match result {
        vk::Result::ERROR_OUT_OF_HOST_MEMORY | vk::Result::ERROR_OUT_OF_DEVICE_MEMORY => {
            BackendError::OutOfMemory
        }
        vk::Result::ERROR_DEVICE_LOST => BackendError::DeviceLost,
        vk::Result::ERROR_FEATURE_NOT_PRESENT
        | vk::Result::ERROR_EXTENSION_NOT_PRESENT
        | vk::Result::ERROR_FORMAT_NOT_SUPPORTED => {
            BackendError::FeatureNotSupported(format!("{what}: {result:?}"))
        }
        _ => BackendError::ResourceCreationFailed(format!("{what}: {result:?}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_undefined_format_rejected() {
        assert!(matches!(
            convert_format(Format::Undefined),
            Err(BackendError::InvalidParameter(_))
        ));
        assert_eq!(
            convert_format(Format::D24UnormS8).unwrap(),
            vk::Format::D24_UNORM_S8_UINT
        );
    }

    #[test]
    fn test_surface_format_round_trip() {
        for format in [Format::Bgra8Srgb, Format::Bgra8Unorm, Format::Rgba8Unorm] {
            let vk_format = convert_format(format).unwrap();
            assert_eq!(format_from_vk(vk_format), Some(format));
        }
        assert_eq!(format_from_vk(vk::Format::D16_UNORM), None);
    }

    #[test]
    fn test_attachment_usage_follows_format() {
        assert_eq!(
            convert_image_usage(ImageUsage::ATTACHMENT, Format::D32Float),
            vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT
        );
        assert_eq!(
            convert_image_usage(ImageUsage::ATTACHMENT | ImageUsage::COPY_DST, Format::Rgba8Unorm),
            vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_DST
        );
    }

    #[test]
    fn test_stage_masks() {
        assert!(convert_pipeline_stage(PipelineStage::empty()).is_err());
        assert_eq!(
            convert_pipeline_stage(PipelineStage::ALL_COMMANDS | PipelineStage::TRANSFER).unwrap(),
            vk::PipelineStageFlags::ALL_COMMANDS
        );
        assert_eq!(
            convert_pipeline_stage(PipelineStage::TRANSFER | PipelineStage::VERTEX_INPUT).unwrap(),
            vk::PipelineStageFlags::TRANSFER | vk::PipelineStageFlags::VERTEX_INPUT
        );
    }

    #[test]
    fn test_empty_aspect_rejected() {
        assert!(convert_aspect(Aspect::empty()).is_err());
        assert_eq!(
            convert_aspect(Aspect::DEPTH | Aspect::STENCIL).unwrap(),
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        );
    }

    #[test]
    fn test_error_mapping() {
        assert_eq!(
            convert_result(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY, "alloc"),
            BackendError::OutOfMemory
        );
        assert_eq!(
            convert_result(vk::Result::ERROR_DEVICE_LOST, "submit"),
            BackendError::DeviceLost
        );
    }
}
