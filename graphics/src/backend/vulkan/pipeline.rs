//! Vulkan shader modules, pipeline layouts and pipelines.

use std::ffi::CString;
use std::io::Cursor;

use ash::vk;
use ash::vk::Handle;

use crate::backend::{
    BackendError, ComputePipelineInfo, DescriptorLayoutHandle, GraphicsPipelineInfo,
    ShaderStageInfo,
};
use crate::types::{Aspect, ShaderDescriptor};

use super::conversion::{
    convert_cull_mode, convert_format, convert_polygon_mode, convert_result, convert_samples,
    convert_shader_stage, convert_step_mode, convert_topology, convert_winding,
};

/// Create a shader module from SPIR-V bytes.
pub fn create_shader_module(
    device: &ash::Device,
    descriptor: &ShaderDescriptor,
) -> Result<vk::ShaderModule, BackendError> {
    let words = ash::util::read_spv(&mut Cursor::new(&descriptor.code)).map_err(|e| {
        BackendError::InvalidParameter(format!(
            "shader {:?} is not valid SPIR-V: {}",
            descriptor.label, e
        ))
    })?;
    let create_info = vk::ShaderModuleCreateInfo::default().code(&words);
    unsafe { device.create_shader_module(&create_info, None) }
        .map_err(|e| convert_result(e, "create shader module"))
}

/// Create a pipeline layout from descriptor set layouts, in set order.
pub fn create_pipeline_layout(
    device: &ash::Device,
    layouts: &[DescriptorLayoutHandle],
) -> Result<vk::PipelineLayout, BackendError> {
    let set_layouts: Vec<vk::DescriptorSetLayout> = layouts
        .iter()
        .map(|layout| vk::DescriptorSetLayout::from_raw(layout.0))
        .collect();
    let create_info = vk::PipelineLayoutCreateInfo::default().set_layouts(&set_layouts);
    unsafe { device.create_pipeline_layout(&create_info, None) }
        .map_err(|e| convert_result(e, "create pipeline layout"))
}

fn entry_point_name(stage: &ShaderStageInfo) -> Result<CString, BackendError> {
    CString::new(stage.entry_point.as_str()).map_err(|e| {
        BackendError::InvalidParameter(format!(
            "Invalid entry point name (contains null byte): {}",
            e
        ))
    })
}

/// Create a graphics pipeline with dynamic viewport and scissor.
pub fn create_graphics_pipeline(
    device: &ash::Device,
    info: &GraphicsPipelineInfo,
) -> Result<vk::Pipeline, BackendError> {
    let names = info
        .stages
        .iter()
        .map(entry_point_name)
        .collect::<Result<Vec<_>, _>>()?;
    let shader_stages: Vec<vk::PipelineShaderStageCreateInfo> = info
        .stages
        .iter()
        .zip(&names)
        .map(|(stage, name)| {
            vk::PipelineShaderStageCreateInfo::default()
                .stage(convert_shader_stage(stage.stage))
                .module(vk::ShaderModule::from_raw(stage.shader.0))
                .name(name)
        })
        .collect();

    let binding_descriptions: Vec<vk::VertexInputBindingDescription> = info
        .vertex_inputs
        .iter()
        .enumerate()
        .map(|(slot, input)| {
            vk::VertexInputBindingDescription::default()
                .binding(slot as u32)
                .stride(input.stride)
                .input_rate(convert_step_mode(input.step_mode))
        })
        .collect();
    let mut attribute_descriptions = Vec::new();
    for (slot, input) in info.vertex_inputs.iter().enumerate() {
        for attribute in &input.attributes {
            attribute_descriptions.push(
                vk::VertexInputAttributeDescription::default()
                    .location(attribute.location)
                    .binding(slot as u32)
                    .format(convert_format(attribute.format)?)
                    .offset(attribute.offset),
            );
        }
    }
    let vertex_input_state = vk::PipelineVertexInputStateCreateInfo::default()
        .vertex_binding_descriptions(&binding_descriptions)
        .vertex_attribute_descriptions(&attribute_descriptions);

    let input_assembly_state = vk::PipelineInputAssemblyStateCreateInfo::default()
        .topology(convert_topology(info.topology))
        .primitive_restart_enable(false);

    let viewport_state = vk::PipelineViewportStateCreateInfo::default()
        .viewport_count(1)
        .scissor_count(1);

    let rasterization_state = vk::PipelineRasterizationStateCreateInfo::default()
        .depth_clamp_enable(false)
        .rasterizer_discard_enable(false)
        .polygon_mode(convert_polygon_mode(info.polygon_mode))
        .line_width(1.0)
        .cull_mode(convert_cull_mode(info.cull_mode))
        .front_face(convert_winding(info.winding))
        .depth_bias_enable(false);

    let multisample_state = vk::PipelineMultisampleStateCreateInfo::default()
        .sample_shading_enable(false)
        .rasterization_samples(convert_samples(info.samples));

    let aspect = info
        .depth_stencil
        .map(|format| format.aspect())
        .unwrap_or_else(Aspect::empty);
    let depth_stencil_state = vk::PipelineDepthStencilStateCreateInfo::default()
        .depth_test_enable(aspect.contains(Aspect::DEPTH))
        .depth_write_enable(aspect.contains(Aspect::DEPTH))
        .depth_compare_op(vk::CompareOp::LESS_OR_EQUAL)
        .depth_bounds_test_enable(false)
        .stencil_test_enable(false);

    let color_blend_attachments: Vec<vk::PipelineColorBlendAttachmentState> = (0..info
        .color_count)
        .map(|_| {
            vk::PipelineColorBlendAttachmentState::default()
                .color_write_mask(vk::ColorComponentFlags::RGBA)
                .blend_enable(false)
        })
        .collect();
    let color_blend_state = vk::PipelineColorBlendStateCreateInfo::default()
        .logic_op_enable(false)
        .attachments(&color_blend_attachments);

    let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
    let dynamic_state =
        vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

    let pipeline_info = vk::GraphicsPipelineCreateInfo::default()
        .stages(&shader_stages)
        .vertex_input_state(&vertex_input_state)
        .input_assembly_state(&input_assembly_state)
        .viewport_state(&viewport_state)
        .rasterization_state(&rasterization_state)
        .multisample_state(&multisample_state)
        .depth_stencil_state(&depth_stencil_state)
        .color_blend_state(&color_blend_state)
        .dynamic_state(&dynamic_state)
        .layout(vk::PipelineLayout::from_raw(info.layout.0))
        .render_pass(vk::RenderPass::from_raw(info.render_pass.0))
        .subpass(0);

    let pipelines = unsafe {
        device.create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
    }
    .map_err(|(_, e)| convert_result(e, "create graphics pipeline"))?;
    pipelines.into_iter().next().ok_or_else(|| {
        BackendError::Internal("driver returned no graphics pipeline".to_string())
    })
}

/// Create a compute pipeline.
pub fn create_compute_pipeline(
    device: &ash::Device,
    info: &ComputePipelineInfo,
) -> Result<vk::Pipeline, BackendError> {
    let name = entry_point_name(&info.stage)?;
    let stage = vk::PipelineShaderStageCreateInfo::default()
        .stage(convert_shader_stage(info.stage.stage))
        .module(vk::ShaderModule::from_raw(info.stage.shader.0))
        .name(&name);
    let pipeline_info = vk::ComputePipelineCreateInfo::default()
        .stage(stage)
        .layout(vk::PipelineLayout::from_raw(info.layout.0));

    let pipelines = unsafe {
        device.create_compute_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
    }
    .map_err(|(_, e)| convert_result(e, "create compute pipeline"))?;
    pipelines.into_iter().next().ok_or_else(|| {
        BackendError::Internal("driver returned no compute pipeline".to_string())
    })
}
