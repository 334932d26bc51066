//! Vulkan render passes and framebuffers.
//!
//! Images stay in `GENERAL` layout, so every attachment starts and ends a
//! render pass in that layout and passes differ only in load/store ops.

use ash::vk;
use ash::vk::Handle;

use crate::backend::{BackendError, FramebufferInfo, RenderPassInfo};
use crate::types::{AttachmentDesc, AttachmentOp, LoadOp, StoreOp};

use super::command::{FRAMEBUFFER_ACCESSES, FRAMEBUFFER_STAGES, FRAMEBUFFER_WRITES};
use super::conversion::{
    convert_format, convert_load_op, convert_result, convert_samples, convert_store_op,
};

fn attachment(
    desc: &AttachmentDesc,
    op: AttachmentOp,
    stencil: AttachmentOp,
) -> Result<vk::AttachmentDescription, BackendError> {
    Ok(vk::AttachmentDescription::default()
        .format(convert_format(desc.format)?)
        .samples(convert_samples(desc.samples))
        .load_op(convert_load_op(op.load))
        .store_op(convert_store_op(op.store))
        .stencil_load_op(convert_load_op(stencil.load))
        .stencil_store_op(convert_store_op(stencil.store))
        .initial_layout(vk::ImageLayout::GENERAL)
        .final_layout(vk::ImageLayout::GENERAL))
}

/// Create a single-subpass render pass.
pub fn create_render_pass(
    device: &ash::Device,
    info: &RenderPassInfo,
) -> Result<vk::RenderPass, BackendError> {
    let mut attachments = Vec::with_capacity(
        info.colors.len() + info.resolves.len() + usize::from(info.depth_stencil.is_some()),
    );
    for (desc, op) in &info.colors {
        attachments.push(attachment(desc, *op, AttachmentOp::DONT_CARE)?);
    }
    let resolve_op = AttachmentOp::new(LoadOp::DontCare, StoreOp::Store);
    for desc in &info.resolves {
        attachments.push(attachment(desc, resolve_op, AttachmentOp::DONT_CARE)?);
    }
    if let Some(ds) = &info.depth_stencil {
        attachments.push(attachment(&ds.desc, ds.depth, ds.stencil)?);
    }

    let color_refs: Vec<vk::AttachmentReference> = (0..info.colors.len() as u32)
        .map(|index| vk::AttachmentReference {
            attachment: index,
            layout: vk::ImageLayout::GENERAL,
        })
        .collect();
    let first_resolve = info.colors.len() as u32;
    let resolve_refs: Vec<vk::AttachmentReference> = (0..info.resolves.len() as u32)
        .map(|index| vk::AttachmentReference {
            attachment: first_resolve + index,
            layout: vk::ImageLayout::GENERAL,
        })
        .collect();
    let depth_ref = vk::AttachmentReference {
        attachment: (info.colors.len() + info.resolves.len()) as u32,
        layout: vk::ImageLayout::GENERAL,
    };

    let mut subpass = vk::SubpassDescription::default()
        .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
        .color_attachments(&color_refs);
    if !resolve_refs.is_empty() {
        subpass = subpass.resolve_attachments(&resolve_refs);
    }
    if info.depth_stencil.is_some() {
        subpass = subpass.depth_stencil_attachment(&depth_ref);
    }
    let subpasses = [subpass];

    let dependencies = [
        vk::SubpassDependency::default()
            .src_subpass(vk::SUBPASS_EXTERNAL)
            .dst_subpass(0)
            .src_stage_mask(vk::PipelineStageFlags::ALL_COMMANDS)
            .dst_stage_mask(vk::PipelineStageFlags::ALL_COMMANDS)
            .src_access_mask(vk::AccessFlags::MEMORY_WRITE)
            .dst_access_mask(vk::AccessFlags::MEMORY_READ | vk::AccessFlags::MEMORY_WRITE),
        vk::SubpassDependency::default()
            .src_subpass(0)
            .dst_subpass(vk::SUBPASS_EXTERNAL)
            .src_stage_mask(vk::PipelineStageFlags::ALL_COMMANDS)
            .dst_stage_mask(vk::PipelineStageFlags::ALL_COMMANDS)
            .src_access_mask(vk::AccessFlags::MEMORY_WRITE)
            .dst_access_mask(vk::AccessFlags::MEMORY_READ | vk::AccessFlags::MEMORY_WRITE),
        // Allows synchronize inside the pass.
        vk::SubpassDependency::default()
            .src_subpass(0)
            .dst_subpass(0)
            .src_stage_mask(FRAMEBUFFER_STAGES)
            .dst_stage_mask(FRAMEBUFFER_STAGES)
            .src_access_mask(FRAMEBUFFER_WRITES)
            .dst_access_mask(FRAMEBUFFER_ACCESSES)
            .dependency_flags(vk::DependencyFlags::BY_REGION),
    ];

    let create_info = vk::RenderPassCreateInfo::default()
        .attachments(&attachments)
        .subpasses(&subpasses)
        .dependencies(&dependencies);

    unsafe { device.create_render_pass(&create_info, None) }
        .map_err(|e| convert_result(e, "create render pass"))
}

/// Create a framebuffer for `info.render_pass`.
pub fn create_framebuffer(
    device: &ash::Device,
    info: &FramebufferInfo,
) -> Result<vk::Framebuffer, BackendError> {
    let attachments: Vec<vk::ImageView> = info
        .attachments
        .iter()
        .map(|view| vk::ImageView::from_raw(view.0))
        .collect();
    let create_info = vk::FramebufferCreateInfo::default()
        .render_pass(vk::RenderPass::from_raw(info.render_pass.0))
        .attachments(&attachments)
        .width(info.extent.width)
        .height(info.extent.height)
        .layers(info.layers);

    unsafe { device.create_framebuffer(&create_info, None) }
        .map_err(|e| convert_result(e, "create framebuffer"))
}
