//! Render targets and target operations.

use std::sync::Arc;

use crate::backend::{FramebufferHandle, FramebufferInfo, GpuBackend, RenderPassBeginInfo};
use crate::error::GraphicsError;
use crate::resources::{Image, ImageView};
use crate::types::{
    Aspect, AttachmentDesc, AttachmentOp, ClearValue, Extent2d, ImageDimension, ImageUsage,
    ImageViewDescriptor, LoadOp,
};

use super::Pass;

/// An image level and first layer bound to one attachment of a [`Target`].
#[derive(Debug, Clone)]
pub struct AttachImg {
    pub image: Arc<Image>,
    pub level: u32,
    pub layer: u32,
}

impl AttachImg {
    /// Attach level 0, layer 0 of `image`.
    pub fn new(image: Arc<Image>) -> Self {
        Self {
            image,
            level: 0,
            layer: 0,
        }
    }

    /// Set the mip level.
    pub fn with_level(mut self, level: u32) -> Self {
        self.level = level;
        self
    }

    /// Set the first array layer.
    pub fn with_layer(mut self, layer: u32) -> Self {
        self.layer = layer;
        self
    }
}

/// Operation and clear color for one color attachment.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColorOp {
    pub op: AttachmentOp,
    /// RGBA, used when `op.load` is [`LoadOp::Clear`].
    pub clear: [f32; 4],
}

/// Load/store operations for every attachment when a target is bound.
///
/// Resolve attachments are always written and never cleared.
#[derive(Debug, Clone, PartialEq)]
pub struct TargetOp {
    pub colors: Vec<ColorOp>,
    pub depth: AttachmentOp,
    pub stencil: AttachmentOp,
    pub clear_depth: f32,
    pub clear_stencil: u32,
}

impl TargetOp {
    /// Load and store every attachment.
    pub fn load(color_count: usize) -> Self {
        Self {
            colors: vec![
                ColorOp {
                    op: AttachmentOp::LOAD_STORE,
                    clear: [0.0; 4],
                };
                color_count
            ],
            depth: AttachmentOp::LOAD_STORE,
            stencil: AttachmentOp::LOAD_STORE,
            clear_depth: 1.0,
            clear_stencil: 0,
        }
    }

    /// Clear every attachment: colors to `color`, depth to 1, stencil to 0.
    pub fn clear(color_count: usize, color: [f32; 4]) -> Self {
        Self {
            colors: vec![
                ColorOp {
                    op: AttachmentOp::CLEAR_STORE,
                    clear: color,
                };
                color_count
            ],
            depth: AttachmentOp::CLEAR_STORE,
            stencil: AttachmentOp::CLEAR_STORE,
            ..Self::load(0)
        }
    }

    /// Set the operation of one color attachment. Out of range indices are ignored.
    pub fn with_color(mut self, index: usize, op: AttachmentOp, clear: [f32; 4]) -> Self {
        if let Some(color) = self.colors.get_mut(index) {
            *color = ColorOp { op, clear };
        }
        self
    }

    /// Set the depth operation and clear value.
    pub fn with_depth(mut self, op: AttachmentOp, clear: f32) -> Self {
        self.depth = op;
        self.clear_depth = clear;
        self
    }

    /// Set the stencil operation and clear value.
    pub fn with_stencil(mut self, op: AttachmentOp, clear: u32) -> Self {
        self.stencil = op;
        self.clear_stencil = clear;
        self
    }
}

/// Images bound to a [`Pass`] shape, with the framebuffer built from them.
pub struct Target {
    pass: Arc<Pass>,
    backend: Arc<dyn GpuBackend>,
    size: Extent2d,
    layers: u32,
    /// Colors, resolves, depth/stencil.
    views: Vec<ImageView>,
    framebuffer: FramebufferHandle,
}

impl Target {
    pub(crate) fn new(
        pass: &Arc<Pass>,
        size: Extent2d,
        layers: u32,
        colors: &[AttachImg],
        resolves: &[AttachImg],
        depth_stencil: Option<&AttachImg>,
    ) -> Result<Self, GraphicsError> {
        if colors.len() != pass.colors().len()
            || resolves.len() != pass.resolves().len()
            || depth_stencil.is_some() != pass.depth_stencil().is_some()
        {
            return Err(GraphicsError::InvalidParameter(format!(
                "target has {} colors, {} resolves, depth/stencil {}; pass expects {}, {}, {}",
                colors.len(),
                resolves.len(),
                depth_stencil.is_some(),
                pass.colors().len(),
                pass.resolves().len(),
                pass.depth_stencil().is_some()
            )));
        }

        let limits = pass.backend.limits();
        if size.is_empty()
            || size.width > limits.max_framebuffer_width
            || size.height > limits.max_framebuffer_height
        {
            return Err(GraphicsError::InvalidParameter(format!(
                "target size {}x{} outside 1..={}x{}",
                size.width,
                size.height,
                limits.max_framebuffer_width,
                limits.max_framebuffer_height
            )));
        }
        if layers == 0 || layers > limits.max_framebuffer_layers {
            return Err(GraphicsError::InvalidParameter(format!(
                "target layers {layers} outside 1..={}",
                limits.max_framebuffer_layers
            )));
        }

        let depth_desc = pass.depth_stencil();
        let shape = pass
            .colors()
            .iter()
            .zip(colors)
            .chain(pass.resolves().iter().zip(resolves))
            .chain(depth_desc.as_ref().zip(depth_stencil));

        // Views built so far are released by their drop if a later step fails.
        let mut views = Vec::with_capacity(pass.attachment_count());
        for (index, (desc, attach)) in shape.enumerate() {
            check_attachment(index, desc, attach, size, layers)?;
            views.push(
                attach
                    .image
                    .view(ImageViewDescriptor::new(attach.level, attach.layer, layers))?,
            );
        }

        let render_pass = pass.compatible_render_pass()?;
        let framebuffer = pass.backend.create_framebuffer(&FramebufferInfo {
            render_pass,
            attachments: views.iter().map(ImageView::handle).collect(),
            extent: size,
            layers,
        })?;
        log::debug!(
            "Target: created {}x{}x{} framebuffer {:?}",
            size.width,
            size.height,
            layers,
            framebuffer
        );

        Ok(Self {
            pass: Arc::clone(pass),
            backend: Arc::clone(&pass.backend),
            size,
            layers,
            views,
            framebuffer,
        })
    }

    /// Get the pass this target was built for.
    pub fn pass(&self) -> &Arc<Pass> {
        &self.pass
    }

    /// Get the target size.
    pub fn size(&self) -> Extent2d {
        self.size
    }

    /// Get the layer count.
    pub fn layers(&self) -> u32 {
        self.layers
    }

    /// Get the framebuffer handle. Never null.
    pub fn framebuffer(&self) -> FramebufferHandle {
        self.framebuffer
    }

    /// Get the attachment views: colors, resolves, then depth/stencil.
    pub fn views(&self) -> &[ImageView] {
        &self.views
    }

    /// Compose the render pass begin parameters for `op`.
    ///
    /// Picks the cached render pass for the operations and produces one clear
    /// value per attachment, `ClearValue::None` where nothing is cleared.
    pub fn begin_info(&self, op: &TargetOp) -> Result<RenderPassBeginInfo, GraphicsError> {
        let render_pass = self.pass.render_pass(op)?;

        let mut clear_values = Vec::with_capacity(self.views.len());
        clear_values.extend(op.colors.iter().map(|color| match color.op.load {
            LoadOp::Clear => {
                let [r, g, b, a] = color.clear;
                ClearValue::Color { r, g, b, a }
            }
            LoadOp::Load | LoadOp::DontCare => ClearValue::None,
        }));
        clear_values.extend(self.pass.resolves().iter().map(|_| ClearValue::None));
        if let Some(desc) = self.pass.depth_stencil() {
            let has_depth = desc.format.aspect().contains(Aspect::DEPTH);
            let clear_depth = has_depth && op.depth.load == LoadOp::Clear;
            let clear_stencil = desc.format.has_stencil() && op.stencil.load == LoadOp::Clear;
            clear_values.push(match (clear_depth, clear_stencil) {
                (false, false) => ClearValue::None,
                _ => ClearValue::DepthStencil {
                    depth: op.clear_depth,
                    stencil: op.clear_stencil,
                },
            });
        }

        Ok(RenderPassBeginInfo {
            render_pass,
            framebuffer: self.framebuffer,
            extent: self.size,
            clear_values,
        })
    }
}

fn check_attachment(
    index: usize,
    desc: &AttachmentDesc,
    attach: &AttachImg,
    size: Extent2d,
    layers: u32,
) -> Result<(), GraphicsError> {
    let image = &attach.image;
    let fail = |reason: String| {
        Err(GraphicsError::InvalidParameter(format!(
            "attachment {index}: {reason}"
        )))
    };

    if image.format() != desc.format || image.samples() != desc.samples {
        return fail(format!(
            "image is {:?} x{}, pass expects {:?} x{}",
            image.format(),
            image.samples().count(),
            desc.format,
            desc.samples.count()
        ));
    }
    if !image.usage().contains(ImageUsage::ATTACHMENT) {
        return fail("image lacks ATTACHMENT usage".to_string());
    }
    if image.descriptor().dimension != ImageDimension::D2 {
        return fail("attachments must be 2D images".to_string());
    }
    if attach.level >= image.descriptor().levels {
        return fail(format!("level {} out of range", attach.level));
    }
    let level_size = image.size().mip_level_size(attach.level);
    if level_size.width < size.width || level_size.height < size.height {
        return fail(format!(
            "level {} is {}x{}, smaller than the target",
            attach.level, level_size.width, level_size.height
        ));
    }
    if attach
        .layer
        .checked_add(layers)
        .is_none_or(|end| end > image.descriptor().layers)
    {
        return fail(format!(
            "layers {}..+{layers} exceed {} image layers",
            attach.layer,
            image.descriptor().layers
        ));
    }
    Ok(())
}

impl Drop for Target {
    fn drop(&mut self) {
        // The views back the framebuffer, so they go with it.
        let views = std::mem::take(&mut self.views);
        let backend = Arc::clone(&self.backend);
        let framebuffer = self.framebuffer;
        self.pass.release_later(Box::new(move || {
            backend.destroy_framebuffer(framebuffer);
            drop(views);
        }));
    }
}

impl std::fmt::Debug for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Target")
            .field("size", &self.size)
            .field("layers", &self.layers)
            .field("attachments", &self.views.len())
            .field("framebuffer", &self.framebuffer)
            .finish()
    }
}

static_assertions::assert_impl_all!(Target: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{GraphicsDevice, test_device};
    use crate::types::{Format, ImageDescriptor, Samples};

    fn attachment(device: &Arc<GraphicsDevice>, format: Format, samples: Samples) -> AttachImg {
        let image = device
            .create_image(
                &ImageDescriptor::new_2d(64, 64, format, ImageUsage::ATTACHMENT)
                    .with_samples(samples),
            )
            .unwrap();
        AttachImg::new(image)
    }

    #[test]
    fn test_cardinality_must_match_pass() {
        let (device, _backend) = test_device();
        let pass = device
            .create_pass(&[AttachmentDesc::single(Format::Rgba8Unorm)], &[], None)
            .unwrap();
        let color = attachment(&device, Format::Rgba8Unorm, Samples::S1);
        let depth = attachment(&device, Format::D32Float, Samples::S1);
        let size = Extent2d::new(64, 64);

        assert!(pass.target(size, 1, &[], &[], None).is_err());
        assert!(pass.target(size, 1, &[color.clone(), color.clone()], &[], None).is_err());
        assert!(pass.target(size, 1, &[color.clone()], &[], Some(&depth)).is_err());

        let target = pass.target(size, 1, &[color], &[], None).unwrap();
        assert!(!target.framebuffer().is_null());
    }

    #[test]
    fn test_attachment_checks() {
        let (device, backend) = test_device();
        let pass = device
            .create_pass(&[AttachmentDesc::single(Format::Rgba8Unorm)], &[], None)
            .unwrap();
        let wrong_format = attachment(&device, Format::Bgra8Unorm, Samples::S1);
        let color = attachment(&device, Format::Rgba8Unorm, Samples::S1);

        assert!(pass.target(Extent2d::new(64, 64), 1, &[wrong_format], &[], None).is_err());
        assert!(pass.target(Extent2d::new(128, 64), 1, &[color.clone()], &[], None).is_err());
        assert!(pass.target(Extent2d::new(64, 64), 2, &[color.clone()], &[], None).is_err());
        assert!(pass.target(Extent2d::new(0, 64), 1, &[color], &[], None).is_err());
        // Failed construction leaves no views behind.
        assert_eq!(backend.live_count("image_view"), 0);
        assert_eq!(backend.live_count("framebuffer"), 0);
    }

    #[test]
    fn test_begin_info_clear_values() {
        let (device, _backend) = test_device();
        let pass = device
            .create_pass(
                &[
                    AttachmentDesc::new(Format::Rgba8Unorm, Samples::S4),
                    AttachmentDesc::new(Format::Rgba8Unorm, Samples::S4),
                ],
                &[
                    AttachmentDesc::single(Format::Rgba8Unorm),
                    AttachmentDesc::single(Format::Rgba8Unorm),
                ],
                Some(AttachmentDesc::new(Format::D24UnormS8, Samples::S4)),
            )
            .unwrap();
        let msaa = attachment(&device, Format::Rgba8Unorm, Samples::S4);
        let resolve = attachment(&device, Format::Rgba8Unorm, Samples::S1);
        let depth = attachment(&device, Format::D24UnormS8, Samples::S4);
        let target = pass
            .target(
                Extent2d::new(32, 32),
                1,
                &[msaa.clone(), msaa],
                &[resolve.clone(), resolve],
                Some(&depth),
            )
            .unwrap();
        assert_eq!(target.views().len(), 5);

        let op = TargetOp::load(2)
            .with_color(1, AttachmentOp::CLEAR_STORE, [0.25, 0.5, 0.75, 1.0])
            .with_depth(AttachmentOp::CLEAR_STORE, 0.0);
        let info = target.begin_info(&op).unwrap();
        assert_eq!(info.framebuffer, target.framebuffer());
        assert_eq!(
            info.clear_values,
            vec![
                ClearValue::None,
                ClearValue::color(0.25, 0.5, 0.75, 1.0),
                ClearValue::None,
                ClearValue::None,
                ClearValue::DepthStencil {
                    depth: 0.0,
                    stencil: 0
                },
            ]
        );

        assert!(target.begin_info(&TargetOp::load(1)).is_err());
    }

    #[test]
    fn test_drop_waits_for_recorded_work() {
        let (device, backend) = test_device();
        let pass = device
            .create_pass(&[AttachmentDesc::single(Format::Rgba8Unorm)], &[], None)
            .unwrap();
        let color = attachment(&device, Format::Rgba8Unorm, Samples::S1);
        let target = pass
            .target(Extent2d::new(64, 64), 1, &[color], &[], None)
            .unwrap();

        let queue = device.default_queue();
        let mut cmd = queue.cmd_buffer().unwrap();
        let mut encoder = crate::encoder::GraphicsEncoder::new();
        encoder.set_target(&target, TargetOp::clear(1, [0.0; 4]));
        cmd.encode(&encoder).unwrap();
        cmd.enqueue().unwrap();
        drop(encoder);
        drop(target);

        // The enqueued buffer still begins a pass on this framebuffer.
        assert_eq!(backend.live_count("framebuffer"), 1);
        assert_eq!(backend.live_count("image_view"), 1);
        queue.submit().unwrap();
        assert_eq!(backend.live_count("framebuffer"), 0);
        assert_eq!(backend.live_count("image_view"), 0);
        assert_eq!(backend.stats().unknown_destroys, 0);
    }
}
