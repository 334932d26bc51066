//! Transfer encoder and its translation.

use std::sync::Arc;

use crate::backend::{
    BufferCopy, BufferImageCopy, CommandBufferHandle, GpuBackend, ImageCopy, ImageLocation,
};
use crate::error::{GraphicsError, check_range};
use crate::resources::{Buffer, Image};
use crate::types::{BufferUsage, Extent3d, ImageUsage, Origin3d, Samples};

/// A location inside one level and layer of an image.
#[derive(Debug, Clone)]
pub struct ImageRegion {
    pub image: Arc<Image>,
    pub level: u32,
    pub layer: u32,
    pub origin: Origin3d,
}

impl ImageRegion {
    pub fn new(image: Arc<Image>, level: u32, layer: u32, origin: Origin3d) -> Self {
        Self {
            image,
            level,
            layer,
            origin,
        }
    }

    fn location(&self) -> ImageLocation {
        ImageLocation {
            image: self.image.handle(),
            aspect: self.image.format().aspect(),
            level: self.level,
            base_layer: self.layer,
            origin: self.origin,
        }
    }
}

/// One transfer command.
#[derive(Debug, Clone)]
pub enum TransferCommand {
    CopyBuffer {
        src: Arc<Buffer>,
        src_offset: u64,
        dst: Arc<Buffer>,
        dst_offset: u64,
        size: u64,
    },
    CopyImage {
        src: ImageRegion,
        dst: ImageRegion,
        extent: Extent3d,
        layers: u32,
    },
    CopyBufferToImage {
        src: Arc<Buffer>,
        offset: u64,
        dst: ImageRegion,
        extent: Extent3d,
    },
    Synchronize,
}

/// Records buffer and image copies.
///
/// Translation checks every command before recording any, so a rejected
/// encoder leaves nothing behind in the command buffer.
#[derive(Debug, Clone, Default)]
pub struct TransferEncoder {
    commands: Vec<TransferCommand>,
}

impl TransferEncoder {
    /// Create an empty encoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy `size` bytes between buffers.
    pub fn copy_buffer(
        &mut self,
        src: &Arc<Buffer>,
        src_offset: u64,
        dst: &Arc<Buffer>,
        dst_offset: u64,
        size: u64,
    ) -> &mut Self {
        self.push(TransferCommand::CopyBuffer {
            src: Arc::clone(src),
            src_offset,
            dst: Arc::clone(dst),
            dst_offset,
            size,
        })
    }

    /// Copy `extent` texels of `layers` layers between images.
    pub fn copy_image(
        &mut self,
        src: ImageRegion,
        dst: ImageRegion,
        extent: Extent3d,
        layers: u32,
    ) -> &mut Self {
        self.push(TransferCommand::CopyImage {
            src,
            dst,
            extent,
            layers,
        })
    }

    /// Copy tightly packed texels from a buffer into one image layer.
    pub fn copy_buffer_to_image(
        &mut self,
        src: &Arc<Buffer>,
        offset: u64,
        dst: ImageRegion,
        extent: Extent3d,
    ) -> &mut Self {
        self.push(TransferCommand::CopyBufferToImage {
            src: Arc::clone(src),
            offset,
            dst,
            extent,
        })
    }

    /// Make all previous writes visible to all later reads.
    pub fn synchronize(&mut self) -> &mut Self {
        self.push(TransferCommand::Synchronize)
    }

    pub fn commands(&self) -> &[TransferCommand] {
        &self.commands
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn clear(&mut self) {
        self.commands.clear();
    }

    fn push(&mut self, command: TransferCommand) -> &mut Self {
        self.commands.push(command);
        self
    }

    pub(crate) fn validate(&self) -> Result<(), GraphicsError> {
        self.commands.iter().try_for_each(validate_command)
    }

    pub(super) fn translate(
        &self,
        backend: &dyn GpuBackend,
        cmd: CommandBufferHandle,
    ) -> Result<(), GraphicsError> {
        self.validate()?;
        for command in &self.commands {
            match command {
                TransferCommand::CopyBuffer {
                    src,
                    src_offset,
                    dst,
                    dst_offset,
                    size,
                } => backend.cmd_copy_buffer(
                    cmd,
                    src.handle(),
                    dst.handle(),
                    &BufferCopy {
                        src_offset: *src_offset,
                        dst_offset: *dst_offset,
                        size: *size,
                    },
                ),
                TransferCommand::CopyImage {
                    src,
                    dst,
                    extent,
                    layers,
                } => backend.cmd_copy_image(
                    cmd,
                    &ImageCopy {
                        src: src.location(),
                        dst: dst.location(),
                        extent: *extent,
                        layers: *layers,
                    },
                ),
                TransferCommand::CopyBufferToImage {
                    src,
                    offset,
                    dst,
                    extent,
                } => backend.cmd_copy_buffer_to_image(
                    cmd,
                    &BufferImageCopy {
                        buffer: src.handle(),
                        buffer_offset: *offset,
                        dst: dst.location(),
                        extent: *extent,
                        layers: 1,
                    },
                ),
                TransferCommand::Synchronize => backend.cmd_memory_barrier(cmd, false),
            }
        }
        Ok(())
    }
}

fn validate_command(command: &TransferCommand) -> Result<(), GraphicsError> {
    match command {
        TransferCommand::CopyBuffer {
            src,
            src_offset,
            dst,
            dst_offset,
            size,
        } => {
            if *size == 0 {
                return Err(GraphicsError::InvalidParameter(
                    "buffer copy size must be non-zero".to_string(),
                ));
            }
            src.require_usage(BufferUsage::COPY_SRC, "buffer copy source")?;
            dst.require_usage(BufferUsage::COPY_DST, "buffer copy destination")?;
            check_range(*src_offset, *size, src.size())?;
            check_range(*dst_offset, *size, dst.size())?;
            let overlaps = *src_offset < dst_offset + size && *dst_offset < src_offset + size;
            if Arc::ptr_eq(src, dst) && overlaps {
                return Err(GraphicsError::InvalidParameter(format!(
                    "overlapping copy within one buffer: {src_offset}..+{size} and {dst_offset}..+{size}"
                )));
            }
        }
        TransferCommand::CopyImage {
            src,
            dst,
            extent,
            layers,
        } => {
            require_image_usage(&src.image, ImageUsage::COPY_SRC, "image copy source")?;
            require_image_usage(&dst.image, ImageUsage::COPY_DST, "image copy destination")?;
            src.image
                .check_region(src.origin, src.level, src.layer, *extent, *layers)?;
            dst.image
                .check_region(dst.origin, dst.level, dst.layer, *extent, *layers)?;
            if src.image.format() != dst.image.format() {
                return Err(GraphicsError::InvalidParameter(format!(
                    "image copy between formats {:?} and {:?}",
                    src.image.format(),
                    dst.image.format()
                )));
            }
            if src.image.samples() != dst.image.samples() {
                return Err(GraphicsError::InvalidParameter(
                    "image copy between different sample counts".to_string(),
                ));
            }
        }
        TransferCommand::CopyBufferToImage {
            src,
            offset,
            dst,
            extent,
        } => {
            src.require_usage(BufferUsage::COPY_SRC, "buffer to image copy source")?;
            check_image_upload(dst, *extent)?;
            if offset % 4 != 0 {
                return Err(GraphicsError::InvalidParameter(format!(
                    "buffer to image copy offset {offset} not a multiple of 4"
                )));
            }
            let bytes = extent.texel_count() * dst.image.format().texel_size() as u64;
            check_range(*offset, bytes, src.size())?;
        }
        TransferCommand::Synchronize => {}
    }
    Ok(())
}

/// Check the destination side of a buffer to image copy.
pub(crate) fn check_image_upload(dst: &ImageRegion, extent: Extent3d) -> Result<(), GraphicsError> {
    require_image_usage(&dst.image, ImageUsage::COPY_DST, "buffer to image copy destination")?;
    dst.image
        .check_region(dst.origin, dst.level, dst.layer, extent, 1)?;
    if dst.image.samples() != Samples::S1 {
        return Err(GraphicsError::Unsupported(
            "buffer copies into multisampled images".to_string(),
        ));
    }
    let format = dst.image.format();
    if format.is_depth_stencil() && format.has_stencil() {
        return Err(GraphicsError::Unsupported(format!(
            "buffer copies into combined depth/stencil format {format:?}"
        )));
    }
    Ok(())
}

fn require_image_usage(image: &Image, usage: ImageUsage, what: &str) -> Result<(), GraphicsError> {
    if image.usage().contains(usage) {
        Ok(())
    } else {
        Err(GraphicsError::InvalidParameter(format!(
            "{what} lacks {usage:?} usage"
        )))
    }
}
