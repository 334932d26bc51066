//! GPU image resource and image views.

use std::sync::{Arc, Weak};

use crate::backend::{GpuBackend, ImageHandle, ImageViewHandle, ImageViewInfo};
use crate::device::GraphicsDevice;
use crate::encoder::{ImageRegion, TransferEncoder, check_image_upload};
use crate::error::GraphicsError;
use crate::types::{
    BufferDescriptor, BufferUsage, Extent2d, Extent3d, Format, ImageDescriptor, ImageDimension,
    ImageUsage, ImageViewDescriptor, ImageViewDimension, Origin3d, PipelineStage, Samples,
};

/// A GPU image.
///
/// Images are created by [`GraphicsDevice::create_image`] and live in the
/// general layout for their whole life, so any usage in the usage mask is
/// legal without explicit transitions.
///
/// # Example
///
/// ```ignore
/// let image = device.create_image(&ImageDescriptor::new_2d(
///     256, 256, Format::Rgba8Unorm, ImageUsage::SAMPLED | ImageUsage::COPY_DST,
/// ))?;
/// image.write(Origin3d::ZERO, 0, 0, Extent3d::new_2d(256, 256), &pixels)?;
/// ```
pub struct Image {
    device: Weak<GraphicsDevice>,
    backend: Arc<dyn GpuBackend>,
    handle: ImageHandle,
    descriptor: ImageDescriptor,
    /// Swapchain images belong to their swapchain.
    owned: bool,
}

impl Image {
    /// Create a new image (called by GraphicsDevice).
    pub(crate) fn new(
        device: &Arc<GraphicsDevice>,
        descriptor: ImageDescriptor,
    ) -> Result<Self, GraphicsError> {
        validate_descriptor(&descriptor, device)?;
        let backend = Arc::clone(device.backend());
        let handle = backend.create_image(&descriptor)?;
        Ok(Self {
            device: Arc::downgrade(device),
            backend,
            handle,
            descriptor,
            owned: true,
        })
    }

    /// Wrap an image owned by a swapchain.
    pub(crate) fn from_swapchain(
        device: &Arc<GraphicsDevice>,
        handle: ImageHandle,
        format: Format,
        extent: Extent2d,
    ) -> Self {
        let descriptor = ImageDescriptor::new_2d(
            extent.width,
            extent.height,
            format,
            ImageUsage::ATTACHMENT | ImageUsage::COPY_DST,
        )
        .with_label("swapchain image");
        Self {
            device: Arc::downgrade(device),
            backend: Arc::clone(device.backend()),
            handle,
            descriptor,
            owned: false,
        }
    }

    /// Create a view of one level and a range of layers.
    ///
    /// The view dimension follows the image: a 2D image viewed with one layer
    /// is `D2`, with more layers `D2Array`.
    pub fn view(self: &Arc<Self>, descriptor: ImageViewDescriptor) -> Result<ImageView, GraphicsError> {
        let dimension = self.view_dimension(&descriptor)?;
        let info = ImageViewInfo {
            image: self.handle,
            format: self.descriptor.format,
            dimension,
            aspect: self.descriptor.format.aspect(),
            base_level: descriptor.base_level,
            levels: descriptor.levels,
            base_layer: descriptor.base_layer,
            layers: descriptor.layers,
        };
        let handle = self.backend.create_image_view(&info)?;
        Ok(ImageView {
            image: Arc::clone(self),
            handle,
            descriptor,
            dimension,
        })
    }

    fn view_dimension(
        &self,
        descriptor: &ImageViewDescriptor,
    ) -> Result<ImageViewDimension, GraphicsError> {
        if descriptor.levels == 0 || descriptor.layers == 0 {
            return Err(GraphicsError::InvalidParameter(
                "image view must cover at least one level and one layer".to_string(),
            ));
        }
        let level_end = descriptor.base_level.checked_add(descriptor.levels);
        if level_end.is_none_or(|end| end > self.descriptor.levels) {
            return Err(GraphicsError::InvalidParameter(format!(
                "view levels {}..+{} outside image with {} levels",
                descriptor.base_level, descriptor.levels, self.descriptor.levels
            )));
        }
        let layer_end = descriptor.base_layer.checked_add(descriptor.layers);
        if layer_end.is_none_or(|end| end > self.descriptor.layers) {
            return Err(GraphicsError::InvalidParameter(format!(
                "view layers {}..+{} outside image with {} layers",
                descriptor.base_layer, descriptor.layers, self.descriptor.layers
            )));
        }

        Ok(match (self.descriptor.dimension, descriptor.layers) {
            (ImageDimension::D1, 1) => ImageViewDimension::D1,
            (ImageDimension::D1, _) => ImageViewDimension::D1Array,
            (ImageDimension::D2, 1) => ImageViewDimension::D2,
            (ImageDimension::D2, _) => ImageViewDimension::D2Array,
            (ImageDimension::D3, _) => ImageViewDimension::D3,
        })
    }

    /// Upload texels into one level and layer.
    ///
    /// The data is staged in a host-visible buffer and copied on the default
    /// queue's priority command buffer, so it lands before any work submitted
    /// with the next [`Queue::submit`](crate::Queue::submit).
    ///
    /// # Errors
    ///
    /// Returns an error if the region lies outside the level, the data length
    /// does not match the region, or the image cannot be a copy destination
    /// (no `COPY_DST` usage, multisampled, or combined depth/stencil). No
    /// staging buffer or priority work is created when validation fails.
    pub fn write(
        self: &Arc<Self>,
        origin: Origin3d,
        level: u32,
        layer: u32,
        extent: Extent3d,
        data: &[u8],
    ) -> Result<(), GraphicsError> {
        // Everything the copy will check, before anything is created.
        let region = ImageRegion::new(Arc::clone(self), level, layer, origin);
        check_image_upload(&region, extent)?;
        let expected = extent.texel_count() * self.descriptor.format.texel_size() as u64;
        if data.len() as u64 != expected {
            return Err(GraphicsError::InvalidParameter(format!(
                "image write expects {expected} bytes, got {}",
                data.len()
            )));
        }

        let device = self
            .device
            .upgrade()
            .ok_or_else(|| GraphicsError::InvalidState("device has been dropped".to_string()))?;
        let staging = device.create_buffer(
            &BufferDescriptor::new(expected, BufferUsage::COPY_SRC).with_label("image staging"),
        )?;
        staging.write(0, data)?;

        let mut encoder = TransferEncoder::new();
        encoder.copy_buffer_to_image(&staging, 0, region, extent);

        let label = self.descriptor.label.clone();
        let priority = device.default_queue().priority(
            PipelineStage::ALL_COMMANDS,
            Box::new(move |success| {
                log::trace!("Image {:?}: upload finished, success={}", label, success);
                drop(staging);
            }),
        )?;
        priority.encode(&encoder)
    }

    /// Validate that `extent` at `origin` fits level `level` and layers
    /// `layer..layer + layers`.
    pub(crate) fn check_region(
        &self,
        origin: Origin3d,
        level: u32,
        layer: u32,
        extent: Extent3d,
        layers: u32,
    ) -> Result<(), GraphicsError> {
        if level >= self.descriptor.levels {
            return Err(GraphicsError::InvalidParameter(format!(
                "level {level} out of range ({} levels)",
                self.descriptor.levels
            )));
        }
        if layers == 0 || layer.checked_add(layers).is_none_or(|end| end > self.descriptor.layers) {
            return Err(GraphicsError::InvalidParameter(format!(
                "layers {layer}..+{layers} out of range ({} layers)",
                self.descriptor.layers
            )));
        }
        if extent.is_empty() {
            return Err(GraphicsError::InvalidParameter(
                "region extent must not be empty".to_string(),
            ));
        }
        let size = self.descriptor.size.mip_level_size(level);
        let fits = |o: u32, e: u32, s: u32| o.checked_add(e).is_some_and(|end| end <= s);
        if !fits(origin.x, extent.width, size.width)
            || !fits(origin.y, extent.height, size.height)
            || !fits(origin.z, extent.depth, size.depth)
        {
            return Err(GraphicsError::InvalidParameter(format!(
                "region {origin:?} + {extent:?} exceeds level {level} size {size:?}"
            )));
        }
        Ok(())
    }

    /// Get the parent device, if it still exists.
    pub fn device(&self) -> Option<Arc<GraphicsDevice>> {
        self.device.upgrade()
    }

    /// Get the backend handle.
    pub fn handle(&self) -> ImageHandle {
        self.handle
    }

    /// Get the image descriptor.
    pub fn descriptor(&self) -> &ImageDescriptor {
        &self.descriptor
    }

    /// Get the pixel format.
    pub fn format(&self) -> Format {
        self.descriptor.format
    }

    /// Get the size of level 0.
    pub fn size(&self) -> Extent3d {
        self.descriptor.size
    }

    /// Get the sample count.
    pub fn samples(&self) -> Samples {
        self.descriptor.samples
    }

    /// Get the usage flags.
    pub fn usage(&self) -> ImageUsage {
        self.descriptor.usage
    }

    /// Get the image label, if set.
    pub fn label(&self) -> Option<&str> {
        self.descriptor.label.as_deref()
    }
}

fn validate_descriptor(
    descriptor: &ImageDescriptor,
    device: &GraphicsDevice,
) -> Result<(), GraphicsError> {
    let limits = device.limits();
    let invalid = |msg: String| Err(GraphicsError::InvalidParameter(msg));
    let size = descriptor.size;

    if descriptor.format == Format::Undefined {
        return invalid("image format must not be Undefined".to_string());
    }
    if descriptor.usage.is_empty() {
        return invalid("image usage must not be empty".to_string());
    }
    if size.is_empty() {
        return invalid(format!("image size {size:?} has a zero dimension"));
    }
    if descriptor.layers == 0 || descriptor.layers > limits.max_image_layers {
        return invalid(format!(
            "image layers {} outside 1..={}",
            descriptor.layers, limits.max_image_layers
        ));
    }
    if descriptor.levels == 0 || descriptor.levels > descriptor.max_levels() {
        return invalid(format!(
            "image levels {} outside 1..={}",
            descriptor.levels,
            descriptor.max_levels()
        ));
    }

    match descriptor.dimension {
        ImageDimension::D1 => {
            if size.height != 1 || size.depth != 1 || size.width > limits.max_image_dimension_1d {
                return invalid(format!("invalid 1D image size {size:?}"));
            }
        }
        ImageDimension::D2 => {
            let max = limits.max_image_dimension_2d;
            if size.depth != 1 || size.width > max || size.height > max {
                return invalid(format!("invalid 2D image size {size:?}"));
            }
        }
        ImageDimension::D3 => {
            let max = limits.max_image_dimension_3d;
            if descriptor.layers != 1 || size.width > max || size.height > max || size.depth > max {
                return invalid(format!(
                    "invalid 3D image size {size:?} with {} layers",
                    descriptor.layers
                ));
            }
        }
    }

    if descriptor.samples != Samples::S1
        && (descriptor.dimension != ImageDimension::D2 || descriptor.levels != 1)
    {
        return invalid("multisampled images must be 2D with a single level".to_string());
    }
    Ok(())
}

impl Drop for Image {
    fn drop(&mut self) {
        if self.owned {
            self.backend.destroy_image(self.handle);
        }
    }
}

impl std::fmt::Debug for Image {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Image")
            .field("size", &self.descriptor.size)
            .field("format", &self.descriptor.format)
            .field("levels", &self.descriptor.levels)
            .field("layers", &self.descriptor.layers)
            .field("label", &self.descriptor.label)
            .finish()
    }
}

/// A view of a level and layer range of an [`Image`].
///
/// The view keeps its image alive.
pub struct ImageView {
    image: Arc<Image>,
    handle: ImageViewHandle,
    descriptor: ImageViewDescriptor,
    dimension: ImageViewDimension,
}

impl ImageView {
    /// Get the viewed image.
    pub fn image(&self) -> &Arc<Image> {
        &self.image
    }

    /// Get the backend handle.
    pub fn handle(&self) -> ImageViewHandle {
        self.handle
    }

    /// Get the viewed range.
    pub fn descriptor(&self) -> &ImageViewDescriptor {
        &self.descriptor
    }

    /// Get the view dimension.
    pub fn dimension(&self) -> ImageViewDimension {
        self.dimension
    }
}

impl Drop for ImageView {
    fn drop(&mut self) {
        self.image.backend.destroy_image_view(self.handle);
    }
}

impl std::fmt::Debug for ImageView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageView")
            .field("image", &self.image.descriptor.label)
            .field("dimension", &self.dimension)
            .field("range", &self.descriptor)
            .finish()
    }
}

static_assertions::assert_impl_all!(Image: Send, Sync);
static_assertions::assert_impl_all!(ImageView: Send, Sync);
