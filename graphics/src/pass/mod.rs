//! Passes and render targets.
//!
//! A [`Pass`] declares the shape of a render target: color attachment
//! formats, optional resolve attachments mirroring them, and an optional
//! depth/stencil attachment. A [`Target`] binds concrete images to that shape.
//!
//! Backend render passes depend on load/store operations, framebuffers do
//! not. Each pass therefore owns a small cache of render passes keyed by the
//! operations requested through [`TargetOp`], while each target owns exactly
//! one framebuffer built against the pass's load/store render pass.

mod cache;
mod target;

use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::backend::{DepthStencilInfo, GpuBackend, RenderPassHandle, RenderPassInfo};
use crate::device::GraphicsDevice;
use crate::error::GraphicsError;
use crate::queue::DeferredRelease;
use crate::types::{Aspect, AttachmentDesc, AttachmentOp, Extent2d, Samples};

use cache::{RenderPassCache, RenderPassKey};

pub use target::{AttachImg, ColorOp, Target, TargetOp};

/// Attachment shape of a render target, with a cache of backend render passes.
///
/// # Example
///
/// ```ignore
/// let pass = device.create_pass(&[AttachmentDesc::single(Format::Rgba8Unorm)], &[], None)?;
/// let target = pass.target(Extent2d::new(64, 64), 1, &[AttachImg::new(image)], &[], None)?;
/// ```
pub struct Pass {
    device: Weak<GraphicsDevice>,
    backend: Arc<dyn GpuBackend>,
    colors: Vec<AttachmentDesc>,
    resolves: Vec<AttachmentDesc>,
    depth_stencil: Option<AttachmentDesc>,
    cache: Mutex<RenderPassCache>,
}

impl Pass {
    pub(crate) fn new(
        device: &Arc<GraphicsDevice>,
        colors: Vec<AttachmentDesc>,
        resolves: Vec<AttachmentDesc>,
        depth_stencil: Option<AttachmentDesc>,
    ) -> Result<Self, GraphicsError> {
        let max_colors = device.limits().max_color_attachments as usize;
        if colors.len() > max_colors {
            return Err(GraphicsError::InvalidParameter(format!(
                "{} color attachments exceed the limit of {max_colors}",
                colors.len()
            )));
        }
        for (i, color) in colors.iter().enumerate() {
            if !color.format.aspect().contains(Aspect::COLOR) {
                return Err(GraphicsError::InvalidParameter(format!(
                    "color attachment {i} has non-color format {:?}",
                    color.format
                )));
            }
        }

        if !resolves.is_empty() {
            if colors.is_empty() {
                return Err(GraphicsError::InvalidParameter(
                    "resolve attachments require color attachments".to_string(),
                ));
            }
            if resolves.len() != colors.len() {
                return Err(GraphicsError::InvalidParameter(format!(
                    "{} resolve attachments for {} color attachments",
                    resolves.len(),
                    colors.len()
                )));
            }
            for (i, (color, resolve)) in colors.iter().zip(&resolves).enumerate() {
                if color.format != resolve.format {
                    return Err(GraphicsError::InvalidParameter(format!(
                        "resolve attachment {i} format {:?} differs from color format {:?}",
                        resolve.format, color.format
                    )));
                }
                if resolve.samples != Samples::S1 || color.samples == Samples::S1 {
                    return Err(GraphicsError::InvalidParameter(format!(
                        "resolve attachment {i} must resolve a multisampled color into a single-sampled one"
                    )));
                }
            }
        }

        if let Some(depth) = &depth_stencil
            && !depth.format.is_depth_stencil()
        {
            return Err(GraphicsError::InvalidParameter(format!(
                "depth/stencil attachment has format {:?} without depth or stencil aspect",
                depth.format
            )));
        }

        Ok(Self {
            device: Arc::downgrade(device),
            backend: Arc::clone(device.backend()),
            colors,
            resolves,
            depth_stencil,
            cache: Mutex::new(RenderPassCache::new(
                device.parameters().render_pass_cache_capacity,
            )),
        })
    }

    /// Get the color attachment descriptors.
    pub fn colors(&self) -> &[AttachmentDesc] {
        &self.colors
    }

    /// Get the resolve attachment descriptors. Empty or one per color.
    pub fn resolves(&self) -> &[AttachmentDesc] {
        &self.resolves
    }

    /// Get the depth/stencil attachment descriptor.
    pub fn depth_stencil(&self) -> Option<AttachmentDesc> {
        self.depth_stencil
    }

    /// Total number of attachments: colors, resolves, depth/stencil.
    pub fn attachment_count(&self) -> usize {
        self.colors.len() + self.resolves.len() + usize::from(self.depth_stencil.is_some())
    }

    /// Sample count of the rasterized attachments.
    pub fn samples(&self) -> Samples {
        self.colors
            .first()
            .or(self.depth_stencil.as_ref())
            .map_or(Samples::S1, |desc| desc.samples)
    }

    /// Returns true if both passes declare the same attachment shape.
    pub fn is_compatible(&self, other: &Pass) -> bool {
        self.colors == other.colors
            && self.resolves == other.resolves
            && self.depth_stencil == other.depth_stencil
    }

    /// Bind images to this pass's shape.
    ///
    /// # Errors
    ///
    /// Returns an error if the attachment cardinality or any image's format,
    /// sample count, usage or extent does not fit the pass, or the size
    /// exceeds device limits.
    pub fn target(
        self: &Arc<Self>,
        size: Extent2d,
        layers: u32,
        colors: &[AttachImg],
        resolves: &[AttachImg],
        depth_stencil: Option<&AttachImg>,
    ) -> Result<Arc<Target>, GraphicsError> {
        Ok(Arc::new(Target::new(
            self,
            size,
            layers,
            colors,
            resolves,
            depth_stencil,
        )?))
    }

    /// Get the backend render pass for the given operations, building it on a
    /// cache miss.
    ///
    /// Repeated calls with equal operations return the same handle while it
    /// stays cached. Handles evicted to make room are released after the
    /// device's queue next drains.
    pub fn render_pass(&self, op: &TargetOp) -> Result<RenderPassHandle, GraphicsError> {
        let key = self.key_for(op)?;
        self.render_pass_for_key(&key)
    }

    /// The render pass used to build framebuffers and pipelines: load and
    /// store for every attachment.
    pub(crate) fn compatible_render_pass(&self) -> Result<RenderPassHandle, GraphicsError> {
        let key = RenderPassKey {
            colors: vec![AttachmentOp::LOAD_STORE; self.colors.len()],
            depth: AttachmentOp::LOAD_STORE,
            stencil: AttachmentOp::LOAD_STORE,
        };
        self.render_pass_for_key(&key)
    }

    fn key_for(&self, op: &TargetOp) -> Result<RenderPassKey, GraphicsError> {
        if op.colors.len() != self.colors.len() {
            return Err(GraphicsError::InvalidParameter(format!(
                "target operation has {} color ops for {} color attachments",
                op.colors.len(),
                self.colors.len()
            )));
        }
        // Operations on aspects the pass lacks never reach the backend, so
        // they must not split the cache either.
        let (depth, stencil) = match self.depth_stencil {
            Some(desc) => {
                let aspect = desc.format.aspect();
                let pick = |present: bool, op: AttachmentOp| {
                    if present { op } else { AttachmentOp::LOAD_STORE }
                };
                (
                    pick(aspect.contains(Aspect::DEPTH), op.depth),
                    pick(aspect.contains(Aspect::STENCIL), op.stencil),
                )
            }
            None => (AttachmentOp::LOAD_STORE, AttachmentOp::LOAD_STORE),
        };
        Ok(RenderPassKey {
            colors: op.colors.iter().map(|color| color.op).collect(),
            depth,
            stencil,
        })
    }

    fn render_pass_for_key(&self, key: &RenderPassKey) -> Result<RenderPassHandle, GraphicsError> {
        let lookup = {
            let mut cache = self.cache.lock();
            cache.get_or_insert_with(key, || self.backend.create_render_pass(&self.info(key)))?
        };

        if lookup.hit {
            log::trace!("Pass: render pass cache hit {:?}", lookup.handle);
        } else {
            log::debug!("Pass: built render pass {:?} for {:?}", lookup.handle, key);
        }
        if let Some(evicted) = lookup.evicted {
            log::debug!("Pass: evicted render pass {:?}", evicted);
            self.retire(evicted);
        }
        Ok(lookup.handle)
    }

    fn info(&self, key: &RenderPassKey) -> RenderPassInfo {
        RenderPassInfo {
            colors: self.colors.iter().copied().zip(key.colors.iter().copied()).collect(),
            resolves: self.resolves.clone(),
            depth_stencil: self.depth_stencil.map(|desc| DepthStencilInfo {
                desc,
                depth: key.depth,
                stencil: key.stencil,
            }),
        }
    }

    /// Command buffers recorded but not yet submitted may still reference an
    /// evicted render pass, so destruction waits for the queue to drain.
    fn retire(&self, render_pass: RenderPassHandle) {
        let backend = Arc::clone(&self.backend);
        self.release_later(Box::new(move || backend.destroy_render_pass(render_pass)));
    }

    /// Run `release` once the device's queue has drained, or now if the
    /// device is gone.
    pub(crate) fn release_later(&self, release: DeferredRelease) {
        match self.device.upgrade() {
            Some(device) => device.default_queue().defer_release(release),
            None => release(),
        }
    }

    #[cfg(test)]
    pub(crate) fn cached_render_passes(&self) -> usize {
        self.cache.lock().len()
    }
}

impl Drop for Pass {
    fn drop(&mut self) {
        let render_passes = self.cache.get_mut().drain();
        if render_passes.is_empty() {
            return;
        }
        let backend = Arc::clone(&self.backend);
        self.release_later(Box::new(move || {
            for render_pass in render_passes {
                backend.destroy_render_pass(render_pass);
            }
        }));
    }
}

impl std::fmt::Debug for Pass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pass")
            .field("colors", &self.colors)
            .field("resolves", &self.resolves)
            .field("depth_stencil", &self.depth_stencil)
            .finish_non_exhaustive()
    }
}

static_assertions::assert_impl_all!(Pass: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{DeviceParameters, GraphicsDevice, test_device};
    use crate::backend::DummyBackend;
    use crate::types::{Format, LoadOp, StoreOp};

    fn rgba() -> AttachmentDesc {
        AttachmentDesc::single(Format::Rgba8Unorm)
    }

    fn msaa() -> AttachmentDesc {
        AttachmentDesc::new(Format::Rgba8Unorm, Samples::S4)
    }

    #[test]
    fn test_resolve_validation() {
        let (device, _backend) = test_device();

        assert!(device.create_pass(&[msaa()], &[rgba()], None).is_ok());
        assert!(device.create_pass(&[msaa(), msaa()], &[rgba()], None).is_err());
        assert!(device.create_pass(&[], &[rgba()], None).is_err());
        assert!(
            device
                .create_pass(&[msaa()], &[AttachmentDesc::single(Format::Bgra8Unorm)], None)
                .is_err()
        );
    }

    #[test]
    fn test_aspect_validation() {
        let (device, _backend) = test_device();
        let depth = AttachmentDesc::single(Format::D32Float);

        assert!(device.create_pass(&[depth], &[], None).is_err());
        assert!(device.create_pass(&[rgba()], &[], Some(rgba())).is_err());
        assert!(device.create_pass(&[rgba()], &[], Some(depth)).is_ok());
        assert!(device.create_pass(&[], &[], Some(depth)).is_ok());
        assert!(
            device
                .create_pass(&[AttachmentDesc::single(Format::Undefined)], &[], None)
                .is_err()
        );
    }

    #[test]
    fn test_color_limit() {
        let (device, _backend) = test_device();
        let colors = vec![rgba(); 9];
        assert!(device.create_pass(&colors, &[], None).is_err());
    }

    #[test]
    fn test_render_pass_cache_idempotent() {
        let (device, backend) = test_device();
        let pass = device.create_pass(&[rgba()], &[], None).unwrap();

        let clear = TargetOp::clear(1, [0.0, 0.0, 0.0, 1.0]);
        let load = TargetOp::load(1);
        let a = pass.render_pass(&clear).unwrap();
        let b = pass.render_pass(&clear).unwrap();
        let c = pass.render_pass(&load).unwrap();

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(backend.stats().render_passes_created, 2);
        assert_eq!(
            backend.render_pass_info(a).unwrap().colors[0].1,
            AttachmentOp::CLEAR_STORE
        );
    }

    #[test]
    fn test_unused_depth_ops_share_a_slot() {
        let (device, backend) = test_device();
        let pass = device.create_pass(&[rgba()], &[], None).unwrap();

        let a = pass.render_pass(&TargetOp::load(1)).unwrap();
        let b = pass
            .render_pass(&TargetOp::load(1).with_depth(AttachmentOp::CLEAR_STORE, 1.0))
            .unwrap();
        assert_eq!(a, b);
        assert_eq!(backend.stats().render_passes_created, 1);
    }

    #[test]
    fn test_eviction_never_mixes_ops() {
        let backend = Arc::new(DummyBackend::new());
        let device = GraphicsDevice::with_backend(
            Arc::clone(&backend) as Arc<dyn GpuBackend>,
            DeviceParameters::new().with_render_pass_cache_capacity(2),
        );
        let pass = device.create_pass(&[rgba()], &[], None).unwrap();

        let ops = [
            AttachmentOp::LOAD_STORE,
            AttachmentOp::CLEAR_STORE,
            AttachmentOp::DONT_CARE,
            AttachmentOp::new(LoadOp::Clear, StoreOp::DontCare),
        ];
        let mut seen = Vec::new();
        for round in 0..3 {
            for op in ops {
                let target_op = TargetOp::load(1).with_color(0, op, [0.0; 4]);
                let handle = pass.render_pass(&target_op).unwrap();
                let info = backend.render_pass_info(handle).unwrap();
                assert_eq!(info.colors[0].1, op, "round {round}");
                seen.push(handle);
            }
        }
        assert!(pass.cached_render_passes() <= 2);
        let unique: std::collections::HashSet<_> = seen.iter().collect();
        assert_eq!(unique.len(), seen.len());

        // Evicted passes are released once the queue drains.
        assert!(backend.live_count("render_pass") > 2);
        device.default_queue().submit().unwrap();
        assert_eq!(backend.live_count("render_pass"), 2);
    }

    #[test]
    fn test_drop_releases_cached_render_passes() {
        let (device, backend) = test_device();
        let pass = device.create_pass(&[rgba()], &[], None).unwrap();
        pass.render_pass(&TargetOp::load(1)).unwrap();
        pass.render_pass(&TargetOp::clear(1, [0.0; 4])).unwrap();
        drop(pass);
        // A recorded buffer may still name them until the queue drains.
        assert_eq!(backend.live_count("render_pass"), 2);
        device.default_queue().submit().unwrap();
        assert_eq!(backend.live_count("render_pass"), 0);
    }

    #[test]
    fn test_drop_after_device_releases_immediately() {
        let (device, backend) = test_device();
        let pass = device.create_pass(&[rgba()], &[], None).unwrap();
        pass.render_pass(&TargetOp::load(1)).unwrap();
        drop(device);
        drop(pass);
        assert_eq!(backend.live_count("render_pass"), 0);
        assert_eq!(backend.stats().unknown_destroys, 0);
    }
}
