//! Descriptor tables.
//!
//! A [`DcTable`] is a typed set of binding slots. [`DcTable::allocate`]
//! creates `n` independent allocations so that each in-flight frame can use
//! its own copy of the bindings.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::backend::{
    DescriptorLayoutHandle, DescriptorPoolHandle, DescriptorResource, DescriptorSetHandle,
    DescriptorWrite, GpuBackend,
};
use crate::device::GraphicsDevice;
use crate::error::{GraphicsError, check_range};
use crate::resources::{Buffer, Image, ImageView, Sampler};
use crate::types::{
    BufferUsage, DcEntry, DcType, ImageUsage, ImageViewDescriptor, SamplerDescriptor,
};

/// Resources referenced by written descriptors, kept alive with the table.
enum Retained {
    Buffer(Arc<Buffer>),
    Image(ImageView, Option<Arc<Sampler>>),
    Sampler(Arc<Sampler>),
}

#[derive(Default)]
struct Allocations {
    pool: Option<DescriptorPoolHandle>,
    sets: Vec<DescriptorSetHandle>,
    /// Keyed by (allocation, binding id, element).
    retained: HashMap<(u32, u32, u32), Retained>,
}

/// A descriptor table layout with its allocations.
pub struct DcTable {
    device: Weak<GraphicsDevice>,
    backend: Arc<dyn GpuBackend>,
    layout: DescriptorLayoutHandle,
    entries: Vec<DcEntry>,
    uniform_alignment: u64,
    allocations: Mutex<Allocations>,
    default_sampler: Mutex<Option<Arc<Sampler>>>,
}

impl DcTable {
    pub(crate) fn new(
        device: &Arc<GraphicsDevice>,
        entries: Vec<DcEntry>,
    ) -> Result<Self, GraphicsError> {
        for (i, entry) in entries.iter().enumerate() {
            if entry.count == 0 {
                return Err(GraphicsError::InvalidParameter(format!(
                    "descriptor entry {} has zero count",
                    entry.id
                )));
            }
            if entries[..i].iter().any(|other| other.id == entry.id) {
                return Err(GraphicsError::InvalidParameter(format!(
                    "duplicate descriptor entry id {}",
                    entry.id
                )));
            }
        }

        let backend = Arc::clone(device.backend());
        let layout = backend.create_descriptor_layout(&entries)?;
        log::trace!(
            "GraphicsDevice: created descriptor table with {} entries",
            entries.len()
        );
        Ok(Self {
            device: Arc::downgrade(device),
            backend,
            layout,
            entries,
            uniform_alignment: device.limits().min_uniform_offset_alignment.max(1),
            allocations: Mutex::new(Allocations::default()),
            default_sampler: Mutex::new(None),
        })
    }

    /// Create `count` allocations, replacing (and invalidating) any previous ones.
    ///
    /// # Errors
    ///
    /// Returns an error if `count` is zero or the backend cannot allocate.
    /// Previous allocations stay intact on failure.
    pub fn allocate(&self, count: u32) -> Result<(), GraphicsError> {
        if count == 0 {
            return Err(GraphicsError::InvalidParameter(
                "descriptor table allocation count must be non-zero".to_string(),
            ));
        }
        let (pool, sets) = self
            .backend
            .allocate_descriptor_sets(self.layout, &self.entries, count)?;

        let mut allocations = self.allocations.lock();
        if let Some(old) = allocations.pool.replace(pool) {
            self.backend.destroy_descriptor_pool(old);
        }
        allocations.sets = sets;
        allocations.retained.clear();
        Ok(())
    }

    /// Number of allocations.
    pub fn allocations(&self) -> u32 {
        self.allocations.lock().sets.len() as u32
    }

    /// Get the layout entries.
    pub fn entries(&self) -> &[DcEntry] {
        &self.entries
    }

    pub(crate) fn layout(&self) -> DescriptorLayoutHandle {
        self.layout
    }

    pub(crate) fn set(&self, alloc: u32) -> Option<DescriptorSetHandle> {
        self.allocations.lock().sets.get(alloc as usize).copied()
    }

    fn entry(&self, alloc: u32, id: u32, element: u32) -> Result<&DcEntry, GraphicsError> {
        let allocations = self.allocations();
        if alloc >= allocations {
            return Err(GraphicsError::InvalidParameter(format!(
                "allocation {alloc} out of range ({allocations} allocations)"
            )));
        }
        let entry = self
            .entries
            .iter()
            .find(|entry| entry.id == id)
            .ok_or_else(|| GraphicsError::InvalidParameter(format!("no descriptor entry {id}")))?;
        if element >= entry.count {
            return Err(GraphicsError::InvalidParameter(format!(
                "element {element} out of range for entry {id} ({} elements)",
                entry.count
            )));
        }
        Ok(entry)
    }

    fn commit(
        &self,
        alloc: u32,
        id: u32,
        element: u32,
        kind: DcType,
        resource: DescriptorResource,
        retained: Retained,
    ) -> Result<(), GraphicsError> {
        let mut allocations = self.allocations.lock();
        let set = allocations
            .sets
            .get(alloc as usize)
            .copied()
            .ok_or_else(|| GraphicsError::InvalidState("allocations replaced".to_string()))?;
        self.backend.write_descriptor(&DescriptorWrite {
            set,
            binding: id,
            element,
            kind,
            resource,
        })?;
        allocations.retained.insert((alloc, id, element), retained);
        Ok(())
    }

    /// Bind a buffer range to a Uniform or Storage slot.
    pub fn write_buffer(
        &self,
        alloc: u32,
        id: u32,
        element: u32,
        buffer: &Arc<Buffer>,
        offset: u64,
        size: u64,
    ) -> Result<(), GraphicsError> {
        let entry = self.entry(alloc, id, element)?;
        let usage = match entry.kind {
            DcType::Uniform => BufferUsage::UNIFORM,
            DcType::Storage => BufferUsage::STORAGE,
            other => {
                return Err(GraphicsError::InvalidParameter(format!(
                    "entry {id} is {other:?}, not a buffer binding"
                )));
            }
        };
        if size == 0 {
            return Err(GraphicsError::InvalidParameter(
                "buffer binding size must be non-zero".to_string(),
            ));
        }
        check_range(offset, size, buffer.size())?;
        if entry.kind == DcType::Uniform && offset % self.uniform_alignment != 0 {
            return Err(GraphicsError::InvalidParameter(format!(
                "uniform offset {offset} not aligned to {}",
                self.uniform_alignment
            )));
        }
        buffer.require_usage(usage, "descriptor")?;

        self.commit(
            alloc,
            id,
            element,
            entry.kind,
            DescriptorResource::Buffer {
                buffer: buffer.handle(),
                offset,
                size,
            },
            Retained::Buffer(Arc::clone(buffer)),
        )
    }

    /// Bind one level and layer of an image to an Image or ImgSampler slot.
    ///
    /// ImgSampler slots without an explicit sampler use a shared nearest
    /// sampler created on first use.
    #[allow(clippy::too_many_arguments)]
    pub fn write_image(
        &self,
        alloc: u32,
        id: u32,
        element: u32,
        image: &Arc<Image>,
        layer: u32,
        level: u32,
        sampler: Option<&Arc<Sampler>>,
    ) -> Result<(), GraphicsError> {
        let entry = self.entry(alloc, id, element)?;
        if !entry.kind.is_image() {
            return Err(GraphicsError::InvalidParameter(format!(
                "entry {id} is {:?}, not an image binding",
                entry.kind
            )));
        }
        if !image
            .usage()
            .intersects(ImageUsage::SAMPLED | ImageUsage::STORAGE)
        {
            return Err(GraphicsError::InvalidParameter(
                "image bound to a descriptor without SAMPLED or STORAGE usage".to_string(),
            ));
        }

        let sampler = match (entry.kind, sampler) {
            (DcType::ImgSampler, Some(sampler)) => Some(Arc::clone(sampler)),
            (DcType::ImgSampler, None) => Some(self.default_sampler()?),
            _ => None,
        };
        let view = image.view(ImageViewDescriptor::new(level, layer, 1))?;
        self.commit(
            alloc,
            id,
            element,
            entry.kind,
            DescriptorResource::Image {
                view: view.handle(),
                sampler: sampler.as_ref().map(|s| s.handle()),
            },
            Retained::Image(view, sampler),
        )
    }

    /// Bind a sampler to a Sampler slot.
    pub fn write_sampler(
        &self,
        alloc: u32,
        id: u32,
        element: u32,
        sampler: &Arc<Sampler>,
    ) -> Result<(), GraphicsError> {
        let entry = self.entry(alloc, id, element)?;
        if entry.kind != DcType::Sampler {
            return Err(GraphicsError::InvalidParameter(format!(
                "entry {id} is {:?}, not a sampler binding",
                entry.kind
            )));
        }
        self.commit(
            alloc,
            id,
            element,
            DcType::Sampler,
            DescriptorResource::Sampler(sampler.handle()),
            Retained::Sampler(Arc::clone(sampler)),
        )
    }

    fn default_sampler(&self) -> Result<Arc<Sampler>, GraphicsError> {
        let mut slot = self.default_sampler.lock();
        if let Some(sampler) = slot.as_ref() {
            return Ok(Arc::clone(sampler));
        }
        let device = self
            .device
            .upgrade()
            .ok_or_else(|| GraphicsError::InvalidState("device has been dropped".to_string()))?;
        let sampler = device.create_sampler(&SamplerDescriptor::nearest().with_label("default"))?;
        *slot = Some(Arc::clone(&sampler));
        Ok(sampler)
    }
}

impl Drop for DcTable {
    fn drop(&mut self) {
        let allocations = self.allocations.get_mut();
        allocations.retained.clear();
        if let Some(pool) = allocations.pool.take() {
            self.backend.destroy_descriptor_pool(pool);
        }
        self.backend.destroy_descriptor_layout(self.layout);
    }
}

impl std::fmt::Debug for DcTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DcTable")
            .field("entries", &self.entries)
            .field("allocations", &self.allocations())
            .finish()
    }
}

static_assertions::assert_impl_all!(DcTable: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::test_device;
    use crate::types::{BufferDescriptor, Format, ImageDescriptor};

    fn table(device: &Arc<GraphicsDevice>) -> Arc<DcTable> {
        device
            .create_dc_table(&[
                DcEntry::new(0, DcType::Uniform, 1),
                DcEntry::new(1, DcType::ImgSampler, 2),
                DcEntry::new(2, DcType::Sampler, 1),
            ])
            .unwrap()
    }

    #[test]
    fn test_entry_validation() {
        let (device, _backend) = test_device();
        let duplicate = device.create_dc_table(&[
            DcEntry::new(0, DcType::Uniform, 1),
            DcEntry::new(0, DcType::Storage, 1),
        ]);
        assert!(duplicate.is_err());

        let empty = device.create_dc_table(&[DcEntry::new(0, DcType::Uniform, 0)]);
        assert!(empty.is_err());
    }

    #[test]
    fn test_allocate_replaces_previous() {
        let (device, backend) = test_device();
        let table = table(&device);
        assert!(table.allocate(0).is_err());

        table.allocate(3).unwrap();
        let first = table.set(0).unwrap();
        assert_eq!(table.allocations(), 3);

        table.allocate(2).unwrap();
        assert_eq!(table.allocations(), 2);
        assert_ne!(table.set(0).unwrap(), first);
        assert_eq!(backend.live_count("descriptor_pool"), 1);
    }

    #[test]
    fn test_write_buffer_checks() {
        let (device, _backend) = test_device();
        let table = table(&device);
        table.allocate(2).unwrap();
        let buffer = device
            .create_buffer(&BufferDescriptor::new(1024, BufferUsage::UNIFORM))
            .unwrap();

        table.write_buffer(1, 0, 0, &buffer, 256, 64).unwrap();
        assert!(table.write_buffer(2, 0, 0, &buffer, 0, 64).is_err());
        assert!(table.write_buffer(0, 0, 1, &buffer, 0, 64).is_err());
        assert!(table.write_buffer(0, 9, 0, &buffer, 0, 64).is_err());
        assert!(table.write_buffer(0, 1, 0, &buffer, 0, 64).is_err());
        assert!(table.write_buffer(0, 0, 0, &buffer, 100, 64).is_err());
        assert!(matches!(
            table.write_buffer(0, 0, 0, &buffer, 768, 512),
            Err(GraphicsError::OutOfBounds { .. })
        ));
    }

    #[test]
    fn test_write_image_retains_view_and_default_sampler() {
        let (device, backend) = test_device();
        let table = table(&device);
        table.allocate(1).unwrap();
        let image = device
            .create_image(&ImageDescriptor::new_2d(
                4,
                4,
                Format::Rgba8Unorm,
                ImageUsage::SAMPLED,
            ))
            .unwrap();

        table.write_image(0, 1, 0, &image, 0, 0, None).unwrap();
        table.write_image(0, 1, 1, &image, 0, 0, None).unwrap();
        assert_eq!(backend.live_count("image_view"), 2);
        assert_eq!(backend.live_count("sampler"), 1);

        // Rewriting a slot releases the view it held.
        table.write_image(0, 1, 1, &image, 0, 0, None).unwrap();
        assert_eq!(backend.live_count("image_view"), 2);

        assert!(table.write_image(0, 2, 0, &image, 0, 0, None).is_err());
        assert!(table.write_image(0, 1, 0, &image, 1, 0, None).is_err());

        drop(table);
        assert_eq!(backend.live_count("image_view"), 0);
    }

    #[test]
    fn test_write_sampler_requires_sampler_slot() {
        let (device, _backend) = test_device();
        let table = table(&device);
        table.allocate(1).unwrap();
        let sampler = device.create_sampler(&SamplerDescriptor::linear()).unwrap();
        table.write_sampler(0, 2, 0, &sampler).unwrap();
        assert!(table.write_sampler(0, 0, 0, &sampler).is_err());
    }
}
