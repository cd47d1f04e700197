//! Virtual resources for the render graph

use crate::error::{UlrError, UlrResult};
use crate::pipeline::{BlendOutput, PositionBuffer};
use std::collections::HashMap;

/// Unique identifier for a render graph resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId(pub(crate) u32);

/// Content kind of a frame texture
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameFormat {
    /// World position in xyz, NDC depth in w
    Position,
    /// Blended colour plus per-pixel coverage
    Blend,
}

/// Virtual texture resource in the render graph
#[derive(Debug, Clone)]
pub struct VirtualTexture {
    pub id: ResourceId,
    pub name: String,
    pub format: FrameFormat,
}

/// Resource type enumeration
#[derive(Debug, Clone)]
pub enum VirtualResource {
    Texture(VirtualTexture),
    /// External resource handed back to the caller (the frame output)
    External(ResourceId),
}

impl VirtualResource {
    pub fn id(&self) -> ResourceId {
        match self {
            VirtualResource::Texture(t) => t.id,
            VirtualResource::External(id) => *id,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            VirtualResource::Texture(t) => &t.name,
            VirtualResource::External(_) => "external",
        }
    }

    /// Declared content kind; external resources accept any image
    pub fn format(&self) -> Option<FrameFormat> {
        match self {
            VirtualResource::Texture(t) => Some(t.format),
            VirtualResource::External(_) => None,
        }
    }
}

/// How a pass uses a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceUsage {
    /// Read as a texture (sampled)
    TextureRead,
    /// Write as a render target
    RenderTarget,
    /// Read/write as storage texture
    StorageRead,
    StorageWrite,
}

/// Resource access declaration for a pass
#[derive(Debug, Clone)]
pub struct ResourceAccess {
    pub resource: ResourceId,
    pub usage: ResourceUsage,
}

impl ResourceAccess {
    pub fn is_write(&self) -> bool {
        matches!(
            self.usage,
            ResourceUsage::RenderTarget | ResourceUsage::StorageWrite
        )
    }
}

/// Concrete frame data bound to a resource
#[derive(Debug, Clone)]
pub enum FrameImage {
    Positions(PositionBuffer),
    Blend(BlendOutput),
}

impl FrameImage {
    pub fn format(&self) -> FrameFormat {
        match self {
            FrameImage::Positions(_) => FrameFormat::Position,
            FrameImage::Blend(_) => FrameFormat::Blend,
        }
    }
}

/// Frame data produced by passes, keyed by resource
#[derive(Debug, Default)]
pub struct FrameResources {
    images: HashMap<ResourceId, FrameImage>,
    names: HashMap<ResourceId, String>,
    formats: HashMap<ResourceId, FrameFormat>,
}

impl FrameResources {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn declare(&mut self, resource: &VirtualResource) {
        self.names.insert(resource.id(), resource.name().to_string());
        if let Some(format) = resource.format() {
            self.formats.insert(resource.id(), format);
        }
    }

    /// Store a pass result, rejecting images of another kind than declared
    pub fn insert(&mut self, id: ResourceId, image: FrameImage) -> UlrResult<()> {
        if let Some(&declared) = self.formats.get(&id) {
            if image.format() != declared {
                return Err(UlrError::ResourceFormatMismatch {
                    name: self.name(id),
                    declared,
                    found: image.format(),
                });
            }
        }
        self.images.insert(id, image);
        Ok(())
    }

    pub fn contains(&self, id: ResourceId) -> bool {
        self.images.contains_key(&id)
    }

    pub fn take(&mut self, id: ResourceId) -> Option<FrameImage> {
        self.images.remove(&id)
    }

    pub fn clear(&mut self) {
        self.images.clear();
        self.names.clear();
        self.formats.clear();
    }

    fn name(&self, id: ResourceId) -> String {
        self.names
            .get(&id)
            .cloned()
            .unwrap_or_else(|| format!("#{}", id.0))
    }

    fn missing(&self, id: ResourceId) -> UlrError {
        UlrError::MissingResource(self.name(id))
    }

    pub fn positions(&self, id: ResourceId) -> UlrResult<&PositionBuffer> {
        match self.images.get(&id) {
            Some(FrameImage::Positions(p)) => Ok(p),
            _ => Err(self.missing(id)),
        }
    }

    pub fn blend(&self, id: ResourceId) -> UlrResult<&BlendOutput> {
        match self.images.get(&id) {
            Some(FrameImage::Blend(b)) => Ok(b),
            _ => Err(self.missing(id)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::TextureData;
    use glam::Vec4;

    fn positions() -> FrameImage {
        FrameImage::Positions(TextureData::new(2, 2, Vec4::ONE, "positions"))
    }

    fn declared(id: u32, format: FrameFormat) -> VirtualResource {
        VirtualResource::Texture(VirtualTexture {
            id: ResourceId(id),
            name: format!("texture_{}", id),
            format,
        })
    }

    #[test]
    fn test_insert_checks_declared_format() {
        let mut resources = FrameResources::new();
        resources.declare(&declared(0, FrameFormat::Position));
        resources.declare(&declared(1, FrameFormat::Blend));

        assert!(resources.insert(ResourceId(0), positions()).is_ok());
        assert!(resources.positions(ResourceId(0)).is_ok());

        match resources.insert(ResourceId(1), positions()) {
            Err(UlrError::ResourceFormatMismatch {
                name,
                declared,
                found,
            }) => {
                assert_eq!(name, "texture_1");
                assert_eq!(declared, FrameFormat::Blend);
                assert_eq!(found, FrameFormat::Position);
            }
            other => panic!("expected a format mismatch, got {:?}", other),
        }
        assert!(!resources.contains(ResourceId(1)));
    }

    #[test]
    fn test_external_accepts_any_image() {
        let mut resources = FrameResources::new();
        resources.declare(&VirtualResource::External(ResourceId(3)));
        assert!(resources.insert(ResourceId(3), positions()).is_ok());
        assert!(matches!(
            resources.blend(ResourceId(3)),
            Err(UlrError::MissingResource(_))
        ));
    }

    #[test]
    fn test_only_write_usages_produce() {
        let access = |usage| ResourceAccess {
            resource: ResourceId(0),
            usage,
        };
        assert!(access(ResourceUsage::RenderTarget).is_write());
        assert!(access(ResourceUsage::StorageWrite).is_write());
        assert!(!access(ResourceUsage::TextureRead).is_write());
        assert!(!access(ResourceUsage::StorageRead).is_write());
    }
}
