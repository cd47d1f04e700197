//! Render pass definitions for the render graph

use crate::error::UlrResult;
use crate::render_graph::resource::*;
use crate::renderer::UlrRenderer;
use crate::resources::{MaskSet, ProxyMesh, SourceImageBank};
use crate::scene::{Camera, CameraRegistry};
use crate::selection::SelectionSet;
use crate::UlrConfig;
use std::any::Any;

/// Unique identifier for a render pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PassId(pub(crate) u32);

/// Context for setting up pass resources
pub struct PassSetupContext<'a> {
    pub(crate) resources: &'a mut Vec<VirtualResource>,
    pub(crate) inputs: &'a mut Vec<ResourceAccess>,
    pub(crate) outputs: &'a mut Vec<ResourceAccess>,
    pub(crate) next_resource_id: &'a mut u32,
}

impl<'a> PassSetupContext<'a> {
    /// Create a frame-sized texture resource
    pub fn create_texture(&mut self, name: &str, format: FrameFormat) -> ResourceId {
        let id = ResourceId(*self.next_resource_id);
        *self.next_resource_id += 1;

        self.resources.push(VirtualResource::Texture(VirtualTexture {
            id,
            name: name.to_string(),
            format,
        }));

        id
    }

    /// Declare that this pass reads from a resource
    pub fn read(&mut self, resource: ResourceId, usage: ResourceUsage) {
        self.inputs.push(ResourceAccess { resource, usage });
    }

    /// Declare that this pass writes to a resource
    pub fn write(&mut self, resource: ResourceId, usage: ResourceUsage) {
        self.outputs.push(ResourceAccess { resource, usage });
    }
}

/// Everything a frame reads, fixed for the duration of one request
pub struct FrameInputs<'a> {
    pub config: &'a UlrConfig,
    pub registry: &'a CameraRegistry,
    pub mesh: &'a ProxyMesh,
    pub bank: &'a SourceImageBank,
    pub masks: Option<&'a MaskSet>,
    pub renderer: &'a UlrRenderer,
    pub eye: &'a Camera,
    pub selection: &'a SelectionSet,
}

/// Context for executing a render pass
pub struct PassExecuteContext<'a> {
    pub frame: &'a FrameInputs<'a>,
    pub width: u32,
    pub height: u32,
    pub resources: &'a mut FrameResources,
}

/// Trait for render passes
pub trait RenderPass: Send + Sync {
    /// Get the pass name for debugging
    fn name(&self) -> &str;

    /// Setup phase - declare resources and dependencies
    fn setup(&mut self, ctx: &mut PassSetupContext);

    /// Execute phase - read inputs, produce outputs
    fn execute(&self, ctx: &mut PassExecuteContext) -> UlrResult<()>;

    /// Allow downcasting
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Type of render pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassType {
    /// Rasterization or per-pixel pass
    Graphics,
    /// Compute pass
    Compute,
}

/// Metadata about a pass in the graph
#[derive(Debug)]
pub struct PassNode {
    pub id: PassId,
    pub name: String,
    pub pass_type: PassType,
    pub inputs: Vec<ResourceAccess>,
    pub outputs: Vec<ResourceAccess>,
}

impl PassNode {
    pub fn reads_resource(&self, resource: ResourceId) -> bool {
        self.inputs.iter().any(|a| a.resource == resource)
    }

    pub fn writes_resource(&self, resource: ResourceId) -> bool {
        self.outputs.iter().any(|a| a.resource == resource && a.is_write())
    }
}
