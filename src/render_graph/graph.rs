//! Frame graph definition and compilation
//!
//! Passes declare what they read and write at insertion; `compile` derives
//! the execution order from those declarations and rejects graphs that read
//! a resource nobody produces or that contain a cycle.

use crate::error::{UlrError, UlrResult};
use crate::render_graph::pass::*;
use crate::render_graph::resource::*;
use std::collections::{BTreeSet, HashMap, HashSet};

/// Passes of one frame plus the resources flowing between them
pub struct RenderGraph {
    passes: Vec<Box<dyn RenderPass>>,
    pass_nodes: Vec<PassNode>,
    resources: Vec<VirtualResource>,
    next_pass_id: u32,
    next_resource_id: u32,

    /// External resources (like the frame output)
    external_resources: HashMap<String, ResourceId>,
}

impl RenderGraph {
    pub fn new() -> Self {
        Self {
            passes: Vec::new(),
            pass_nodes: Vec::new(),
            resources: Vec::new(),
            next_pass_id: 0,
            next_resource_id: 0,
            external_resources: HashMap::new(),
        }
    }

    /// Register an external resource
    pub fn register_external(&mut self, name: &str) -> ResourceId {
        let id = ResourceId(self.next_resource_id);
        self.next_resource_id += 1;
        self.resources.push(VirtualResource::External(id));
        self.external_resources.insert(name.to_string(), id);
        id
    }

    /// Get external resource by name
    pub fn get_external(&self, name: &str) -> Option<ResourceId> {
        self.external_resources.get(name).copied()
    }

    pub fn is_external(&self, id: ResourceId) -> bool {
        self.external_resources.values().any(|&e| e == id)
    }

    /// Add a render pass to the graph
    pub fn add_pass<P: RenderPass + 'static>(
        &mut self,
        pass: P,
        pass_type: PassType,
    ) -> PassId {
        let id = PassId(self.next_pass_id);
        self.next_pass_id += 1;

        let name = pass.name().to_string();
        let mut boxed_pass = Box::new(pass);

        // Setup the pass
        let mut inputs = Vec::new();
        let mut outputs = Vec::new();
        {
            let mut ctx = PassSetupContext {
                resources: &mut self.resources,
                inputs: &mut inputs,
                outputs: &mut outputs,
                next_resource_id: &mut self.next_resource_id,
            };
            boxed_pass.setup(&mut ctx);
        }

        self.passes.push(boxed_pass);
        self.pass_nodes.push(PassNode {
            id,
            name,
            pass_type,
            inputs,
            outputs,
        });

        id
    }

    /// Compile the graph - topological sort and resource lifetime planning.
    ///
    /// Independent passes keep their insertion order.
    pub fn compile(&self) -> UlrResult<CompiledGraph> {
        self.check_inputs()?;

        // A pass depends on another if it reads a resource that the other writes
        let mut dependencies: HashMap<PassId, HashSet<PassId>> = HashMap::new();
        for reader in &self.pass_nodes {
            let deps = dependencies.entry(reader.id).or_default();
            for writer in &self.pass_nodes {
                if reader.id == writer.id {
                    continue;
                }
                if reader
                    .inputs
                    .iter()
                    .any(|input| writer.writes_resource(input.resource))
                {
                    deps.insert(writer.id);
                }
            }
        }

        // Topological sort using Kahn's algorithm
        let mut in_degree: HashMap<PassId, usize> = dependencies
            .iter()
            .map(|(&id, deps)| (id, deps.len()))
            .collect();

        let mut ready: BTreeSet<PassId> = in_degree
            .iter()
            .filter(|(_, &deg)| deg == 0)
            .map(|(&id, _)| id)
            .collect();

        let mut sorted_passes = Vec::with_capacity(self.pass_nodes.len());

        while let Some(pass_id) = ready.pop_first() {
            sorted_passes.push(pass_id);

            for node in &self.pass_nodes {
                if dependencies[&node.id].contains(&pass_id) {
                    if let Some(degree) = in_degree.get_mut(&node.id) {
                        *degree -= 1;
                        if *degree == 0 {
                            ready.insert(node.id);
                        }
                    }
                }
            }
        }

        if sorted_passes.len() != self.pass_nodes.len() {
            let stuck: Vec<&str> = self
                .pass_nodes
                .iter()
                .filter(|n| !sorted_passes.contains(&n.id))
                .map(|n| n.name.as_str())
                .collect();
            return Err(UlrError::GraphCycle(stuck.join(", ")));
        }

        // Determine resource lifetimes
        let mut resource_lifetimes: HashMap<ResourceId, ResourceLifetime> = HashMap::new();

        for (order, &pass_id) in sorted_passes.iter().enumerate() {
            let Some(node) = self.get_pass_node(pass_id) else {
                continue;
            };

            for access in node.inputs.iter().chain(node.outputs.iter()) {
                let lifetime = resource_lifetimes
                    .entry(access.resource)
                    .or_insert(ResourceLifetime {
                        first_use: order,
                        last_use: order,
                    });
                lifetime.last_use = order;
            }
        }

        Ok(CompiledGraph {
            pass_order: sorted_passes,
            resource_lifetimes,
        })
    }

    /// Every read must be of an external resource or of one a pass writes
    fn check_inputs(&self) -> UlrResult<()> {
        for node in &self.pass_nodes {
            for input in &node.inputs {
                let produced = self.is_external(input.resource)
                    || self
                        .pass_nodes
                        .iter()
                        .any(|writer| writer.writes_resource(input.resource));
                if !produced {
                    return Err(UlrError::MissingResource(format!(
                        "{} (read by {})",
                        self.resource_name(input.resource),
                        node.name
                    )));
                }
            }
        }
        Ok(())
    }

    fn resource_name(&self, id: ResourceId) -> String {
        self.resources
            .iter()
            .find_map(|r| match r {
                VirtualResource::Texture(t) if t.id == id => Some(t.name.clone()),
                _ => None,
            })
            .unwrap_or_else(|| format!("{:?}", id))
    }

    /// Get all passes
    pub fn passes(&self) -> &[Box<dyn RenderPass>] {
        &self.passes
    }

    /// Get pass nodes (metadata)
    pub fn pass_nodes(&self) -> &[PassNode] {
        &self.pass_nodes
    }

    /// Get all resources
    pub fn resources(&self) -> &[VirtualResource] {
        &self.resources
    }

    /// Get pass by ID
    pub fn get_pass(&self, id: PassId) -> Option<&dyn RenderPass> {
        let index = self.pass_nodes.iter().position(|n| n.id == id)?;
        Some(self.passes[index].as_ref())
    }

    /// Get a pass by ID as its concrete type
    pub fn get_pass_as<P: RenderPass + 'static>(&self, id: PassId) -> Option<&P> {
        self.get_pass(id)?.as_any().downcast_ref::<P>()
    }

    /// Get pass node by ID
    pub fn get_pass_node(&self, id: PassId) -> Option<&PassNode> {
        self.pass_nodes.iter().find(|n| n.id == id)
    }
}

impl Default for RenderGraph {
    fn default() -> Self {
        Self::new()
    }
}

/// Resource lifetime in terms of pass execution order
#[derive(Debug, Clone, Copy)]
pub struct ResourceLifetime {
    pub first_use: usize,
    pub last_use: usize,
}

/// Compiled render graph with execution order and resource lifetimes
#[derive(Debug)]
pub struct CompiledGraph {
    pub pass_order: Vec<PassId>,
    pub resource_lifetimes: HashMap<ResourceId, ResourceLifetime>,
}

impl CompiledGraph {
    /// Check if a resource is alive at a given execution step
    pub fn is_resource_alive(&self, resource: ResourceId, step: usize) -> bool {
        if let Some(lifetime) = self.resource_lifetimes.get(&resource) {
            step >= lifetime.first_use && step <= lifetime.last_use
        } else {
            false
        }
    }
}
