// SPDX-License-Identifier: MIT OR Apache-2.0
//! Render graph containing stages, edges and marked outputs.

use crate::edge::{Edge, PortRef};
use crate::executor::{self, Frame, FrameControl, FrameFailure};
use crate::resolver::InputBinding;
use crate::schedule::Schedule;
use crate::stage::{FrameInfo, Stage};
use crate::topology::{CompiledGraph, Topology};

pub use crate::topology::TopologyError;

/// Lifecycle state of a graph
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphState {
    /// Mutable, not validated
    Building,
    /// Validated with a cached schedule, no frame run yet
    Validated,
    /// At least one frame has run since the last validation
    Executing,
}

/// A named render graph
#[derive(Debug)]
pub struct Graph {
    name: String,
    pub(crate) topology: Topology<Stage>,
    pub(crate) compiled: Option<CompiledGraph>,
    generation: u64,
    frames: u64,
    frames_since_compile: u64,
}

impl Graph {
    /// Create a new empty graph
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            topology: Topology::new(),
            compiled: None,
            generation: 0,
            frames: 0,
            frames_since_compile: 0,
        }
    }

    /// Graph name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Add a stage under an instance name
    pub fn add_stage(&mut self, stage: Stage, name: impl Into<String>) -> Result<(), TopologyError> {
        let name = name.into();
        let type_name = stage.type_name().to_string();
        self.topology.add_stage(name.clone(), stage)?;
        tracing::debug!(graph = %self.name, stage = %name, stage_type = %type_name, "Added stage");
        self.invalidate();
        Ok(())
    }

    /// Remove a stage and every edge and output mark touching it
    pub fn remove_stage(&mut self, name: &str) -> Option<Stage> {
        let stage = self.topology.remove_stage(name)?;
        self.invalidate();
        Some(stage)
    }

    /// Connect `src` (an output, `instance.port`) to `dst` (an input)
    pub fn add_edge(&mut self, src: &str, dst: &str) -> Result<(), TopologyError> {
        let src = PortRef::parse(src)?;
        let dst = PortRef::parse(dst)?;
        self.connect(src, dst)
    }

    /// Connect two already parsed ports
    pub fn connect(&mut self, src: PortRef, dst: PortRef) -> Result<(), TopologyError> {
        self.topology.add_edge(src, dst)?;
        self.invalidate();
        Ok(())
    }

    /// Remove the edge between two ports
    pub fn remove_edge(&mut self, src: &str, dst: &str) -> Result<Edge, TopologyError> {
        let edge = self
            .topology
            .remove_edge(&PortRef::parse(src)?, &PortRef::parse(dst)?)?;
        self.invalidate();
        Ok(edge)
    }

    /// Flag an output port as externally visible
    pub fn mark_output(&mut self, spec: &str) -> Result<(), TopologyError> {
        self.mark_port(PortRef::parse(spec)?)
    }

    /// Flag an already parsed output port as externally visible
    pub fn mark_port(&mut self, port: PortRef) -> Result<(), TopologyError> {
        if self.topology.mark_output(port)? {
            self.invalidate();
        }
        Ok(())
    }

    /// Remove an output mark. Returns false if the port was not marked.
    pub fn unmark_output(&mut self, spec: &str) -> Result<bool, TopologyError> {
        let removed = self.topology.unmark_output(&PortRef::parse(spec)?);
        if removed {
            self.invalidate();
        }
        Ok(removed)
    }

    /// Validate the graph and compute its execution order.
    ///
    /// Does not modify the graph; see [`Graph::compile`] to cache the result.
    pub fn validate(&self) -> Result<Schedule, TopologyError> {
        self.topology
            .validate(self.generation)
            .map(|compiled| compiled.schedule)
    }

    /// Validate the graph and cache its schedule, making it executable.
    ///
    /// A graph that is already compiled is returned as is.
    pub fn compile(&mut self) -> Result<&Schedule, TopologyError> {
        let compiled = match self.compiled.take() {
            Some(compiled) => compiled,
            None => {
                let compiled = self.topology.validate(self.generation)?;
                tracing::info!(
                    graph = %self.name,
                    order = ?compiled.schedule.order(),
                    "Compiled graph"
                );
                self.frames_since_compile = 0;
                compiled
            }
        };
        Ok(&self.compiled.insert(compiled).schedule)
    }

    /// Cached schedule, if compiled
    pub fn schedule(&self) -> Option<&Schedule> {
        self.compiled.as_ref().map(|c| &c.schedule)
    }

    /// Where each input of `stage` reads from, once compiled
    pub fn input_bindings(&self, stage: &str) -> Option<&[InputBinding]> {
        let compiled = self.compiled.as_ref()?;
        let index = self.topology.stages.get_index_of(stage)?;
        compiled.bindings.get(index).map(Vec::as_slice)
    }

    /// Whether the graph has a valid cached schedule
    pub fn is_compiled(&self) -> bool {
        self.compiled.is_some()
    }

    /// Lifecycle state
    pub fn state(&self) -> GraphState {
        match (&self.compiled, self.frames_since_compile) {
            (None, _) => GraphState::Building,
            (Some(_), 0) => GraphState::Validated,
            (Some(_), _) => GraphState::Executing,
        }
    }

    /// Counter bumped by every topology mutation
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Number of frames executed (successful or not)
    pub fn frame_count(&self) -> u64 {
        self.frames
    }

    /// Get a stage by instance name
    pub fn stage(&self, name: &str) -> Option<&Stage> {
        self.topology.stage(name)
    }

    /// All stages in insertion order
    pub fn stages(&self) -> impl Iterator<Item = (&str, &Stage)> {
        self.topology.stages.iter().map(|(n, s)| (n.as_str(), s))
    }

    /// Stage instance names in insertion order
    pub fn stage_names(&self) -> impl Iterator<Item = &str> {
        self.topology.stages.keys().map(String::as_str)
    }

    /// Number of stages
    pub fn stage_count(&self) -> usize {
        self.topology.stages.len()
    }

    /// All edges in insertion order
    pub fn edges(&self) -> &[Edge] {
        &self.topology.edges
    }

    /// Marked output ports
    pub fn marked_outputs(&self) -> impl Iterator<Item = &PortRef> {
        self.topology.outputs.iter()
    }

    /// Run one frame.
    ///
    /// The graph must be compiled. Stages run in schedule order; `control` is
    /// polled between stages.
    pub fn execute(
        &mut self,
        width: u32,
        height: u32,
        control: &FrameControl,
    ) -> Result<Frame, FrameFailure> {
        let Some(compiled) = &self.compiled else {
            return Err(FrameFailure::not_compiled(&self.name, self.frames));
        };
        let info = FrameInfo {
            index: self.frames,
            width,
            height,
        };
        self.frames += 1;
        self.frames_since_compile += 1;

        executor::run_frame(
            &self.name,
            &mut self.topology.stages,
            compiled,
            &info,
            control,
        )
    }

    pub(crate) fn replace_topology(&mut self, topology: Topology<Stage>, compiled: CompiledGraph) {
        self.topology = topology;
        self.generation += 1;
        self.compiled = Some(compiled);
        self.frames_since_compile = 0;
    }

    pub(crate) fn next_generation(&self) -> u64 {
        self.generation + 1
    }

    fn invalidate(&mut self) {
        self.generation += 1;
        if self.compiled.take().is_some() {
            tracing::debug!(graph = %self.name, "Topology changed, schedule dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StageConfig;
    use crate::port::{PortDesc, Resource, ResourceType};
    use crate::registry::{StageRegistry, StageType};
    use crate::stage::{RenderStage, StageContext, StageError};

    struct Constant;

    impl RenderStage for Constant {
        fn reconfigure(&mut self, _config: &StageConfig) -> Result<(), StageError> {
            Ok(())
        }

        fn execute(&mut self, ctx: &mut StageContext<'_>) -> Result<(), StageError> {
            ctx.set_output("out", Resource::Scalar(1.0))
        }
    }

    fn registry() -> StageRegistry {
        let mut registry = StageRegistry::new();
        registry
            .register(StageType::new(
                "Constant",
                |_| vec![PortDesc::output("out", ResourceType::Scalar)],
                |_| Box::new(Constant),
            ))
            .unwrap();
        registry
            .register(StageType::new(
                "Sink",
                |_| {
                    vec![
                        PortDesc::input("in", ResourceType::Scalar),
                        PortDesc::output("out", ResourceType::Scalar),
                    ]
                },
                |_| Box::new(Constant),
            ))
            .unwrap();
        registry
    }

    fn simple_graph(registry: &StageRegistry) -> Graph {
        let mut graph = Graph::new("Simple");
        graph
            .add_stage(registry.create_stage("Constant", &StageConfig::new()).unwrap(), "C")
            .unwrap();
        graph
            .add_stage(registry.create_stage("Sink", &StageConfig::new()).unwrap(), "S")
            .unwrap();
        graph.add_edge("C.out", "S.in").unwrap();
        graph.mark_output("S.out").unwrap();
        graph
    }

    #[test]
    fn test_lifecycle_states() {
        let registry = registry();
        let mut graph = simple_graph(&registry);
        assert_eq!(graph.state(), GraphState::Building);

        graph.compile().unwrap();
        assert_eq!(graph.state(), GraphState::Validated);

        graph.execute(1, 1, &FrameControl::new()).unwrap();
        assert_eq!(graph.state(), GraphState::Executing);

        graph.unmark_output("S.out").unwrap();
        assert_eq!(graph.state(), GraphState::Building);
        assert!(graph.schedule().is_none());
    }

    #[test]
    fn test_validate_is_pure_and_idempotent() {
        let registry = registry();
        let graph = simple_graph(&registry);
        let first = graph.validate().unwrap();
        let second = graph.validate().unwrap();
        assert_eq!(first, second);
        assert!(!graph.is_compiled());
    }

    #[test]
    fn test_execute_requires_compile() {
        let registry = registry();
        let mut graph = simple_graph(&registry);
        let failure = graph.execute(1, 1, &FrameControl::new()).unwrap_err();
        assert!(matches!(
            failure.error,
            crate::executor::ExecutionError::NotCompiled { .. }
        ));
        assert!(failure.partial.is_empty());
    }

    #[test]
    fn test_remark_does_not_invalidate() {
        let registry = registry();
        let mut graph = simple_graph(&registry);
        graph.compile().unwrap();
        let generation = graph.generation();
        graph.mark_output("S.out").unwrap();
        assert!(graph.is_compiled());
        assert_eq!(graph.generation(), generation);
    }

    #[test]
    fn test_malformed_spec() {
        let registry = registry();
        let mut graph = simple_graph(&registry);
        assert_eq!(
            graph.add_edge("C", "S.in"),
            Err(TopologyError::MalformedPortSpec("C".into()))
        );
        assert_eq!(graph.edges().len(), 1);
    }
}
