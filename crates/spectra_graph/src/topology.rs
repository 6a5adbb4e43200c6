// SPDX-License-Identifier: MIT OR Apache-2.0
//! Graph topology: stages, edges and marked outputs, plus structural
//! validation.
//!
//! The topology is generic over the stage representation so the same checks
//! run on a live graph and on the lightweight candidate built while a batch
//! of topology changes is being applied.

use crate::edge::{Edge, PortRef};
use crate::port::{PortDesc, PortDirection, ResourceType};
use crate::resolver::{self, InputBinding};
use crate::schedule::{self, Schedule};
use crate::stage::Stage;
use indexmap::{IndexMap, IndexSet};

/// Anything that declares a set of ports
pub trait PortLayout {
    /// All ports
    fn ports(&self) -> &[PortDesc];

    /// Get a port by name
    fn port(&self, name: &str) -> Option<&PortDesc> {
        self.ports().iter().find(|p| p.name == name)
    }
}

impl PortLayout for Stage {
    fn ports(&self) -> &[PortDesc] {
        Stage::ports(self)
    }
}

impl PortLayout for Vec<PortDesc> {
    fn ports(&self) -> &[PortDesc] {
        self
    }
}

/// Result of a successful validation
#[derive(Debug, Clone)]
pub(crate) struct CompiledGraph {
    pub(crate) schedule: Schedule,
    pub(crate) bindings: Vec<Vec<InputBinding>>,
    pub(crate) required_outputs: Vec<Vec<String>>,
    pub(crate) outputs: Vec<PortRef>,
}

/// Stages, edges and marked outputs
#[derive(Debug, Clone)]
pub(crate) struct Topology<S> {
    pub(crate) stages: IndexMap<String, S>,
    pub(crate) edges: Vec<Edge>,
    pub(crate) outputs: IndexSet<PortRef>,
}

impl<S> Default for Topology<S> {
    fn default() -> Self {
        Self {
            stages: IndexMap::new(),
            edges: Vec::new(),
            outputs: IndexSet::new(),
        }
    }
}

impl<S: PortLayout> Topology<S> {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn stage(&self, name: &str) -> Option<&S> {
        self.stages.get(name)
    }

    pub(crate) fn add_stage(&mut self, name: String, stage: S) -> Result<(), TopologyError> {
        if self.stages.contains_key(&name) {
            return Err(TopologyError::DuplicateInstanceName(name));
        }
        self.stages.insert(name, stage);
        Ok(())
    }

    /// Remove a stage together with its edges and output marks
    pub(crate) fn remove_stage(&mut self, name: &str) -> Option<S> {
        let stage = self.stages.shift_remove(name)?;
        self.edges.retain(|e| !e.involves_stage(name));
        self.outputs.retain(|o| o.stage != name);
        Some(stage)
    }

    /// Swap the stage stored under `name`, keeping its position.
    ///
    /// Every edge and output mark touching the stage must still fit the new
    /// ports, otherwise nothing changes.
    pub(crate) fn replace_stage(&mut self, name: &str, stage: S) -> Result<S, TopologyError> {
        let index = self
            .stages
            .get_index_of(name)
            .ok_or_else(|| TopologyError::UnknownStage(name.to_string()))?;

        let previous = std::mem::replace(&mut self.stages[index], stage);
        if let Err(e) = self.check_stage_connections(name) {
            self.stages[index] = previous;
            return Err(e);
        }
        Ok(previous)
    }

    fn check_stage_connections(&self, name: &str) -> Result<(), TopologyError> {
        for edge in self.edges.iter().filter(|e| e.involves_stage(name)) {
            resolver::check_endpoints(self, &edge.src, &edge.dst)?;
        }
        for output in self.outputs.iter().filter(|o| o.stage == name) {
            self.output_port(output)?;
        }
        Ok(())
    }

    pub(crate) fn add_edge(&mut self, src: PortRef, dst: PortRef) -> Result<(), TopologyError> {
        resolver::check_edge(self, &src, &dst)?;
        tracing::debug!(src = %src, dst = %dst, "Added edge");
        self.edges.push(Edge::new(src, dst));
        Ok(())
    }

    pub(crate) fn remove_edge(&mut self, src: &PortRef, dst: &PortRef) -> Result<Edge, TopologyError> {
        let position = self
            .edges
            .iter()
            .position(|e| e.src == *src && e.dst == *dst)
            .ok_or_else(|| TopologyError::UnknownEdge {
                src: src.clone(),
                dst: dst.clone(),
            })?;
        Ok(self.edges.remove(position))
    }

    /// Mark an output port. Returns false if it was already marked.
    pub(crate) fn mark_output(&mut self, port: PortRef) -> Result<bool, TopologyError> {
        self.output_port(&port)?;
        Ok(self.outputs.insert(port))
    }

    pub(crate) fn unmark_output(&mut self, port: &PortRef) -> bool {
        self.outputs.shift_remove(port)
    }

    fn output_port(&self, port: &PortRef) -> Result<&PortDesc, TopologyError> {
        let desc = self
            .stage(&port.stage)
            .ok_or_else(|| TopologyError::UnknownStage(port.stage.clone()))?
            .port(&port.port)
            .ok_or_else(|| TopologyError::UnknownPort(port.clone()))?;
        if !desc.is_output() {
            return Err(TopologyError::WrongPortDirection {
                port: port.clone(),
                expected: PortDirection::Output,
            });
        }
        Ok(desc)
    }

    /// The edge feeding an input port, if any
    pub(crate) fn incoming(&self, stage: &str, port: &str) -> Option<&Edge> {
        self.edges
            .iter()
            .find(|e| e.dst.stage == stage && e.dst.port == port)
    }

    /// Per stage index, the sorted indices of the stages it reads from
    pub(crate) fn dependencies(&self) -> Vec<Vec<usize>> {
        let mut dependencies = vec![Vec::new(); self.stages.len()];
        for edge in &self.edges {
            let (Some(src), Some(dst)) = (
                self.stages.get_index_of(&edge.src.stage),
                self.stages.get_index_of(&edge.dst.stage),
            ) else {
                continue;
            };
            dependencies[dst].push(src);
        }
        for deps in &mut dependencies {
            deps.sort_unstable();
            deps.dedup();
        }
        dependencies
    }

    /// Names of `seeds` and every stage downstream of them
    pub(crate) fn downstream_of<'a>(&self, seeds: impl IntoIterator<Item = &'a str>) -> IndexSet<String> {
        let dependents = schedule::invert(&self.dependencies());
        let mut stack: Vec<usize> = seeds
            .into_iter()
            .filter_map(|name| self.stages.get_index_of(name))
            .collect();
        let mut reached = IndexSet::new();
        while let Some(index) = stack.pop() {
            if reached.insert(index) {
                stack.extend_from_slice(&dependents[index]);
            }
        }
        let mut reached: Vec<usize> = reached.into_iter().collect();
        reached.sort_unstable();
        reached
            .into_iter()
            .filter_map(|i| self.stages.get_index(i).map(|(name, _)| name.clone()))
            .collect()
    }

    /// Names of the stages that read directly from `name`
    pub(crate) fn direct_dependents(&self, name: &str) -> Vec<String> {
        let mut dependents: Vec<String> = Vec::new();
        for edge in self.edges.iter().filter(|e| e.src.stage == name) {
            if !dependents.contains(&edge.dst.stage) {
                dependents.push(edge.dst.stage.clone());
            }
        }
        dependents
    }

    /// Run structural validation and compute the schedule and bindings.
    ///
    /// Checks, in order: cycles, unbound mandatory inputs, presence of a
    /// marked output.
    pub(crate) fn validate(&self, generation: u64) -> Result<CompiledGraph, TopologyError> {
        let dependencies = self.dependencies();
        let dependents = schedule::invert(&dependencies);
        if let Some(cycle) = schedule::find_cycle(&dependents) {
            let stages = cycle
                .into_iter()
                .filter_map(|i| self.stages.get_index(i).map(|(name, _)| name.clone()))
                .collect();
            return Err(TopologyError::CycleDetected { stages });
        }

        for (name, stage) in &self.stages {
            for port in stage.ports().iter().filter(|p| p.is_mandatory()) {
                if self.incoming(name, &port.name).is_none() {
                    return Err(TopologyError::UnboundInput {
                        stage: name.clone(),
                        port: port.name.clone(),
                    });
                }
            }
        }

        if self.outputs.is_empty() {
            return Err(TopologyError::NoMarkedOutput);
        }

        let names = self.stages.keys().cloned().collect();
        Ok(CompiledGraph {
            schedule: Schedule::compute(names, dependencies, generation),
            bindings: resolver::resolve_bindings(self),
            required_outputs: resolver::required_outputs(self),
            outputs: self.outputs.iter().cloned().collect(),
        })
    }

    /// Same topology over a different stage representation
    pub(crate) fn map<T>(&self, f: impl Fn(&S) -> T) -> Topology<T> {
        Topology {
            stages: self
                .stages
                .iter()
                .map(|(name, stage)| (name.clone(), f(stage)))
                .collect(),
            edges: self.edges.clone(),
            outputs: self.outputs.clone(),
        }
    }
}

/// Error while building or validating a graph
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TopologyError {
    /// A stage with this instance name already exists
    #[error("Duplicate instance name: {0}")]
    DuplicateInstanceName(String),

    /// No stage with this instance name exists
    #[error("Unknown stage: {0}")]
    UnknownStage(String),

    /// The stage exists but has no such port
    #[error("Unknown port: {0}")]
    UnknownPort(PortRef),

    /// The port points the wrong way for its role
    #[error("Port {port} is not an {expected}")]
    WrongPortDirection {
        /// Offending port
        port: PortRef,
        /// Direction required for this role
        expected: PortDirection,
    },

    /// Source and destination carry different resource types
    #[error("Type mismatch: {src} is a {src_type}, {dst} is a {dst_type}")]
    TypeMismatch {
        /// Source port
        src: PortRef,
        /// Source resource type
        src_type: ResourceType,
        /// Destination port
        dst: PortRef,
        /// Destination resource type
        dst_type: ResourceType,
    },

    /// The input already has an incoming edge
    #[error("Input {port} is already bound to {producer}")]
    InputAlreadyBound {
        /// Destination input
        port: PortRef,
        /// Output currently feeding it
        producer: PortRef,
    },

    /// A port spec is not of the form `instance.port`
    #[error("Malformed port spec '{0}', expected 'instance.port'")]
    MalformedPortSpec(String),

    /// The dependency graph contains a cycle
    #[error("Cycle detected: {}", .stages.join(" -> "))]
    CycleDetected {
        /// Stages on the cycle, in dependency order
        stages: Vec<String>,
    },

    /// A mandatory input has no incoming edge
    #[error("Unbound input: {stage}.{port}")]
    UnboundInput {
        /// Stage instance name
        stage: String,
        /// Input port name
        port: String,
    },

    /// No output port is marked
    #[error("Graph has no marked output")]
    NoMarkedOutput,

    /// No edge connects these ports
    #[error("No edge {src} -> {dst}")]
    UnknownEdge {
        /// Source port
        src: PortRef,
        /// Destination port
        dst: PortRef,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::ResourceType;

    fn port(spec: &str) -> PortRef {
        PortRef::parse(spec).unwrap()
    }

    fn passthrough() -> Vec<PortDesc> {
        vec![
            PortDesc::input("input", ResourceType::ColorBuffer),
            PortDesc::output("output", ResourceType::ColorBuffer),
        ]
    }

    fn source() -> Vec<PortDesc> {
        vec![PortDesc::output("output", ResourceType::ColorBuffer)]
    }

    #[test]
    fn test_duplicate_instance_name_is_atomic() {
        let mut topology = Topology::new();
        topology.add_stage("A".into(), source()).unwrap();
        assert_eq!(
            topology.add_stage("A".into(), passthrough()),
            Err(TopologyError::DuplicateInstanceName("A".into()))
        );
        assert_eq!(topology.stages.len(), 1);
        assert_eq!(topology.stages["A"], source());
    }

    #[test]
    fn test_remove_stage_drops_edges_and_marks() {
        let mut topology = Topology::new();
        topology.add_stage("S".into(), source()).unwrap();
        topology.add_stage("A".into(), passthrough()).unwrap();
        topology.add_edge(port("S.output"), port("A.input")).unwrap();
        topology.mark_output(port("A.output")).unwrap();
        topology.mark_output(port("S.output")).unwrap();

        assert!(topology.remove_stage("A").is_some());
        assert!(topology.edges.is_empty());
        assert_eq!(topology.outputs.len(), 1);
        assert!(topology.remove_stage("A").is_none());
    }

    #[test]
    fn test_mark_output_checks() {
        let mut topology = Topology::new();
        topology.add_stage("A".into(), passthrough()).unwrap();
        assert_eq!(topology.mark_output(port("A.output")), Ok(true));
        assert_eq!(topology.mark_output(port("A.output")), Ok(false));
        assert_eq!(
            topology.mark_output(port("A.missing")),
            Err(TopologyError::UnknownPort(port("A.missing")))
        );
        assert!(matches!(
            topology.mark_output(port("A.input")),
            Err(TopologyError::WrongPortDirection { .. })
        ));
    }

    #[test]
    fn test_replace_stage_keeps_edges_valid() {
        let mut topology = Topology::new();
        topology.add_stage("S".into(), source()).unwrap();
        topology.add_stage("A".into(), passthrough()).unwrap();
        topology.add_edge(port("S.output"), port("A.input")).unwrap();

        let scalar_only = vec![PortDesc::output("output", ResourceType::Scalar)];
        assert!(matches!(
            topology.replace_stage("S", scalar_only),
            Err(TopologyError::TypeMismatch { .. })
        ));
        assert_eq!(topology.stages["S"], source());

        let wider = vec![
            PortDesc::output("output", ResourceType::ColorBuffer),
            PortDesc::output("extra", ResourceType::Scalar),
        ];
        assert!(topology.replace_stage("S", wider).is_ok());
        assert_eq!(topology.stages.get_index_of("S"), Some(0));
    }

    #[test]
    fn test_validate_reports_unbound_then_output() {
        let mut topology = Topology::new();
        topology.add_stage("A".into(), passthrough()).unwrap();
        assert_eq!(
            topology.validate(0).unwrap_err(),
            TopologyError::UnboundInput {
                stage: "A".into(),
                port: "input".into()
            }
        );

        let mut topology = Topology::new();
        topology.add_stage("S".into(), source()).unwrap();
        assert_eq!(topology.validate(0).unwrap_err(), TopologyError::NoMarkedOutput);
    }

    #[test]
    fn test_downstream_of() {
        let mut topology = Topology::new();
        topology.add_stage("S".into(), source()).unwrap();
        topology.add_stage("A".into(), passthrough()).unwrap();
        topology.add_stage("B".into(), passthrough()).unwrap();
        topology.add_stage("C".into(), source()).unwrap();
        topology.add_edge(port("S.output"), port("A.input")).unwrap();
        topology.add_edge(port("A.output"), port("B.input")).unwrap();

        let reached = topology.downstream_of(["A"]);
        assert_eq!(reached.into_iter().collect::<Vec<_>>(), ["A", "B"]);
        assert_eq!(topology.direct_dependents("S"), ["A"]);
    }
}
