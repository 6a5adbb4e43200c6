// SPDX-License-Identifier: MIT OR Apache-2.0
//! Declarative graph descriptions stored as RON.
//!
//! ```ron
//! (
//!     name: "TinySpectralPathTracer",
//!     stages: [
//!         (name: "GBufferRT", type: "GBufferRT", config: { "sampleCount": 16 }),
//!     ],
//!     edges: [("GBufferRT.vbuffer", "TinySpectralPathTracer.vbuffer")],
//!     outputs: ["ToneMapper.dst"],
//! )
//! ```

use crate::config::{ConfigError, StageConfig};
use crate::edge::PortRef;
use crate::graph::{Graph, TopologyError};
use crate::registry::StageRegistry;
use serde::{Deserialize, Serialize};

/// One stage of a graph description
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageDecl {
    /// Instance name
    pub name: String,
    /// Stage type name
    #[serde(rename = "type")]
    pub stage_type: String,
    /// Option values, missing ones take their defaults
    #[serde(default, skip_serializing_if = "StageConfig::is_empty")]
    pub config: StageConfig,
}

/// Serializable description of a render graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphDesc {
    /// Graph name
    pub name: String,
    /// Stages in insertion order
    #[serde(default)]
    pub stages: Vec<StageDecl>,
    /// Edges as `(source, destination)` port specs
    #[serde(default)]
    pub edges: Vec<(PortRef, PortRef)>,
    /// Marked outputs
    #[serde(default)]
    pub outputs: Vec<PortRef>,
}

impl GraphDesc {
    /// Create an empty description
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stages: Vec::new(),
            edges: Vec::new(),
            outputs: Vec::new(),
        }
    }

    /// Parse a description from RON
    pub fn from_ron(source: &str) -> Result<Self, DescError> {
        Ok(ron::from_str(source)?)
    }

    /// Serialize to pretty-printed RON
    pub fn to_ron(&self) -> Result<String, DescError> {
        let config = ron::ser::PrettyConfig::default().depth_limit(4);
        ron::ser::to_string_pretty(self, config).map_err(DescError::Serialize)
    }

    /// Create the stages, edges and output marks.
    ///
    /// The returned graph is not compiled yet.
    pub fn build(&self, registry: &StageRegistry) -> Result<Graph, DescError> {
        let mut graph = Graph::new(self.name.as_str());
        for decl in &self.stages {
            let stage = registry.create_stage(&decl.stage_type, &decl.config)?;
            graph.add_stage(stage, decl.name.as_str())?;
        }
        for (src, dst) in &self.edges {
            graph.connect(src.clone(), dst.clone())?;
        }
        for output in &self.outputs {
            graph.mark_port(output.clone())?;
        }
        tracing::debug!(graph = %self.name, stages = self.stages.len(), "Built graph from description");
        Ok(graph)
    }
}

impl Graph {
    /// Describe the graph's current structure and stage configurations
    pub fn describe(&self) -> GraphDesc {
        GraphDesc {
            name: self.name().to_string(),
            stages: self
                .stages()
                .map(|(name, stage)| StageDecl {
                    name: name.to_string(),
                    stage_type: stage.type_name().to_string(),
                    config: stage.config().clone(),
                })
                .collect(),
            edges: self
                .edges()
                .iter()
                .map(|edge| (edge.src.clone(), edge.dst.clone()))
                .collect(),
            outputs: self.marked_outputs().cloned().collect(),
        }
    }
}

/// Error while loading or building a graph description
#[derive(Debug, thiserror::Error)]
pub enum DescError {
    /// The RON document could not be parsed
    #[error("Invalid graph description: {0}")]
    Parse(#[from] ron::error::SpannedError),

    /// The description could not be serialized
    #[error("Failed to serialize graph description: {0}")]
    Serialize(ron::Error),

    /// A stage could not be created
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The described topology is invalid
    #[error(transparent)]
    Topology(#[from] TopologyError),

    /// No built-in pipeline has this name
    #[error("Unknown pipeline: {0}")]
    UnknownPipeline(String),
}
