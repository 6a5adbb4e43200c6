// SPDX-License-Identifier: MIT OR Apache-2.0
//! Graph manager: the set of compiled graphs a host drives frame by frame.

use crate::config::{ConfigError, StageConfig};
use crate::edge::PortRef;
use crate::executor::{Frame, FrameControl, FrameFailure};
use crate::graph::{Graph, TopologyError};
use crate::rebuild::{ChangeError, RebuildReport, TopologyChange};
use crate::registry::StageRegistry;
use crate::stage::Stage;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Where captured outputs are written
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureSettings {
    /// Directory for graphs without an override
    pub output_dir: PathBuf,
    /// File name prefix
    pub base_filename: String,
    /// Per-graph directory overrides
    pub overrides: IndexMap<String, PathBuf>,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("captures"),
            base_filename: "spectra".to_string(),
            overrides: IndexMap::new(),
        }
    }
}

impl CaptureSettings {
    /// Create settings writing into `output_dir`
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            ..Self::default()
        }
    }

    /// Directory captures of `graph` go to
    pub fn directory_for(&self, graph: &str) -> &Path {
        self.overrides
            .get(graph)
            .map_or(self.output_dir.as_path(), PathBuf::as_path)
    }

    /// File name for one captured output
    pub fn file_name(&self, graph: &str, frame: u64, port: &PortRef) -> String {
        format!(
            "{}.{}.{}.{}.{}.png",
            self.base_filename, graph, frame, port.stage, port.port
        )
    }

    /// Full path for one captured output
    pub fn path_for(&self, graph: &str, frame: u64, port: &PortRef) -> PathBuf {
        self.directory_for(graph)
            .join(self.file_name(graph, frame, port))
    }
}

/// Owns the stage registry and every registered graph
#[derive(Debug)]
pub struct GraphManager {
    registry: Arc<StageRegistry>,
    graphs: IndexMap<String, Graph>,
    capture: CaptureSettings,
}

impl GraphManager {
    /// Create a manager, freezing `registry`
    pub fn new(registry: StageRegistry) -> Self {
        Self::with_shared(Arc::new(registry))
    }

    /// Create a manager around a registry shared with other managers
    pub fn with_shared(registry: Arc<StageRegistry>) -> Self {
        Self {
            registry,
            graphs: IndexMap::new(),
            capture: CaptureSettings::default(),
        }
    }

    /// The frozen stage registry
    pub fn registry(&self) -> &Arc<StageRegistry> {
        &self.registry
    }

    /// Create a stage from the registry
    pub fn create_stage(&self, type_name: &str, config: &StageConfig) -> Result<Stage, ConfigError> {
        self.registry.create_stage(type_name, config)
    }

    /// Compile `graph` and register it under its name
    pub fn add_graph(&mut self, mut graph: Graph) -> Result<(), HostError> {
        if self.graphs.contains_key(graph.name()) {
            return Err(HostError::DuplicateGraphName(graph.name().to_string()));
        }
        graph.compile()?;
        tracing::info!(graph = %graph.name(), stages = graph.stage_count(), "Registered graph");
        self.graphs.insert(graph.name().to_string(), graph);
        Ok(())
    }

    /// Unregister a graph, handing it back
    pub fn remove_graph(&mut self, name: &str) -> Option<Graph> {
        let graph = self.graphs.shift_remove(name)?;
        tracing::info!(graph = %name, "Removed graph");
        Some(graph)
    }

    /// Get a graph by name
    pub fn graph(&self, name: &str) -> Option<&Graph> {
        self.graphs.get(name)
    }

    /// Names of the registered graphs in registration order
    pub fn graph_names(&self) -> impl Iterator<Item = &str> {
        self.graphs.keys().map(String::as_str)
    }

    /// All registered graphs
    pub fn graphs(&self) -> impl Iterator<Item = &Graph> {
        self.graphs.values()
    }

    /// Number of registered graphs
    pub fn len(&self) -> usize {
        self.graphs.len()
    }

    /// Whether no graph is registered
    pub fn is_empty(&self) -> bool {
        self.graphs.is_empty()
    }

    /// Whether a graph with this name is registered
    pub fn contains(&self, name: &str) -> bool {
        self.graphs.contains_key(name)
    }

    /// Run one frame of a graph
    pub fn execute(
        &mut self,
        name: &str,
        width: u32,
        height: u32,
        control: &FrameControl,
    ) -> Result<Frame, HostError> {
        let graph = self.lookup(name)?;
        graph.execute(width, height, control).map_err(|failure| {
            tracing::warn!(graph = %name, error = %failure.error, "Frame failed");
            HostError::Frame(Box::new(failure))
        })
    }

    /// Update configuration values of one stage between frames
    pub fn update_config(
        &mut self,
        graph: &str,
        stage: &str,
        update: &StageConfig,
    ) -> Result<(), HostError> {
        let registry = Arc::clone(&self.registry);
        self.lookup(graph)?.update_config(&registry, stage, update)?;
        Ok(())
    }

    /// Apply a batch of topology changes to one graph
    pub fn apply_changes(
        &mut self,
        graph: &str,
        changes: impl IntoIterator<Item = TopologyChange>,
    ) -> Result<RebuildReport, HostError> {
        let registry = Arc::clone(&self.registry);
        Ok(self.lookup(graph)?.apply_changes(&registry, changes)?)
    }

    /// Capture settings
    pub fn capture(&self) -> &CaptureSettings {
        &self.capture
    }

    /// Mutable capture settings
    pub fn capture_mut(&mut self) -> &mut CaptureSettings {
        &mut self.capture
    }

    fn lookup(&mut self, name: &str) -> Result<&mut Graph, HostError> {
        self.graphs
            .get_mut(name)
            .ok_or_else(|| HostError::UnknownGraph(name.to_string()))
    }
}

/// Error raised by graph manager operations
#[derive(Debug, thiserror::Error)]
pub enum HostError {
    /// A graph with this name is already registered
    #[error("Graph already registered: {0}")]
    DuplicateGraphName(String),

    /// No graph with this name is registered
    #[error("Unknown graph: {0}")]
    UnknownGraph(String),

    /// The graph failed validation
    #[error(transparent)]
    Topology(#[from] TopologyError),

    /// A configuration or topology change was rejected
    #[error(transparent)]
    Change(#[from] ChangeError),

    /// A frame aborted
    #[error(transparent)]
    Frame(Box<FrameFailure>),
}
