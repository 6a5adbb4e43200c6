// SPDX-License-Identifier: MIT OR Apache-2.0
//! Reconfiguration of compiled graphs between frames.
//!
//! Two kinds of change are supported:
//! - configuration updates, which keep the port layout and touch only the
//!   updated stage;
//! - batches of [`TopologyChange`]s, which are validated as a whole and then
//!   recreate only the stages downstream of the change.

use crate::config::{ConfigError, StageConfig};
use crate::edge::PortRef;
use crate::graph::Graph;
use crate::port::PortDesc;
use crate::registry::StageRegistry;
use crate::stage::{Stage, StageError};
use crate::topology::{PortLayout, Topology, TopologyError};
use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};

/// One structural edit of a graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TopologyChange {
    /// Create a stage and add it
    AddStage {
        /// Instance name
        name: String,
        /// Stage type name
        stage_type: String,
        /// Configuration
        config: StageConfig,
    },
    /// Remove a stage with its edges and output marks
    RemoveStage(String),
    /// Replace a stage with a freshly created one, keeping its edges
    ReplaceStage {
        /// Instance name
        name: String,
        /// Stage type name
        stage_type: String,
        /// Configuration
        config: StageConfig,
    },
    /// Add an edge
    AddEdge(PortRef, PortRef),
    /// Remove an edge
    RemoveEdge(PortRef, PortRef),
    /// Mark an output
    MarkOutput(PortRef),
    /// Remove an output mark
    UnmarkOutput(PortRef),
}

/// What a topology change did to the graph's stages
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RebuildReport {
    /// Stages created by the change
    pub added: Vec<String>,
    /// Existing stages rebuilt because they are downstream of the change
    pub recreated: Vec<String>,
    /// Stages kept with their instance and resources
    pub preserved: Vec<String>,
    /// Stages dropped
    pub removed: Vec<String>,
}

/// Error while reconfiguring a graph
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ChangeError {
    /// Invalid configuration
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The change would break the graph's structure
    #[error(transparent)]
    Topology(#[from] TopologyError),

    /// The stage rejected the new configuration
    #[error("Stage '{stage}' rejected the update: {cause}")]
    Rejected {
        /// Stage instance name
        stage: String,
        /// Error reported by the stage
        #[source]
        cause: StageError,
    },
}

enum Slot {
    Kept(Vec<PortDesc>),
    Fresh(Stage),
}

impl PortLayout for Slot {
    fn ports(&self) -> &[PortDesc] {
        match self {
            Self::Kept(ports) => ports,
            Self::Fresh(stage) => stage.ports(),
        }
    }
}

impl Graph {
    /// Replace configuration values of one stage.
    ///
    /// `update` is validated against the stage type's schema and merged with
    /// the current values. Updates that would change the stage's ports are
    /// rejected. The schedule and every other stage are left untouched; the
    /// new values apply from the next frame.
    pub fn update_config(
        &mut self,
        registry: &StageRegistry,
        stage_name: &str,
        update: &StageConfig,
    ) -> Result<(), ChangeError> {
        let stage = self
            .topology
            .stages
            .get_mut(stage_name)
            .ok_or_else(|| TopologyError::UnknownStage(stage_name.to_string()))?;
        let stage_type = registry
            .get(stage.type_name())
            .ok_or_else(|| ConfigError::UnknownStageType(stage.type_name().to_string()))?;

        let config = stage_type
            .schema
            .merge(&stage_type.name, stage.config(), update)?;
        if stage_type.reflect(&config) != stage.ports() {
            return Err(ConfigError::PortLayoutChanged {
                stage: stage_name.to_string(),
            }
            .into());
        }

        stage
            .reconfigure(config)
            .map_err(|cause| ChangeError::Rejected {
                stage: stage_name.to_string(),
                cause,
            })?;
        tracing::info!(graph = %self.name(), stage = %stage_name, "Updated stage configuration");
        Ok(())
    }

    /// Apply a batch of topology changes atomically.
    ///
    /// The batch is applied to a copy of the topology and validated as a
    /// whole; on any error the graph is unchanged. On success the graph is
    /// recompiled, stages downstream of a changed edge or stage are recreated
    /// and all other stages keep their instance.
    pub fn apply_changes(
        &mut self,
        registry: &StageRegistry,
        changes: impl IntoIterator<Item = TopologyChange>,
    ) -> Result<RebuildReport, ChangeError> {
        let mut candidate: Topology<Slot> = self.topology.map(|s| Slot::Kept(s.ports().to_vec()));
        let mut seeds: IndexSet<String> = IndexSet::new();
        let mut added = Vec::new();

        for change in changes {
            match change {
                TopologyChange::AddStage {
                    name,
                    stage_type,
                    config,
                } => {
                    let stage = registry.create_stage(&stage_type, &config)?;
                    candidate.add_stage(name.clone(), Slot::Fresh(stage))?;
                    seeds.insert(name.clone());
                    added.push(name);
                }
                TopologyChange::RemoveStage(name) => {
                    let dependents = candidate.direct_dependents(&name);
                    if candidate.remove_stage(&name).is_none() {
                        return Err(TopologyError::UnknownStage(name).into());
                    }
                    seeds.shift_remove(&name);
                    added.retain(|a| *a != name);
                    seeds.extend(dependents);
                }
                TopologyChange::ReplaceStage {
                    name,
                    stage_type,
                    config,
                } => {
                    let stage = registry.create_stage(&stage_type, &config)?;
                    candidate.replace_stage(&name, Slot::Fresh(stage))?;
                    seeds.insert(name);
                }
                TopologyChange::AddEdge(src, dst) => {
                    seeds.insert(dst.stage.clone());
                    candidate.add_edge(src, dst)?;
                }
                TopologyChange::RemoveEdge(src, dst) => {
                    candidate.remove_edge(&src, &dst)?;
                    seeds.insert(dst.stage);
                }
                TopologyChange::MarkOutput(port) => {
                    candidate.mark_output(port)?;
                }
                TopologyChange::UnmarkOutput(port) => {
                    candidate.unmark_output(&port);
                }
            }
        }

        let compiled = candidate.validate(self.next_generation())?;
        let dirty = candidate.downstream_of(seeds.iter().map(String::as_str));

        // Rebuild dirty stages before touching the graph so a failure here
        // still leaves it unchanged.
        let mut rebuilt: IndexMap<String, Stage> = IndexMap::new();
        for (name, slot) in &candidate.stages {
            if matches!(slot, Slot::Kept(_)) && dirty.contains(name) {
                if let Some(old) = self.topology.stage(name) {
                    rebuilt.insert(name.clone(), registry.recreate(old)?);
                }
            }
        }

        let mut report = RebuildReport {
            added,
            ..RebuildReport::default()
        };
        let mut old_stages = std::mem::take(&mut self.topology.stages);
        let mut stages = IndexMap::with_capacity(candidate.stages.len());
        for (name, slot) in candidate.stages {
            let stage = match slot {
                Slot::Fresh(stage) => {
                    if !report.added.contains(&name) {
                        report.recreated.push(name.clone());
                    }
                    stage
                }
                Slot::Kept(_) => match rebuilt.shift_remove(&name) {
                    Some(stage) => {
                        old_stages.shift_remove(&name);
                        report.recreated.push(name.clone());
                        stage
                    }
                    None => match old_stages.shift_remove(&name) {
                        Some(stage) => {
                            report.preserved.push(name.clone());
                            stage
                        }
                        None => continue,
                    },
                },
            };
            stages.insert(name, stage);
        }
        report.removed = old_stages.into_keys().collect();

        let topology = Topology {
            stages,
            edges: candidate.edges,
            outputs: candidate.outputs,
        };
        self.replace_topology(topology, compiled);

        if !report.recreated.is_empty() {
            tracing::warn!(
                graph = %self.name(),
                recreated = ?report.recreated,
                "Recreated stages after topology change"
            );
        }
        tracing::info!(
            graph = %self.name(),
            added = report.added.len(),
            removed = report.removed.len(),
            preserved = report.preserved.len(),
            "Applied topology change"
        );
        Ok(report)
    }
}
