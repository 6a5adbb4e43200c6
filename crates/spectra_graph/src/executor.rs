// SPDX-License-Identifier: MIT OR Apache-2.0
//! Frame execution.
//!
//! A frame runs every stage of a compiled graph once, in schedule order.
//! Produced outputs are stored behind `Arc` in the frame's resource table;
//! downstream stages read them by reference and fan-out consumers share the
//! same value. Cancellation and deadlines are honoured only between stages.

use crate::edge::PortRef;
use crate::port::Resource;
use crate::resolver::InputSource;
use crate::stage::{FrameInfo, Stage, StageError};
use crate::topology::CompiledGraph;
use indexmap::IndexMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Cooperative cancellation and deadline for frame execution
#[derive(Debug, Clone, Default)]
pub struct FrameControl {
    cancelled: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl FrameControl {
    /// Create a control that never interrupts
    pub fn new() -> Self {
        Self::default()
    }

    /// Abort frames still running at `deadline`
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Abort frames still running after `timeout` from now
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Request cancellation. Clones share the flag.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Whether cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Clear a previous cancellation request
    pub fn reset(&self) {
        self.cancelled.store(false, Ordering::Release);
    }

    fn interruption(&self, next_stage: &str) -> Option<ExecutionError> {
        if self.is_cancelled() {
            return Some(ExecutionError::Cancelled {
                before: next_stage.to_string(),
            });
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(ExecutionError::DeadlineExceeded {
                before: next_stage.to_string(),
            }),
            _ => None,
        }
    }
}

/// Resources produced during one frame
#[derive(Debug, Clone)]
pub struct Frame {
    graph: String,
    index: u64,
    resources: IndexMap<PortRef, Arc<Resource>>,
    marked: Vec<PortRef>,
    executed: Vec<String>,
}

impl Frame {
    fn new(graph: &str, index: u64, marked: Vec<PortRef>) -> Self {
        Self {
            graph: graph.to_string(),
            index,
            resources: IndexMap::new(),
            marked,
            executed: Vec::new(),
        }
    }

    /// Name of the graph that produced this frame
    pub fn graph(&self) -> &str {
        &self.graph
    }

    /// Frame index within the graph
    pub fn index(&self) -> u64 {
        self.index
    }

    /// Value produced by an output port
    pub fn get(&self, port: &PortRef) -> Option<&Resource> {
        self.resources.get(port).map(AsRef::as_ref)
    }

    /// Shared handle to a produced value
    pub fn get_shared(&self, port: &PortRef) -> Option<Arc<Resource>> {
        self.resources.get(port).cloned()
    }

    /// Value produced by an `instance.port` spec
    pub fn output(&self, spec: &str) -> Option<&Resource> {
        self.get(&PortRef::parse(spec).ok()?)
    }

    /// Marked outputs that were produced, in marking order
    pub fn marked_outputs(&self) -> impl Iterator<Item = (&PortRef, &Resource)> {
        self.marked
            .iter()
            .filter_map(|port| self.get(port).map(|value| (port, value)))
    }

    /// Every produced value, in production order
    pub fn resources(&self) -> impl Iterator<Item = (&PortRef, &Resource)> {
        self.resources.iter().map(|(port, value)| (port, value.as_ref()))
    }

    /// Stages that completed, in execution order
    pub fn executed_stages(&self) -> &[String] {
        &self.executed
    }

    /// Whether nothing was produced
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}

/// A frame that did not complete
#[derive(Debug, thiserror::Error)]
#[error("Frame {} of graph '{}' aborted: {error}", .partial.index, .partial.graph)]
pub struct FrameFailure {
    /// Why the frame stopped
    pub error: ExecutionError,
    /// Outputs of the stages that completed before the failure
    pub partial: Frame,
}

impl FrameFailure {
    pub(crate) fn not_compiled(graph: &str, index: u64) -> Self {
        Self {
            error: ExecutionError::NotCompiled {
                graph: graph.to_string(),
            },
            partial: Frame::new(graph, index, Vec::new()),
        }
    }
}

/// Error raised while running a frame
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExecutionError {
    /// The graph has no valid schedule
    #[error("Graph '{graph}' is not compiled")]
    NotCompiled {
        /// Graph name
        graph: String,
    },

    /// A stage returned an error
    #[error("Stage '{stage}' failed: {cause}")]
    StageFailed {
        /// Failing stage instance
        stage: String,
        /// Error reported by the stage
        #[source]
        cause: StageError,
    },

    /// A stage did not write an output that is consumed or marked
    #[error("Stage '{stage}' did not produce output '{port}'")]
    OutputNotProduced {
        /// Stage instance
        stage: String,
        /// Missing output
        port: String,
    },

    /// Cancellation was requested
    #[error("Cancelled before stage '{before}'")]
    Cancelled {
        /// First stage that did not run
        before: String,
    },

    /// The frame deadline passed
    #[error("Deadline exceeded before stage '{before}'")]
    DeadlineExceeded {
        /// First stage that did not run
        before: String,
    },
}

impl ExecutionError {
    /// Name of the stage the error is attributed to, if any
    pub fn stage(&self) -> Option<&str> {
        match self {
            Self::StageFailed { stage, .. } | Self::OutputNotProduced { stage, .. } => {
                Some(stage.as_str())
            }
            Self::Cancelled { before } | Self::DeadlineExceeded { before } => Some(before.as_str()),
            Self::NotCompiled { .. } => None,
        }
    }
}

/// Run one frame of a compiled graph
pub(crate) fn run_frame(
    graph: &str,
    stages: &mut IndexMap<String, Stage>,
    compiled: &CompiledGraph,
    info: &FrameInfo,
    control: &FrameControl,
) -> Result<Frame, FrameFailure> {
    let mut frame = Frame::new(graph, info.index, compiled.outputs.clone());

    for &index in compiled.schedule.indices() {
        let Some((name, stage)) = stages.get_index_mut(index) else {
            return Err(FrameFailure {
                error: ExecutionError::NotCompiled {
                    graph: graph.to_string(),
                },
                partial: frame,
            });
        };

        if let Some(error) = control.interruption(name) {
            tracing::debug!(graph, frame = info.index, %error, "Frame interrupted");
            return Err(FrameFailure {
                error,
                partial: frame,
            });
        }

        let produced = {
            let inputs = compiled.bindings[index]
                .iter()
                .map(|binding| {
                    let value = match &binding.source {
                        InputSource::Edge(src) => frame.resources.get(src).map(AsRef::as_ref),
                        InputSource::Default(value) => Some(value),
                        InputSource::Absent => None,
                    };
                    (binding.port.as_str(), value)
                })
                .collect();
            stage.run(info, inputs)
        };

        let produced = match produced {
            Ok(produced) => produced,
            Err(cause) => {
                tracing::warn!(graph, frame = info.index, stage = %name, %cause, "Stage failed");
                return Err(FrameFailure {
                    error: ExecutionError::StageFailed {
                        stage: name.clone(),
                        cause,
                    },
                    partial: frame,
                });
            }
        };

        if let Some(port) = compiled.required_outputs[index]
            .iter()
            .find(|port| !produced.contains_key(*port))
        {
            return Err(FrameFailure {
                error: ExecutionError::OutputNotProduced {
                    stage: name.clone(),
                    port: port.clone(),
                },
                partial: frame,
            });
        }

        for (port, value) in produced {
            frame
                .resources
                .insert(PortRef::new(name.as_str(), port), Arc::new(value));
        }
        frame.executed.push(name.clone());
    }

    tracing::trace!(graph, frame = info.index, "Frame complete");
    Ok(frame)
}
