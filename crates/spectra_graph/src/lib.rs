// SPDX-License-Identifier: MIT OR Apache-2.0
//! Render graph engine for Spectra.
//!
//! This crate turns named render stages into per-frame work:
//! - Stage types registered once at startup through versioned plugins
//! - Graphs of stage instances connected port to port by typed edges
//! - Validation, deterministic scheduling and frame execution
//! - In-place reconfiguration of running graphs
//!
//! ## Architecture
//!
//! A [`StageRegistry`] creates [`Stage`]s from a type name and a validated
//! configuration. A [`Graph`] collects stages, edges and marked outputs and
//! compiles them into a cached [`Schedule`]. The [`GraphManager`] owns the
//! frozen registry and every compiled graph, and runs frames on request of
//! the host.

pub mod config;
pub mod desc;
pub mod edge;
pub mod executor;
pub mod graph;
pub mod manager;
pub mod passes;
pub mod pipelines;
pub mod port;
pub mod rebuild;
pub mod registry;
pub mod schedule;
pub mod stage;
mod resolver;
mod topology;

pub use config::{ConfigError, ConfigSchema, OptionSpec, OptionValue, StageConfig};
pub use desc::{DescError, GraphDesc, StageDecl};
pub use edge::{Edge, PortRef};
pub use executor::{ExecutionError, Frame, FrameControl, FrameFailure};
pub use graph::{Graph, GraphState, TopologyError};
pub use manager::{CaptureSettings, GraphManager, HostError};
pub use port::{PortDesc, PortDirection, Resource, ResourceType, Texture};
pub use rebuild::{ChangeError, RebuildReport, TopologyChange};
pub use registry::{RegistryError, StagePlugin, StageRegistry, StageType, PLUGIN_API_VERSION};
pub use resolver::{InputBinding, InputSource};
pub use schedule::Schedule;
pub use stage::{FrameInfo, RenderStage, Stage, StageContext, StageError, StageId};
pub use topology::PortLayout;
