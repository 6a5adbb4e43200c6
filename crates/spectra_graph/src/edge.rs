// SPDX-License-Identifier: MIT OR Apache-2.0
//! Port references and edges between stages.

use crate::topology::TopologyError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Reference to a port of a stage instance, written `instance.port`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PortRef {
    /// Stage instance name
    pub stage: String,
    /// Port name
    pub port: String,
}

impl PortRef {
    /// Create a port reference
    pub fn new(stage: impl Into<String>, port: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            port: port.into(),
        }
    }

    /// Parse an `instance.port` spec.
    ///
    /// The spec is split at the first `.`; both halves must be non-empty.
    pub fn parse(spec: &str) -> Result<Self, TopologyError> {
        match spec.split_once('.') {
            Some((stage, port)) if !stage.is_empty() && !port.is_empty() => {
                Ok(Self::new(stage, port))
            }
            _ => Err(TopologyError::MalformedPortSpec(spec.to_string())),
        }
    }
}

impl fmt::Display for PortRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.stage, self.port)
    }
}

impl FromStr for PortRef {
    type Err = TopologyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for PortRef {
    type Error = TopologyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<PortRef> for String {
    fn from(value: PortRef) -> Self {
        value.to_string()
    }
}

/// A binding from an output port to an input port
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Edge {
    /// Producing output port
    pub src: PortRef,
    /// Consuming input port
    pub dst: PortRef,
}

impl Edge {
    /// Create a new edge
    pub fn new(src: PortRef, dst: PortRef) -> Self {
        Self { src, dst }
    }

    /// Check if this edge touches a specific stage
    pub fn involves_stage(&self, stage: &str) -> bool {
        self.src.stage == stage || self.dst.stage == stage
    }
}

impl fmt::Display for Edge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.src, self.dst)
    }
}
