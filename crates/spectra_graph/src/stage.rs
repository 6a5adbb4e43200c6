// SPDX-License-Identifier: MIT OR Apache-2.0
//! Stage instances and the contract every stage implementation fulfils.

use crate::config::StageConfig;
use crate::port::{PortDesc, Resource, ResourceType, Texture};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier for a created stage instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StageId(pub Uuid);

impl StageId {
    /// Create a new random stage ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for StageId {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-frame information handed to every stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameInfo {
    /// Index of the frame within its graph, starting at zero
    pub index: u64,
    /// Output width in pixels
    pub width: u32,
    /// Output height in pixels
    pub height: u32,
}

/// The contract implemented by every stage type.
///
/// Implementations are created by their [`StageType`](crate::registry::StageType)
/// factory from an already validated configuration. Creation must stay cheap:
/// buffers and other internal resources belong in [`RenderStage::prepare`],
/// which runs once, right before the first frame the stage executes in.
pub trait RenderStage: Send {
    /// Allocate internal resources. Called once before the first execution.
    fn prepare(&mut self, _frame: &FrameInfo) -> Result<(), StageError> {
        Ok(())
    }

    /// Apply a new configuration between frames. The port layout is unchanged.
    fn reconfigure(&mut self, config: &StageConfig) -> Result<(), StageError>;

    /// Run the stage for one frame, reading inputs and writing outputs through `ctx`.
    fn execute(&mut self, ctx: &mut StageContext<'_>) -> Result<(), StageError>;
}

/// Inputs and output slots of one stage for one frame
pub struct StageContext<'a> {
    frame: &'a FrameInfo,
    inputs: Vec<(&'a str, Option<&'a Resource>)>,
    ports: &'a [PortDesc],
    produced: IndexMap<String, Resource>,
}

impl<'a> StageContext<'a> {
    /// Create a context from resolved input values and the stage's ports
    pub fn new(
        frame: &'a FrameInfo,
        inputs: Vec<(&'a str, Option<&'a Resource>)>,
        ports: &'a [PortDesc],
    ) -> Self {
        Self {
            frame,
            inputs,
            ports,
            produced: IndexMap::new(),
        }
    }

    /// The frame being produced
    pub fn frame(&self) -> &FrameInfo {
        self.frame
    }

    /// Value bound to an input port, if any
    pub fn input(&self, port: &str) -> Option<&'a Resource> {
        self.inputs
            .iter()
            .find(|(name, _)| *name == port)
            .and_then(|(_, value)| *value)
    }

    /// Texture bound to a mandatory buffer input
    pub fn texture(&self, port: &str) -> Result<&'a Texture, StageError> {
        let resource = self
            .input(port)
            .ok_or_else(|| StageError::MissingInput(port.to_string()))?;
        let texture = resource
            .as_texture()
            .ok_or_else(|| StageError::UnexpectedResource {
                port: port.to_string(),
                expected: "texture",
                found: resource.kind(),
            })?;
        check_texture(port, texture)?;
        Ok(texture)
    }

    /// Texture bound to an optional buffer input.
    ///
    /// Malformed textures read as absent.
    pub fn optional_texture(&self, port: &str) -> Option<&'a Texture> {
        self.input(port)
            .and_then(Resource::as_texture)
            .filter(|texture| texture.is_well_formed())
    }

    /// Write an output value.
    ///
    /// Fails if the port is not a declared output, the value does not fit
    /// its resource type, or a texture's pixel count does not match its size.
    pub fn set_output(&mut self, port: &str, value: Resource) -> Result<(), StageError> {
        let desc = self
            .ports
            .iter()
            .find(|p| p.is_output() && p.name == port)
            .ok_or_else(|| StageError::UnknownOutput(port.to_string()))?;
        if !desc.resource_type.accepts(&value) {
            return Err(StageError::WrongOutputType {
                port: port.to_string(),
                expected: desc.resource_type,
                found: value.kind(),
            });
        }
        if let Resource::Texture(texture) = &value {
            check_texture(port, texture)?;
        }
        self.produced.insert(port.to_string(), value);
        Ok(())
    }

    /// Write a texture output
    pub fn set_texture(&mut self, port: &str, texture: Texture) -> Result<(), StageError> {
        self.set_output(port, Resource::Texture(texture))
    }

    /// Consume the context, returning the produced outputs
    pub fn into_outputs(self) -> IndexMap<String, Resource> {
        self.produced
    }
}

fn check_texture(port: &str, texture: &Texture) -> Result<(), StageError> {
    if texture.is_well_formed() {
        return Ok(());
    }
    Err(StageError::MalformedTexture {
        port: port.to_string(),
        width: texture.width,
        height: texture.height,
        pixels: texture.pixels.len(),
    })
}

/// A configured stage instance owned by a graph
pub struct Stage {
    id: StageId,
    type_name: String,
    config: StageConfig,
    ports: Vec<PortDesc>,
    runtime: Box<dyn RenderStage>,
    prepared: bool,
}

impl Stage {
    pub(crate) fn new(
        type_name: impl Into<String>,
        config: StageConfig,
        ports: Vec<PortDesc>,
        runtime: Box<dyn RenderStage>,
    ) -> Self {
        Self {
            id: StageId::new(),
            type_name: type_name.into(),
            config,
            ports,
            runtime,
            prepared: false,
        }
    }

    /// Instance ID, unique per created stage
    pub fn id(&self) -> StageId {
        self.id
    }

    /// Stage type name
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Current (fully resolved) configuration
    pub fn config(&self) -> &StageConfig {
        &self.config
    }

    /// All ports
    pub fn ports(&self) -> &[PortDesc] {
        &self.ports
    }

    /// Get a port by name
    pub fn port(&self, name: &str) -> Option<&PortDesc> {
        self.ports.iter().find(|p| p.name == name)
    }

    /// Input ports
    pub fn inputs(&self) -> impl Iterator<Item = &PortDesc> {
        self.ports.iter().filter(|p| p.is_input())
    }

    /// Output ports
    pub fn outputs(&self) -> impl Iterator<Item = &PortDesc> {
        self.ports.iter().filter(|p| p.is_output())
    }

    /// Whether internal resources have been allocated
    pub fn is_prepared(&self) -> bool {
        self.prepared
    }

    pub(crate) fn reconfigure(&mut self, config: StageConfig) -> Result<(), StageError> {
        self.runtime.reconfigure(&config)?;
        self.config = config;
        Ok(())
    }

    /// Execute once, preparing first if needed. Outputs are only returned on
    /// success.
    pub(crate) fn run(
        &mut self,
        frame: &FrameInfo,
        inputs: Vec<(&str, Option<&Resource>)>,
    ) -> Result<IndexMap<String, Resource>, StageError> {
        if !self.prepared {
            self.runtime.prepare(frame)?;
            self.prepared = true;
        }
        let mut ctx = StageContext::new(frame, inputs, &self.ports);
        self.runtime.execute(&mut ctx)?;
        Ok(ctx.into_outputs())
    }
}

impl fmt::Debug for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stage")
            .field("id", &self.id)
            .field("type_name", &self.type_name)
            .field("config", &self.config)
            .field("ports", &self.ports)
            .field("prepared", &self.prepared)
            .finish_non_exhaustive()
    }
}

/// Error reported by a stage implementation
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StageError {
    /// A mandatory input had no value
    #[error("Missing input: {0}")]
    MissingInput(String),

    /// An input carried a different kind of value than the stage expects
    #[error("Input '{port}' expected {expected}, found {found}")]
    UnexpectedResource {
        /// Input port
        port: String,
        /// Expected value kind
        expected: &'static str,
        /// Received value kind
        found: &'static str,
    },

    /// The stage wrote a port it does not declare as output
    #[error("Unknown output: {0}")]
    UnknownOutput(String),

    /// The stage wrote a value that does not fit the output's type
    #[error("Output '{port}' is a {expected}, cannot hold a {found}")]
    WrongOutputType {
        /// Output port
        port: String,
        /// Declared resource type
        expected: ResourceType,
        /// Written value kind
        found: &'static str,
    },

    /// A texture's pixel count does not match its dimensions
    #[error("Texture on '{port}' is {width}x{height} but holds {pixels} pixels")]
    MalformedTexture {
        /// Port the texture was read from or written to
        port: String,
        /// Declared width
        width: u32,
        /// Declared height
        height: u32,
        /// Actual pixel count
        pixels: usize,
    },

    /// Implementation-specific failure
    #[error("{0}")]
    Failed(String),
}
