// SPDX-License-Identifier: MIT OR Apache-2.0
//! Port definitions for stage inputs/outputs and the resources that flow
//! through them.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Port direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PortDirection {
    /// Input port
    Input,
    /// Output port
    Output,
}

impl fmt::Display for PortDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Input => f.write_str("input"),
            Self::Output => f.write_str("output"),
        }
    }
}

/// Kind of resource a port carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceType {
    /// RGBA radiance or display color buffer
    ColorBuffer,
    /// Packed visibility buffer (hit info per pixel)
    VisibilityBuffer,
    /// Per-pixel vector data (directions, normals)
    VectorBuffer,
    /// Single floating point value
    Scalar,
    /// Named enumerant
    Enum,
}

impl ResourceType {
    /// Whether this resource type is backed by a texture
    pub fn is_buffer(self) -> bool {
        matches!(
            self,
            Self::ColorBuffer | Self::VisibilityBuffer | Self::VectorBuffer
        )
    }

    /// Check whether a produced resource value fits this type
    pub fn accepts(self, resource: &Resource) -> bool {
        match resource {
            Resource::Texture(_) => self.is_buffer(),
            Resource::Scalar(_) => self == Self::Scalar,
            Resource::Enum(_) => self == Self::Enum,
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ColorBuffer => "color buffer",
            Self::VisibilityBuffer => "visibility buffer",
            Self::VectorBuffer => "vector buffer",
            Self::Scalar => "scalar",
            Self::Enum => "enum",
        };
        f.write_str(name)
    }
}

/// A port declared by a stage type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortDesc {
    /// Port name, unique within the stage
    pub name: String,
    /// Port direction
    pub direction: PortDirection,
    /// Resource type
    pub resource_type: ResourceType,
    /// Value used when an input has no incoming edge
    pub default_value: Option<Resource>,
    /// Whether an input may be left unbound without a default
    pub optional: bool,
}

impl PortDesc {
    /// Create a new input port
    pub fn input(name: impl Into<String>, resource_type: ResourceType) -> Self {
        Self {
            name: name.into(),
            direction: PortDirection::Input,
            resource_type,
            default_value: None,
            optional: false,
        }
    }

    /// Create a new output port
    pub fn output(name: impl Into<String>, resource_type: ResourceType) -> Self {
        Self {
            name: name.into(),
            direction: PortDirection::Output,
            resource_type,
            default_value: None,
            optional: false,
        }
    }

    /// Set the default value
    pub fn with_default(mut self, value: Resource) -> Self {
        self.default_value = Some(value);
        self
    }

    /// Mark as optional
    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    /// Whether this port is an input
    pub fn is_input(&self) -> bool {
        self.direction == PortDirection::Input
    }

    /// Whether this port is an output
    pub fn is_output(&self) -> bool {
        self.direction == PortDirection::Output
    }

    /// An input that must be bound by an edge before the graph can run
    pub fn is_mandatory(&self) -> bool {
        self.is_input() && self.default_value.is_none() && !self.optional
    }
}

/// CPU-side RGBA32F image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Texture {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Row-major pixel data
    pub pixels: Vec<[f32; 4]>,
}

impl Texture {
    /// Create a texture filled with a single value
    pub fn filled(width: u32, height: u32, value: [f32; 4]) -> Self {
        Self {
            width,
            height,
            pixels: vec![value; width as usize * height as usize],
        }
    }

    /// Get a pixel
    pub fn pixel(&self, x: u32, y: u32) -> Option<[f32; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.pixels
            .get(y as usize * self.width as usize + x as usize)
            .copied()
    }

    /// Whether the pixel data matches the dimensions
    pub fn is_well_formed(&self) -> bool {
        self.pixels.len() == self.width as usize * self.height as usize
    }

    /// Whether two textures share dimensions
    pub fn same_size(&self, other: &Texture) -> bool {
        self.width == other.width && self.height == other.height
    }
}

/// Value produced by an output port and read by inputs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Resource {
    /// Buffer data
    Texture(Texture),
    /// Scalar value
    Scalar(f64),
    /// Enumerant name
    Enum(String),
}

impl Resource {
    /// Borrow the texture, if this is one
    pub fn as_texture(&self) -> Option<&Texture> {
        match self {
            Self::Texture(texture) => Some(texture),
            _ => None,
        }
    }

    /// Get the scalar, if this is one
    pub fn as_scalar(&self) -> Option<f64> {
        match self {
            Self::Scalar(value) => Some(*value),
            _ => None,
        }
    }

    /// Short name of the value kind, for diagnostics
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Texture(_) => "texture",
            Self::Scalar(_) => "scalar",
            Self::Enum(_) => "enum",
        }
    }
}
