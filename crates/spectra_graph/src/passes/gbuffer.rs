// SPDX-License-Identifier: MIT OR Apache-2.0
//! Ray traced G-buffer pass.
//!
//! Writes a visibility buffer and world space view directions for a fixed
//! test scene: a sphere resting on a ground plane, lit by a sky. Camera
//! jitter follows the configured sample pattern, cycling every
//! `sampleCount` frames.

use crate::config::{ConfigSchema, OptionSpec, StageConfig};
use crate::port::{PortDesc, ResourceType, Texture};
use crate::registry::StageType;
use crate::stage::{FrameInfo, RenderStage, StageContext, StageError};

/// Registered type name
pub const TYPE_NAME: &str = "GBufferRT";

/// Sphere center in screen space, and radius
const SPHERE: ([f32; 2], f32) = ([0.5, 0.45], 0.3);
/// Screen space height of the horizon
const HORIZON: f32 = 0.65;

/// Visibility buffer instance ids
pub mod instance {
    /// No geometry hit
    pub const MISS: f32 = 0.0;
    /// The sphere
    pub const SPHERE: f32 = 1.0;
    /// The ground plane
    pub const GROUND: f32 = 2.0;
}

/// Sub-pixel camera jitter pattern
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SamplePattern {
    /// No jitter
    #[default]
    Center,
    /// Standard 8x MSAA positions
    DirectX,
    /// Halton (2, 3) sequence
    Halton,
    /// Jittered grid
    Stratified,
}

impl SamplePattern {
    /// Option variant names
    pub const NAMES: &'static [&'static str] = &["Center", "DirectX", "Halton", "Stratified"];

    /// Parse a variant name
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "Center" => Some(Self::Center),
            "DirectX" => Some(Self::DirectX),
            "Halton" => Some(Self::Halton),
            "Stratified" => Some(Self::Stratified),
            _ => None,
        }
    }

    /// Jitter offsets in pixels, each within `[-0.5, 0.5)`
    pub fn offsets(self, count: usize) -> Vec<[f32; 2]> {
        const DIRECTX_8X: [[f32; 2]; 8] = [
            [1.0, -3.0],
            [-1.0, 3.0],
            [5.0, 1.0],
            [-3.0, -5.0],
            [-5.0, 5.0],
            [-7.0, -1.0],
            [3.0, 7.0],
            [7.0, -7.0],
        ];

        (0..count)
            .map(|i| match self {
                Self::Center => [0.0, 0.0],
                Self::DirectX => {
                    let [x, y] = DIRECTX_8X[i % DIRECTX_8X.len()];
                    [x / 16.0, y / 16.0]
                }
                Self::Halton => [
                    radical_inverse(i as u32 + 1, 2) - 0.5,
                    radical_inverse(i as u32 + 1, 3) - 0.5,
                ],
                Self::Stratified => {
                    let side = (count as f32).sqrt().ceil().max(1.0) as usize;
                    let cell = [(i % side) as f32, (i / side % side) as f32];
                    let jitter = [
                        super::random(i as u32, 0, 0, 7),
                        super::random(i as u32, 1, 0, 7),
                    ];
                    [
                        (cell[0] + jitter[0]) / side as f32 - 0.5,
                        (cell[1] + jitter[1]) / side as f32 - 0.5,
                    ]
                }
            })
            .collect()
    }
}

fn radical_inverse(mut index: u32, base: u32) -> f32 {
    let inverse_base = 1.0 / base as f32;
    let mut factor = inverse_base;
    let mut result = 0.0;
    while index > 0 {
        result += (index % base) as f32 * factor;
        index /= base;
        factor *= inverse_base;
    }
    result
}

/// Validated options of a [`GBufferRT`] stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GBufferParams {
    /// Camera jitter pattern
    pub sample_pattern: SamplePattern,
    /// Number of distinct jitter positions
    pub sample_count: usize,
    /// Discard alpha tested ground texels
    pub use_alpha_test: bool,
}

impl GBufferParams {
    /// Read options from a resolved configuration
    pub fn from_config(config: &StageConfig) -> Self {
        Self {
            sample_pattern: config
                .get_enum("samplePattern")
                .and_then(SamplePattern::from_name)
                .unwrap_or_default(),
            sample_count: config
                .get_int("sampleCount")
                .map_or(16, |n| n.max(1) as usize),
            use_alpha_test: config.get_bool("useAlphaTest").unwrap_or(true),
        }
    }
}

/// Option schema
pub fn schema() -> ConfigSchema {
    ConfigSchema::new()
        .option(
            OptionSpec::choice("samplePattern", SamplePattern::NAMES, "Center")
                .describe("Camera jitter pattern"),
        )
        .option(OptionSpec::int("sampleCount", 16, 1, 1024).describe("Jitter positions per cycle"))
        .option(OptionSpec::bool("useAlphaTest", true).describe("Alpha test ground geometry"))
}

/// Registry entry
pub fn stage_type() -> StageType {
    StageType::new(
        TYPE_NAME,
        |_| {
            vec![
                PortDesc::output("vbuffer", ResourceType::VisibilityBuffer),
                PortDesc::output("viewW", ResourceType::VectorBuffer),
            ]
        },
        |config| Box::new(GBufferRT::new(GBufferParams::from_config(config))),
    )
    .with_description("Visibility buffer and view directions for the test scene")
    .with_schema(schema())
}

/// G-buffer stage
#[derive(Debug)]
pub struct GBufferRT {
    params: GBufferParams,
    jitter: Vec<[f32; 2]>,
}

impl GBufferRT {
    /// Create the stage; the jitter table is built on preparation
    pub fn new(params: GBufferParams) -> Self {
        Self {
            params,
            jitter: Vec::new(),
        }
    }

    /// Jitter offset used for a frame
    pub fn jitter(&self, frame: u64) -> [f32; 2] {
        if self.jitter.is_empty() {
            return [0.0, 0.0];
        }
        self.jitter[(frame % self.jitter.len() as u64) as usize]
    }

    fn build_jitter(&mut self) {
        self.jitter = self
            .params
            .sample_pattern
            .offsets(self.params.sample_count);
    }

    /// Primary visibility for one pixel
    fn trace(&self, u: f32, v: f32) -> [f32; 4] {
        let ([cx, cy], radius) = SPHERE;
        let (dx, dy) = (u - cx, v - cy);
        let r2 = dx * dx + dy * dy;
        if r2 < radius * radius {
            let depth = 1.0 - (radius * radius - r2).sqrt();
            return [instance::SPHERE, dx / radius, dy / radius, depth];
        }

        if v > HORIZON {
            let distance = (v - HORIZON) / (1.0 - HORIZON);
            let depth = 1.0 / distance.max(1e-3);
            let (gu, gv) = (u * depth, depth);
            if self.params.use_alpha_test && ((gu * 4.0).floor() + (gv * 4.0).floor()) % 7.0 == 0.0 {
                return [instance::MISS, 0.0, 0.0, f32::INFINITY];
            }
            return [instance::GROUND, gu.fract(), gv.fract(), depth];
        }

        [instance::MISS, 0.0, 0.0, f32::INFINITY]
    }
}

impl RenderStage for GBufferRT {
    fn prepare(&mut self, _frame: &FrameInfo) -> Result<(), StageError> {
        self.build_jitter();
        Ok(())
    }

    fn reconfigure(&mut self, config: &StageConfig) -> Result<(), StageError> {
        self.params = GBufferParams::from_config(config);
        if !self.jitter.is_empty() {
            self.build_jitter();
        }
        Ok(())
    }

    fn execute(&mut self, ctx: &mut StageContext<'_>) -> Result<(), StageError> {
        let frame = *ctx.frame();
        let (width, height) = (frame.width, frame.height);
        let [jx, jy] = self.jitter(frame.index);

        let mut vbuffer = Texture::filled(width, height, [0.0; 4]);
        let mut view = Texture::filled(width, height, [0.0; 4]);
        for y in 0..height {
            for x in 0..width {
                let u = (x as f32 + 0.5 + jx) / width as f32;
                let v = (y as f32 + 0.5 + jy) / height as f32;
                let index = (y * width + x) as usize;
                vbuffer.pixels[index] = self.trace(u, v);

                let dir = [u - 0.5, 0.5 - v, 1.0];
                let len = (dir[0] * dir[0] + dir[1] * dir[1] + dir[2] * dir[2]).sqrt();
                view.pixels[index] = [dir[0] / len, dir[1] / len, dir[2] / len, 0.0];
            }
        }

        ctx.set_texture("vbuffer", vbuffer)?;
        ctx.set_texture("viewW", view)
    }
}
