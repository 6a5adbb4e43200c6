// SPDX-License-Identifier: MIT OR Apache-2.0
//! Temporal accumulation pass.
//!
//! Averages its input over consecutive frames. The running sum is reset when
//! the input resolution or the configuration changes.

use crate::config::{ConfigSchema, OptionSpec, StageConfig};
use crate::port::{PortDesc, ResourceType, Texture};
use crate::registry::StageType;
use crate::stage::{RenderStage, StageContext, StageError};

/// Registered type name
pub const TYPE_NAME: &str = "AccumulatePass";

/// Arithmetic used for the running sum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AccumulatePrecision {
    /// Plain `f32` sums
    #[default]
    Single,
    /// `f32` sums with Kahan compensation
    SingleCompensated,
    /// `f64` sums
    Double,
}

impl AccumulatePrecision {
    /// Option variant names
    pub const NAMES: &'static [&'static str] = &["Single", "SingleCompensated", "Double"];

    /// Parse a variant name
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "Single" => Some(Self::Single),
            "SingleCompensated" => Some(Self::SingleCompensated),
            "Double" => Some(Self::Double),
            _ => None,
        }
    }
}

/// Validated options of an [`AccumulatePass`] stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccumulateParams {
    /// When false the input is passed through
    pub enabled: bool,
    /// Sum arithmetic
    pub precision: AccumulatePrecision,
    /// Stop accumulating after this many frames, 0 for never
    pub max_frame_count: u64,
}

impl AccumulateParams {
    /// Read options from a resolved configuration
    pub fn from_config(config: &StageConfig) -> Self {
        Self {
            enabled: config.get_bool("enabled").unwrap_or(true),
            precision: config
                .get_enum("precisionMode")
                .and_then(AccumulatePrecision::from_name)
                .unwrap_or_default(),
            max_frame_count: config
                .get_int("maxFrameCount")
                .map_or(0, |n| n.max(0) as u64),
        }
    }
}

/// Option schema
pub fn schema() -> ConfigSchema {
    ConfigSchema::new()
        .option(OptionSpec::bool("enabled", true).describe("Accumulate frames"))
        .option(
            OptionSpec::choice("precisionMode", AccumulatePrecision::NAMES, "Single")
                .describe("Running sum precision"),
        )
        .option(
            OptionSpec::int("maxFrameCount", 0, 0, i64::from(u32::MAX))
                .describe("Frames to accumulate, 0 for unlimited"),
        )
}

/// Registry entry
pub fn stage_type() -> StageType {
    StageType::new(
        TYPE_NAME,
        |_| {
            vec![
                PortDesc::input("input", ResourceType::ColorBuffer),
                PortDesc::output("output", ResourceType::ColorBuffer),
            ]
        },
        |config| Box::new(AccumulatePass::new(AccumulateParams::from_config(config))),
    )
    .with_description("Temporal accumulation of the input")
    .with_schema(schema())
}

#[derive(Debug, Clone, PartialEq)]
enum Sum {
    Single(Vec<[f32; 4]>),
    Compensated {
        sum: Vec<[f32; 4]>,
        error: Vec<[f32; 4]>,
    },
    Double(Vec<[f64; 4]>),
}

impl Sum {
    fn new(precision: AccumulatePrecision, len: usize) -> Self {
        match precision {
            AccumulatePrecision::Single => Self::Single(vec![[0.0; 4]; len]),
            AccumulatePrecision::SingleCompensated => Self::Compensated {
                sum: vec![[0.0; 4]; len],
                error: vec![[0.0; 4]; len],
            },
            AccumulatePrecision::Double => Self::Double(vec![[0.0; 4]; len]),
        }
    }

    fn add(&mut self, pixels: &[[f32; 4]]) {
        match self {
            Self::Single(sum) => {
                for (acc, p) in sum.iter_mut().zip(pixels) {
                    for c in 0..4 {
                        acc[c] += p[c];
                    }
                }
            }
            Self::Compensated { sum, error } => {
                for ((acc, err), p) in sum.iter_mut().zip(error.iter_mut()).zip(pixels) {
                    for c in 0..4 {
                        let y = p[c] - err[c];
                        let t = acc[c] + y;
                        err[c] = (t - acc[c]) - y;
                        acc[c] = t;
                    }
                }
            }
            Self::Double(sum) => {
                for (acc, p) in sum.iter_mut().zip(pixels) {
                    for c in 0..4 {
                        acc[c] += f64::from(p[c]);
                    }
                }
            }
        }
    }

    fn mean(&self, count: u64, out: &mut [[f32; 4]]) {
        let n = count.max(1) as f64;
        match self {
            Self::Single(sum) | Self::Compensated { sum, .. } => {
                for (o, acc) in out.iter_mut().zip(sum) {
                    *o = acc.map(|v| (f64::from(v) / n) as f32);
                }
            }
            Self::Double(sum) => {
                for (o, acc) in out.iter_mut().zip(sum) {
                    *o = acc.map(|v| (v / n) as f32);
                }
            }
        }
    }
}

/// Accumulation stage
#[derive(Debug)]
pub struct AccumulatePass {
    params: AccumulateParams,
    size: (u32, u32),
    sum: Option<Sum>,
    frames: u64,
}

impl AccumulatePass {
    /// Create the stage; sums are allocated on the first frame
    pub fn new(params: AccumulateParams) -> Self {
        Self {
            params,
            size: (0, 0),
            sum: None,
            frames: 0,
        }
    }

    /// Frames in the current running sum
    pub fn frame_count(&self) -> u64 {
        self.frames
    }

    /// Drop the running sum
    pub fn reset(&mut self) {
        self.sum = None;
        self.frames = 0;
    }
}

impl RenderStage for AccumulatePass {
    fn reconfigure(&mut self, config: &StageConfig) -> Result<(), StageError> {
        self.params = AccumulateParams::from_config(config);
        self.reset();
        Ok(())
    }

    fn execute(&mut self, ctx: &mut StageContext<'_>) -> Result<(), StageError> {
        let input = ctx.texture("input")?;
        if !self.params.enabled {
            return ctx.set_texture("output", input.clone());
        }

        if self.size != (input.width, input.height) {
            if self.sum.is_some() {
                tracing::debug!(width = input.width, height = input.height, "Resolution changed, resetting accumulation");
            }
            self.size = (input.width, input.height);
            self.reset();
        }

        let limit_reached = self.params.max_frame_count > 0 && self.frames >= self.params.max_frame_count;
        let sum = self
            .sum
            .get_or_insert_with(|| Sum::new(self.params.precision, input.pixels.len()));
        if !limit_reached {
            sum.add(&input.pixels);
            self.frames += 1;
        }

        let mut output = Texture::filled(input.width, input.height, [0.0; 4]);
        sum.mean(self.frames, &mut output.pixels);
        ctx.set_texture("output", output)
    }
}
