// SPDX-License-Identifier: MIT OR Apache-2.0
//! Path tracer with temporal reservoir resampling.
//!
//! Each frame traces one candidate path per pixel and streams it into the
//! pixel's reservoir. Reservoirs survive across frames, capped at
//! `ReSTIRPTReservoirSize` samples, and are dropped when the resolution or
//! configuration changes.

use super::path_tracer::{self, Surface, Transport};
use super::{luminance, random};
use crate::config::{ConfigSchema, OptionSpec, StageConfig};
use crate::port::{PortDesc, ResourceType, Texture};
use crate::registry::StageType;
use crate::stage::{FrameInfo, RenderStage, StageContext, StageError};

/// Registered type name
pub const TYPE_NAME: &str = "ReSTIRPLTPT";

/// Validated options of a [`ReSTIRPLTPT`] stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReSTIRParams {
    /// Maximum indirect bounces
    pub max_bounces: u32,
    /// Hero wavelengths per path
    pub hwss: u32,
    /// Light from the environment map
    pub use_env_lights: bool,
    /// Terminate low contribution paths early
    pub do_russian_roulette: bool,
    /// Cap on the samples a reservoir represents
    pub reservoir_size: u32,
}

impl ReSTIRParams {
    /// Read options from a resolved configuration
    pub fn from_config(config: &StageConfig) -> Self {
        let int = |name: &str, default: u32| {
            config
                .get_int(name)
                .map_or(default, |n| n.max(0) as u32)
        };
        Self {
            max_bounces: int("maxBounces", 8),
            hwss: int("HWSS", 1).max(1),
            use_env_lights: config.get_bool("useEnvLights").unwrap_or(true),
            do_russian_roulette: config.get_bool("doRussianRoulette").unwrap_or(true),
            reservoir_size: int("ReSTIRPTReservoirSize", 32).max(1),
        }
    }

    fn transport(&self) -> Transport {
        Transport {
            max_bounces: self.max_bounces,
            wavelengths: self.hwss,
            env_lights: self.use_env_lights,
            russian_roulette: self.do_russian_roulette,
        }
    }
}

/// Option schema
pub fn schema() -> ConfigSchema {
    ConfigSchema::new()
        .option(OptionSpec::int("maxBounces", 8, 0, 128).describe("Maximum indirect bounces"))
        .option(OptionSpec::int("HWSS", 1, 1, 4).describe("Hero wavelengths per path"))
        .option(OptionSpec::bool("useEnvLights", true).describe("Use environment lighting"))
        .option(OptionSpec::bool("doRussianRoulette", true).describe("Russian roulette termination"))
        .option(
            OptionSpec::int("ReSTIRPTReservoirSize", 32, 1, 64)
                .describe("Temporal reservoir sample cap"),
        )
}

/// Registry entry
pub fn stage_type() -> StageType {
    StageType::new(
        TYPE_NAME,
        |_| {
            vec![
                PortDesc::input("vbuffer", ResourceType::VisibilityBuffer),
                PortDesc::input("viewW", ResourceType::VectorBuffer).optional(),
                PortDesc::output("color", ResourceType::ColorBuffer),
                PortDesc::output("normal", ResourceType::VectorBuffer),
                PortDesc::output("albedo", ResourceType::ColorBuffer),
            ]
        },
        |config| Box::new(ReSTIRPLTPT::new(ReSTIRParams::from_config(config))),
    )
    .with_description("Path tracer with temporal path reuse")
    .with_schema(schema())
}

/// Weighted reservoir holding one selected sample
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Reservoir {
    /// Selected sample
    pub sample: [f32; 4],
    /// Sum of candidate weights
    pub weight_sum: f32,
    /// Number of candidates seen
    pub count: u32,
}

impl Reservoir {
    /// Stream a candidate in. `choice` is a uniform random number.
    pub fn update(&mut self, candidate: [f32; 4], weight: f32, choice: f32) {
        self.weight_sum += weight;
        self.count += 1;
        if self.weight_sum > 0.0 && choice * self.weight_sum < weight {
            self.sample = candidate;
        }
    }

    /// Rescale so the reservoir represents at most `cap` samples
    pub fn clamp(&mut self, cap: u32) {
        if self.count > cap {
            self.weight_sum *= cap as f32 / self.count as f32;
            self.count = cap;
        }
    }

    /// Unbiased estimate of the pixel value
    pub fn estimate(&self) -> [f32; 4] {
        let target = luminance(self.sample);
        if self.count == 0 || target <= 0.0 {
            return [0.0, 0.0, 0.0, 1.0];
        }
        let w = self.weight_sum / (self.count as f32 * target);
        [self.sample[0] * w, self.sample[1] * w, self.sample[2] * w, 1.0]
    }
}

/// ReSTIR path tracer stage
#[derive(Debug)]
pub struct ReSTIRPLTPT {
    params: ReSTIRParams,
    size: (u32, u32),
    reservoirs: Vec<Reservoir>,
}

impl ReSTIRPLTPT {
    /// Create the stage; reservoirs are allocated on preparation
    pub fn new(params: ReSTIRParams) -> Self {
        Self {
            params,
            size: (0, 0),
            reservoirs: Vec::new(),
        }
    }

    /// Per-pixel reservoirs carried between frames
    pub fn reservoirs(&self) -> &[Reservoir] {
        &self.reservoirs
    }

    fn allocate(&mut self, width: u32, height: u32) {
        self.size = (width, height);
        self.reservoirs = vec![Reservoir::default(); width as usize * height as usize];
    }
}

impl RenderStage for ReSTIRPLTPT {
    fn prepare(&mut self, frame: &FrameInfo) -> Result<(), StageError> {
        self.allocate(frame.width, frame.height);
        Ok(())
    }

    fn reconfigure(&mut self, config: &StageConfig) -> Result<(), StageError> {
        self.params = ReSTIRParams::from_config(config);
        self.reservoirs.fill(Reservoir::default());
        Ok(())
    }

    fn execute(&mut self, ctx: &mut StageContext<'_>) -> Result<(), StageError> {
        let vbuffer = ctx.texture("vbuffer")?;
        let view = ctx.optional_texture("viewW");
        let frame = ctx.frame().index;
        if self.size != (vbuffer.width, vbuffer.height) {
            tracing::debug!(
                width = vbuffer.width,
                height = vbuffer.height,
                "Resolution changed, resetting reservoirs"
            );
            self.allocate(vbuffer.width, vbuffer.height);
        }

        let transport = self.params.transport();
        let cap = self.params.reservoir_size;
        let reservoirs = &mut self.reservoirs;
        let width = vbuffer.width;
        let color = path_tracer::shade(vbuffer, view, |hit, dir, x, y| {
            let candidate = path_tracer::trace_pixel(hit, dir, &transport, x, y, frame);
            let Some(reservoir) = reservoirs.get_mut((y * width + x) as usize) else {
                return candidate;
            };
            reservoir.update(candidate, luminance(candidate), random(x, y, frame, 1000));
            reservoir.clamp(cap);
            reservoir.estimate()
        })?;

        let mut normal = Texture::filled(vbuffer.width, vbuffer.height, [0.0; 4]);
        let mut albedo = Texture::filled(vbuffer.width, vbuffer.height, [0.0, 0.0, 0.0, 1.0]);
        let texels = normal.pixels.iter_mut().zip(albedo.pixels.iter_mut());
        for ((n, a), hit) in texels.zip(&vbuffer.pixels) {
            if let Some(surface) = Surface::from_hit(*hit) {
                let [nx, ny, nz] = surface.normal;
                *n = [nx, ny, nz, 0.0];
                *a = surface.albedo();
            }
        }

        ctx.set_texture("color", color)?;
        ctx.set_texture("normal", normal)?;
        ctx.set_texture("albedo", albedo)
    }
}
