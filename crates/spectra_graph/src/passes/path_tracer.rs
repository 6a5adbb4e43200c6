// SPDX-License-Identifier: MIT OR Apache-2.0
//! Spectral path tracer.
//!
//! Shades the visibility buffer with hero wavelength sampling: every pixel
//! traces a few stratified wavelengths per frame, so the image is noisy per
//! frame and converges under accumulation.

use super::gbuffer::instance;
use super::random;
use crate::config::{ConfigSchema, OptionSpec, StageConfig};
use crate::port::{PortDesc, ResourceType, Texture};
use crate::registry::StageType;
use crate::stage::{RenderStage, StageContext, StageError};

/// Registered type name
pub const TYPE_NAME: &str = "TinySpectralPathTracer";

/// Wavelengths traced per pixel and frame
const HERO_WAVELENGTHS: u32 = 4;
const LAMBDA_MIN: f32 = 380.0;
const LAMBDA_MAX: f32 = 780.0;

/// Light transport settings shared by the tracers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Transport {
    pub(crate) max_bounces: u32,
    pub(crate) wavelengths: u32,
    pub(crate) env_lights: bool,
    pub(crate) russian_roulette: bool,
}

/// Surface seen through one visibility buffer texel
#[derive(Debug, Clone, Copy)]
pub(crate) struct Surface {
    instance: f32,
    checker: bool,
    pub(crate) normal: [f32; 3],
}

impl Surface {
    /// Decode a visibility buffer texel, `None` for misses
    pub(crate) fn from_hit(hit: [f32; 4]) -> Option<Self> {
        if hit[0] == instance::SPHERE {
            let (dx, dy) = (hit[1], hit[2]);
            let dz = (1.0 - dx * dx - dy * dy).max(0.0).sqrt();
            Some(Self {
                instance: instance::SPHERE,
                checker: false,
                normal: [dx, -dy, -dz],
            })
        } else if hit[0] == instance::GROUND {
            Some(Self {
                instance: instance::GROUND,
                checker: (hit[1] < 0.5) != (hit[2] < 0.5),
                normal: [0.0, 1.0, 0.0],
            })
        } else {
            None
        }
    }

    /// Spectral reflectance at `lambda` nanometers
    pub(crate) fn reflectance(&self, lambda: f32) -> f32 {
        if self.instance == instance::SPHERE {
            // Orange dielectric: low in the blues, high past 560nm
            0.1 + 0.8 * smoothstep(520.0, 600.0, lambda)
        } else if self.checker {
            0.25
        } else {
            0.75
        }
    }

    /// Reflectance integrated against the RGB matching curves
    pub(crate) fn albedo(&self) -> [f32; 4] {
        let steps = 40;
        let mut rgb = [0.0f32; 3];
        for step in 0..steps {
            let lambda = LAMBDA_MIN + (LAMBDA_MAX - LAMBDA_MIN) * (step as f32 + 0.5) / steps as f32;
            let r = self.reflectance(lambda);
            let weights = wavelength_to_rgb(lambda);
            for c in 0..3 {
                rgb[c] += r * weights[c] / steps as f32;
            }
        }
        [rgb[0], rgb[1], rgb[2], 1.0]
    }
}

fn smoothstep(edge0: f32, edge1: f32, x: f32) -> f32 {
    let t = ((x - edge0) / (edge1 - edge0)).clamp(0.0, 1.0);
    t * t * (3.0 - 2.0 * t)
}

/// Approximate RGB response to a unit of radiance at `lambda`.
///
/// Normalized so a flat unit spectrum integrates to white.
pub(crate) fn wavelength_to_rgb(lambda: f32) -> [f32; 3] {
    let lobe = |center: f32, width: f32| (-((lambda - center) / width).powi(2)).exp();
    [
        lobe(600.0, 50.0) * 4.51,
        lobe(550.0, 45.0) * 5.01,
        lobe(450.0, 40.0) * 5.64,
    ]
}

/// Sky radiance towards a direction with vertical component `up`
fn sky(lambda: f32, up: f32) -> f32 {
    let blue = 1.0 - smoothstep(400.0, 700.0, lambda);
    0.6 + 0.4 * up.clamp(0.0, 1.0) * (0.5 + blue)
}

/// Radiance of the fixed key light used without environment lighting
const KEY_LIGHT: [f32; 3] = [0.408, 0.816, -0.408];

/// Trace one pixel and return its RGB estimate
pub(crate) fn trace_pixel(
    hit: [f32; 4],
    view: [f32; 3],
    transport: &Transport,
    x: u32,
    y: u32,
    frame: u64,
) -> [f32; 4] {
    let wavelengths = transport.wavelengths.max(1);
    let offset = random(x, y, frame, 0);
    let mut rgb = [0.0f32; 3];

    for i in 0..wavelengths {
        let u = (i as f32 + offset) / wavelengths as f32;
        let lambda = LAMBDA_MIN + (LAMBDA_MAX - LAMBDA_MIN) * u;
        let radiance = match Surface::from_hit(hit) {
            None if transport.env_lights => sky(lambda, view[1]),
            None => 0.0,
            Some(surface) => radiance(&surface, lambda, transport, x, y, frame, i),
        };
        let weights = wavelength_to_rgb(lambda);
        for c in 0..3 {
            rgb[c] += radiance * weights[c] / wavelengths as f32;
        }
    }
    [rgb[0], rgb[1], rgb[2], 1.0]
}

fn radiance(
    surface: &Surface,
    lambda: f32,
    transport: &Transport,
    x: u32,
    y: u32,
    frame: u64,
    lane: u32,
) -> f32 {
    let reflectance = surface.reflectance(lambda);
    let direct = if transport.env_lights {
        sky(lambda, surface.normal[1])
    } else {
        let n = surface.normal;
        2.0 * (n[0] * KEY_LIGHT[0] + n[1] * KEY_LIGHT[1] + n[2] * KEY_LIGHT[2]).max(0.0)
    };

    let mut throughput = reflectance;
    let mut total = 0.0;
    for bounce in 0..=transport.max_bounces {
        let stream = 1 + lane * 64 + bounce * 2;
        let cosine = random(x, y, frame, stream).sqrt();
        total += throughput * direct * cosine * 2.0 / (bounce as f32 + 1.0);

        throughput *= reflectance * 0.5;
        if transport.russian_roulette && bounce >= 2 {
            let survive = throughput.min(0.95);
            if random(x, y, frame, stream + 1) >= survive {
                break;
            }
            throughput /= survive;
        }
    }
    total
}

/// Option schema
pub fn schema() -> ConfigSchema {
    ConfigSchema::new()
        .option(OptionSpec::int("maxBounces", 1, 0, 128).describe("Maximum indirect bounces"))
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
            ]
        },
        |config| Box::new(TinySpectralPathTracer::new(config)),
    )
    .with_description("Hero wavelength spectral path tracer")
    .with_schema(schema())
}

/// Spectral path tracer stage
#[derive(Debug)]
pub struct TinySpectralPathTracer {
    transport: Transport,
}

impl TinySpectralPathTracer {
    /// Create the stage from a resolved configuration
    pub fn new(config: &StageConfig) -> Self {
        Self {
            transport: Self::transport(config),
        }
    }

    fn transport(config: &StageConfig) -> Transport {
        Transport {
            max_bounces: config.get_int("maxBounces").map_or(1, |n| n.max(0) as u32),
            wavelengths: HERO_WAVELENGTHS,
            env_lights: true,
            russian_roulette: false,
        }
    }
}

impl RenderStage for TinySpectralPathTracer {
    fn reconfigure(&mut self, config: &StageConfig) -> Result<(), StageError> {
        self.transport = Self::transport(config);
        Ok(())
    }

    fn execute(&mut self, ctx: &mut StageContext<'_>) -> Result<(), StageError> {
        let vbuffer = ctx.texture("vbuffer")?;
        let view = ctx.optional_texture("viewW");
        let frame = ctx.frame().index;

        let color = shade(vbuffer, view, |hit, dir, x, y| {
            trace_pixel(hit, dir, &self.transport, x, y, frame)
        })?;
        ctx.set_texture("color", color)
    }
}

/// Apply `shader` to every texel of a visibility buffer
pub(crate) fn shade(
    vbuffer: &Texture,
    view: Option<&Texture>,
    mut shader: impl FnMut([f32; 4], [f32; 3], u32, u32) -> [f32; 4],
) -> Result<Texture, StageError> {
    if !vbuffer.is_well_formed() {
        return Err(StageError::MalformedTexture {
            port: "vbuffer".to_string(),
            width: vbuffer.width,
            height: vbuffer.height,
            pixels: vbuffer.pixels.len(),
        });
    }
    if let Some(view) = view {
        if !view.same_size(vbuffer) || !view.is_well_formed() {
            return Err(StageError::Failed(format!(
                "viewW is {}x{} with {} pixels, vbuffer is {}x{}",
                view.width,
                view.height,
                view.pixels.len(),
                vbuffer.width,
                vbuffer.height
            )));
        }
    }

    let width = vbuffer.width.max(1);
    let mut color = Texture::filled(vbuffer.width, vbuffer.height, [0.0; 4]);
    for (index, (out, hit)) in color.pixels.iter_mut().zip(&vbuffer.pixels).enumerate() {
        let dir = view
            .and_then(|v| v.pixels.get(index))
            .map_or([0.0, 0.0, 1.0], |p| [p[0], p[1], p[2]]);
        let (x, y) = (index as u32 % width, index as u32 / width);
        *out = shader(*hit, dir, x, y);
    }
    Ok(color)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::Resource;
    use crate::stage::FrameInfo;

    fn transport(max_bounces: u32) -> Transport {
        Transport {
            max_bounces,
            wavelengths: HERO_WAVELENGTHS,
            env_lights: true,
            russian_roulette: false,
        }
    }

    #[test]
    fn test_white_point() {
        let steps = 400;
        let mut rgb = [0.0f32; 3];
        for step in 0..steps {
            let lambda = LAMBDA_MIN + (LAMBDA_MAX - LAMBDA_MIN) * (step as f32 + 0.5) / steps as f32;
            let weights = wavelength_to_rgb(lambda);
            for c in 0..3 {
                rgb[c] += weights[c] / steps as f32;
            }
        }
        for channel in rgb {
            assert!((channel - 1.0).abs() < 0.05, "{rgb:?}");
        }
    }

    #[test]
    fn test_sphere_albedo_is_orange() {
        let sphere = Surface::from_hit([instance::SPHERE, 0.0, 0.0, 0.7]).unwrap();
        let albedo = sphere.albedo();
        assert!(albedo[0] > albedo[1] && albedo[1] > albedo[2]);
        assert!(Surface::from_hit([instance::MISS, 0.0, 0.0, 0.0]).is_none());
    }

    #[test]
    fn test_more_bounces_add_light() {
        let hit = [instance::GROUND, 0.7, 0.7, 2.0];
        let view = [0.0, -0.3, 0.95];
        let direct = trace_pixel(hit, view, &transport(0), 3, 4, 0);
        let indirect = trace_pixel(hit, view, &transport(4), 3, 4, 0);
        assert!(indirect[1] > direct[1]);
        assert_eq!(direct[3], 1.0);
    }

    #[test]
    fn test_execute_requires_vbuffer() {
        let frame = FrameInfo {
            index: 0,
            width: 2,
            height: 2,
        };
        let ports = stage_type().reflect(&StageConfig::new());
        let mut stage = TinySpectralPathTracer::new(&StageConfig::new());

        let mut ctx = StageContext::new(&frame, vec![("vbuffer", None), ("viewW", None)], &ports);
        assert_eq!(
            stage.execute(&mut ctx),
            Err(StageError::MissingInput("vbuffer".into()))
        );

        let vbuffer = Resource::Texture(Texture::filled(2, 2, [instance::SPHERE, 0.0, 0.0, 0.7]));
        let mut ctx = StageContext::new(&frame, vec![("vbuffer", Some(&vbuffer))], &ports);
        stage.execute(&mut ctx).unwrap();
        let outputs = ctx.into_outputs();
        let color = outputs["color"].as_texture().unwrap();
        assert_eq!((color.width, color.height), (2, 2));
        assert!(color.pixels.iter().all(|p| p[0] > 0.0));
    }

    #[test]
    fn test_mismatched_view_size_fails() {
        let vbuffer = Texture::filled(2, 2, [0.0; 4]);
        let view = Texture::filled(3, 2, [0.0; 4]);
        assert!(matches!(
            shade(&vbuffer, Some(&view), |hit, _, _, _| hit),
            Err(StageError::Failed(_))
        ));
    }

    #[test]
    fn test_malformed_buffers_fail() {
        let short = Texture {
            width: 2,
            height: 2,
            pixels: vec![[0.0; 4]; 3],
        };
        let vbuffer = Texture::filled(2, 2, [0.0; 4]);
        assert!(matches!(
            shade(&short, None, |hit, _, _, _| hit),
            Err(StageError::MalformedTexture { pixels: 3, .. })
        ));
        assert!(matches!(
            shade(&vbuffer, Some(&short), |hit, _, _, _| hit),
            Err(StageError::Failed(_))
        ));

        let mut coords = Vec::new();
        shade(&vbuffer, None, |hit, _, x, y| {
            coords.push((x, y));
            hit
        })
        .unwrap();
        assert_eq!(coords, [(0, 0), (1, 0), (0, 1), (1, 1)]);
    }
}
