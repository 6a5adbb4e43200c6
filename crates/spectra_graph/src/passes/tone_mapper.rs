// SPDX-License-Identifier: MIT OR Apache-2.0
//! Tone mapping pass: HDR color to displayable `[0, 1]` color.

use super::luminance;
use crate::config::{ConfigSchema, OptionSpec, StageConfig};
use crate::port::{PortDesc, ResourceType, Texture};
use crate::registry::StageType;
use crate::stage::{RenderStage, StageContext, StageError};

/// Registered type name
pub const TYPE_NAME: &str = "ToneMapper";

/// Middle gray targeted by auto exposure
const KEY_VALUE: f32 = 0.18;

/// Tone curve
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ToneMapOperator {
    /// Clamp only
    Linear,
    /// `x / (1 + x)`
    Reinhard,
    /// ACES filmic fit
    #[default]
    Aces,
}

impl ToneMapOperator {
    /// Option variant names
    pub const NAMES: &'static [&'static str] = &["Linear", "Reinhard", "Aces"];

    /// Parse a variant name
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "Linear" => Some(Self::Linear),
            "Reinhard" => Some(Self::Reinhard),
            "Aces" => Some(Self::Aces),
            _ => None,
        }
    }

    /// Map one exposed channel value
    pub fn apply(self, x: f32) -> f32 {
        let x = x.max(0.0);
        let mapped = match self {
            Self::Linear => x,
            Self::Reinhard => x / (1.0 + x),
            Self::Aces => (x * (2.51 * x + 0.03)) / (x * (2.43 * x + 0.59) + 0.14),
        };
        mapped.clamp(0.0, 1.0)
    }
}

/// Validated options of a [`ToneMapper`] stage
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ToneMapParams {
    /// Derive exposure from the image's average luminance
    pub auto_exposure: bool,
    /// Exposure adjustment in stops
    pub exposure_compensation: f32,
    /// Tone curve
    pub operator: ToneMapOperator,
}

impl ToneMapParams {
    /// Read options from a resolved configuration
    pub fn from_config(config: &StageConfig) -> Self {
        Self {
            auto_exposure: config.get_bool("autoExposure").unwrap_or(false),
            exposure_compensation: config.get_float("exposureCompensation").unwrap_or(0.0) as f32,
            operator: config
                .get_enum("operator")
                .and_then(ToneMapOperator::from_name)
                .unwrap_or_default(),
        }
    }
}

/// Option schema
pub fn schema() -> ConfigSchema {
    ConfigSchema::new()
        .option(OptionSpec::bool("autoExposure", false).describe("Expose for average luminance"))
        .option(
            OptionSpec::float("exposureCompensation", 0.0, -12.0, 12.0)
                .describe("Exposure adjustment in stops"),
        )
        .option(OptionSpec::choice("operator", ToneMapOperator::NAMES, "Aces").describe("Tone curve"))
}

/// Registry entry
pub fn stage_type() -> StageType {
    StageType::new(
        TYPE_NAME,
        |_| {
            vec![
                PortDesc::input("src", ResourceType::ColorBuffer),
                PortDesc::output("dst", ResourceType::ColorBuffer),
            ]
        },
        |config| Box::new(ToneMapper::new(ToneMapParams::from_config(config))),
    )
    .with_description("Exposure and tone curve")
    .with_schema(schema())
}

/// Tone mapping stage
#[derive(Debug)]
pub struct ToneMapper {
    params: ToneMapParams,
}

impl ToneMapper {
    /// Create the stage
    pub fn new(params: ToneMapParams) -> Self {
        Self { params }
    }

    /// Linear exposure scale for an image
    pub fn exposure(&self, image: &Texture) -> f32 {
        let compensation = self.params.exposure_compensation.exp2();
        if !self.params.auto_exposure || image.pixels.is_empty() {
            return compensation;
        }
        let log_sum: f32 = image
            .pixels
            .iter()
            .map(|p| (luminance(*p).max(0.0) + 1e-4).ln())
            .sum();
        let average = (log_sum / image.pixels.len() as f32).exp();
        KEY_VALUE / average * compensation
    }
}

impl RenderStage for ToneMapper {
    fn reconfigure(&mut self, config: &StageConfig) -> Result<(), StageError> {
        self.params = ToneMapParams::from_config(config);
        Ok(())
    }

    fn execute(&mut self, ctx: &mut StageContext<'_>) -> Result<(), StageError> {
        let src = ctx.texture("src")?;
        let exposure = self.exposure(src);
        let operator = self.params.operator;

        let mut dst = Texture::filled(src.width, src.height, [0.0, 0.0, 0.0, 1.0]);
        for (out, p) in dst.pixels.iter_mut().zip(&src.pixels) {
            *out = [
                operator.apply(p[0] * exposure),
                operator.apply(p[1] * exposure),
                operator.apply(p[2] * exposure),
                1.0,
            ];
        }
        ctx.set_texture("dst", dst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapper(config: StageConfig) -> ToneMapper {
        let config = schema().resolve(TYPE_NAME, &config).unwrap();
        ToneMapper::new(ToneMapParams::from_config(&config))
    }

    #[test]
    fn test_operators_clamp() {
        for name in ToneMapOperator::NAMES {
            let operator = ToneMapOperator::from_name(name).unwrap();
            assert_eq!(operator.apply(-1.0), 0.0);
            assert!(operator.apply(1000.0) <= 1.0);
            assert!(operator.apply(0.5) > operator.apply(0.25));
        }
        assert_eq!(ToneMapOperator::Reinhard.apply(1.0), 0.5);
    }

    #[test]
    fn test_exposure_compensation() {
        let image = Texture::filled(1, 1, [1.0; 4]);
        assert_eq!(mapper(StageConfig::new()).exposure(&image), 1.0);
        let boosted = mapper(StageConfig::new().with("exposureCompensation", 2)).exposure(&image);
        assert!((boosted - 4.0).abs() < 1e-5);
    }

    #[test]
    fn test_auto_exposure_targets_middle_gray() {
        let mapper = mapper(StageConfig::new().with("autoExposure", true));
        let bright = Texture::filled(2, 2, [8.0, 8.0, 8.0, 1.0]);
        let dark = Texture::filled(2, 2, [0.5, 0.5, 0.5, 1.0]);

        let scaled = 8.0 * mapper.exposure(&bright);
        assert!((scaled - KEY_VALUE).abs() < 1e-3);
        assert!(mapper.exposure(&dark) > mapper.exposure(&bright));
    }
}
