// SPDX-License-Identifier: MIT OR Apache-2.0
//! Standard render passes.
//!
//! CPU implementations of the passes used by the shipped pipelines. They
//! render a small analytic scene so graphs can be exercised and captured
//! without a GPU.

pub mod accumulate;
pub mod gbuffer;
pub mod path_tracer;
pub mod restir;
pub mod tone_mapper;

use crate::registry::{RegistryError, StagePlugin, StageRegistry};

pub use accumulate::{AccumulatePass, AccumulatePrecision};
pub use gbuffer::{GBufferRT, SamplePattern};
pub use path_tracer::TinySpectralPathTracer;
pub use restir::ReSTIRPLTPT;
pub use tone_mapper::{ToneMapOperator, ToneMapper};

/// Plugin registering every standard pass
#[derive(Debug, Default, Clone, Copy)]
pub struct StandardPasses;

impl StagePlugin for StandardPasses {
    fn name(&self) -> &str {
        "StandardPasses"
    }

    fn register(&self, registry: &mut StageRegistry) -> Result<(), RegistryError> {
        registry.register(gbuffer::stage_type())?;
        registry.register(path_tracer::stage_type())?;
        registry.register(restir::stage_type())?;
        registry.register(accumulate::stage_type())?;
        registry.register(tone_mapper::stage_type())
    }
}

/// Create a registry with the standard passes loaded
pub fn standard_registry() -> Result<StageRegistry, RegistryError> {
    let mut registry = StageRegistry::new();
    registry.load_plugin(&StandardPasses)?;
    Ok(registry)
}

// ============================================================================
// Shared helpers
// ============================================================================

/// Deterministic hash of a pixel, frame and stream to `[0, 1)`
pub(crate) fn random(x: u32, y: u32, frame: u64, stream: u32) -> f32 {
    let mut h = x.wrapping_mul(0x8da6_b343)
        ^ y.wrapping_mul(0xd816_3841)
        ^ (frame as u32).wrapping_mul(0xcb1a_b31f)
        ^ stream.wrapping_mul(0x2545_f491);
    // PCG output permutation
    h = h.wrapping_mul(747_796_405).wrapping_add(2_891_336_453);
    h = ((h >> ((h >> 28) + 4)) ^ h).wrapping_mul(277_803_737);
    h = (h >> 22) ^ h;
    (h >> 8) as f32 / (1u32 << 24) as f32
}

/// Rec. 709 luminance
pub(crate) fn luminance(color: [f32; 4]) -> f32 {
    0.2126 * color[0] + 0.7152 * color[1] + 0.0722 * color[2]
}
