// SPDX-License-Identifier: MIT OR Apache-2.0
//! Shipped render pipelines.
//!
//! Each pipeline exists twice: as a setup function using the builder API and
//! as a RON description under `pipelines/`. Both produce the same graph.

use crate::config::StageConfig;
use crate::desc::{DescError, GraphDesc};
use crate::graph::Graph;
use crate::manager::{GraphManager, HostError};
use crate::registry::StageRegistry;

/// Built-in pipeline descriptions by graph name
const BUILTIN: &[(&str, &str)] = &[
    ("ReSTIRPLTPT", include_str!("../pipelines/restir_plt_pt.ron")),
    (
        "TinySpectralPathTracer",
        include_str!("../pipelines/tiny_spectral_path_tracer.ron"),
    ),
];

/// Names of the built-in pipelines
pub fn builtin_names() -> impl Iterator<Item = &'static str> {
    BUILTIN.iter().map(|(name, _)| *name)
}

/// Load a built-in pipeline description
pub fn builtin(name: &str) -> Result<GraphDesc, DescError> {
    let (_, source) = BUILTIN
        .iter()
        .find(|(builtin, _)| *builtin == name)
        .ok_or_else(|| DescError::UnknownPipeline(name.to_string()))?;
    GraphDesc::from_ron(source)
}

fn gbuffer_config() -> StageConfig {
    StageConfig::new()
        .with("samplePattern", "Halton")
        .with("sampleCount", 16)
        .with("useAlphaTest", true)
}

/// ReSTIR path tracer without denoiser
pub fn restir_plt_pt(registry: &StageRegistry) -> Result<Graph, DescError> {
    let mut g = Graph::new("ReSTIRPLTPT");

    let restir = registry.create_stage("ReSTIRPLTPT", &StageConfig::new())?;
    g.add_stage(restir, "ReSTIRPLTPT")?;

    let gbuffer = registry.create_stage("GBufferRT", &gbuffer_config())?;
    g.add_stage(gbuffer, "GBufferRT")?;

    let accumulate = registry.create_stage(
        "AccumulatePass",
        &StageConfig::new()
            .with("enabled", true)
            .with("precisionMode", "Double"),
    )?;
    g.add_stage(accumulate, "AccumulatePass")?;

    let tone_mapper = registry.create_stage(
        "ToneMapper",
        &StageConfig::new()
            .with("autoExposure", true)
            .with("exposureCompensation", 0.0),
    )?;
    g.add_stage(tone_mapper, "ToneMapper")?;

    g.add_edge("ReSTIRPLTPT.color", "AccumulatePass.input")?;

    g.add_edge("GBufferRT.vbuffer", "ReSTIRPLTPT.vbuffer")?;
    g.add_edge("GBufferRT.viewW", "ReSTIRPLTPT.viewW")?;

    g.add_edge("AccumulatePass.output", "ToneMapper.src")?;

    g.mark_output("ToneMapper.dst")?;
    Ok(g)
}

/// Spectral path tracer with accumulation
pub fn tiny_spectral_path_tracer(registry: &StageRegistry) -> Result<Graph, DescError> {
    let mut g = Graph::new("TinySpectralPathTracer");

    let accumulate = registry.create_stage(
        "AccumulatePass",
        &StageConfig::new()
            .with("enabled", true)
            .with("precisionMode", "Single"),
    )?;
    g.add_stage(accumulate, "AccumulatePass")?;

    let tone_mapper = registry.create_stage(
        "ToneMapper",
        &StageConfig::new()
            .with("autoExposure", false)
            .with("exposureCompensation", 0.0),
    )?;
    g.add_stage(tone_mapper, "ToneMapper")?;

    let tracer = registry.create_stage(
        "TinySpectralPathTracer",
        &StageConfig::new().with("maxBounces", 3),
    )?;
    g.add_stage(tracer, "TinySpectralPathTracer")?;

    let gbuffer = registry.create_stage("GBufferRT", &gbuffer_config())?;
    g.add_stage(gbuffer, "GBufferRT")?;

    g.add_edge("AccumulatePass.output", "ToneMapper.src")?;
    g.add_edge("GBufferRT.vbuffer", "TinySpectralPathTracer.vbuffer")?;
    g.add_edge("GBufferRT.viewW", "TinySpectralPathTracer.viewW")?;
    g.add_edge("TinySpectralPathTracer.color", "AccumulatePass.input")?;
    g.mark_output("ToneMapper.dst")?;
    Ok(g)
}

/// Register `graph` with the host, if there is one.
///
/// Without a host the graph is handed back unchanged.
pub fn install(graph: Graph, host: Option<&mut GraphManager>) -> Result<Option<Graph>, HostError> {
    match host {
        Some(manager) => {
            manager.add_graph(graph)?;
            Ok(None)
        }
        None => {
            tracing::debug!(graph = %graph.name(), "No host, returning graph");
            Ok(Some(graph))
        }
    }
}
