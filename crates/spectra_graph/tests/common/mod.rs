// SPDX-License-Identifier: MIT OR Apache-2.0
//! Probe stage types shared by the integration tests.
//!
//! Every probe passes a single value through its buffers so tests can follow
//! data through a graph, and counts creations, preparations and executions.

#![allow(dead_code, missing_docs)]

use spectra_graph::{
    ConfigSchema, FrameInfo, OptionSpec, PortDesc, RenderStage, Resource, ResourceType,
    StageConfig, StageContext, StageError, StageRegistry, StageType, Texture,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Debug, Default)]
pub struct Counters {
    pub created: AtomicUsize,
    pub prepared: AtomicUsize,
    pub executed: AtomicUsize,
}

impl Counters {
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn prepared(&self) -> usize {
        self.prepared.load(Ordering::SeqCst)
    }

    pub fn executed(&self) -> usize {
        self.executed.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy)]
enum Role {
    GBuffer,
    Tracer,
    Accumulate,
    ToneMap,
    Fail,
    Silent,
}

struct Probe {
    role: Role,
    scale: f32,
    fail_at: i64,
    counters: Arc<Counters>,
}

impl Probe {
    fn configure(&mut self, config: &StageConfig) {
        self.scale = config.get_float("scale").unwrap_or(1.0) as f32;
        self.fail_at = config.get_int("failAt").unwrap_or(-1);
    }
}

fn value(texture: &Texture) -> f32 {
    texture.pixels.first().map_or(0.0, |p| p[0])
}

fn filled(frame: &FrameInfo, value: f32) -> Texture {
    Texture::filled(frame.width, frame.height, [value, value, value, 1.0])
}

impl RenderStage for Probe {
    fn prepare(&mut self, _frame: &FrameInfo) -> Result<(), StageError> {
        self.counters.prepared.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn reconfigure(&mut self, config: &StageConfig) -> Result<(), StageError> {
        self.configure(config);
        Ok(())
    }

    fn execute(&mut self, ctx: &mut StageContext<'_>) -> Result<(), StageError> {
        self.counters.executed.fetch_add(1, Ordering::SeqCst);
        let frame = *ctx.frame();
        match self.role {
            Role::GBuffer => {
                let base = frame.index as f32 + 1.0;
                ctx.set_texture("vbuffer", filled(&frame, base * self.scale))?;
                ctx.set_texture("viewW", filled(&frame, 0.0))
            }
            Role::Tracer => {
                let vbuffer = value(ctx.texture("vbuffer")?);
                ctx.set_texture("color", filled(&frame, vbuffer * self.scale))
            }
            Role::Accumulate => {
                let input = value(ctx.texture("input")?);
                ctx.set_texture("output", filled(&frame, input * self.scale))
            }
            Role::ToneMap => {
                let src = value(ctx.texture("src")?);
                ctx.set_texture("dst", filled(&frame, src * self.scale))
            }
            Role::Fail => {
                if frame.index as i64 == self.fail_at {
                    return Err(StageError::Failed(format!("failing at frame {}", frame.index)));
                }
                let src = value(ctx.texture("src")?);
                ctx.set_texture("dst", filled(&frame, src))
            }
            Role::Silent => ctx.texture("src").map(|_| ()),
        }
    }
}

fn ports(role: Role) -> Vec<PortDesc> {
    match role {
        Role::GBuffer => vec![
            PortDesc::output("vbuffer", ResourceType::VisibilityBuffer),
            PortDesc::output("viewW", ResourceType::VectorBuffer),
        ],
        Role::Tracer => vec![
            PortDesc::input("vbuffer", ResourceType::VisibilityBuffer),
            PortDesc::input("viewW", ResourceType::VectorBuffer).optional(),
            PortDesc::input("feedback", ResourceType::ColorBuffer).optional(),
            PortDesc::output("color", ResourceType::ColorBuffer),
        ],
        Role::Accumulate => vec![
            PortDesc::input("input", ResourceType::ColorBuffer),
            PortDesc::output("output", ResourceType::ColorBuffer),
        ],
        Role::ToneMap | Role::Fail | Role::Silent => vec![
            PortDesc::input("src", ResourceType::ColorBuffer),
            PortDesc::output("dst", ResourceType::ColorBuffer),
        ],
    }
}

fn probe_type(name: &str, role: Role, counters: &Arc<Counters>) -> StageType {
    let counters = Arc::clone(counters);
    StageType::new(
        name,
        move |_| ports(role),
        move |config| {
            counters.created.fetch_add(1, Ordering::SeqCst);
            let mut probe = Probe {
                role,
                scale: 1.0,
                fail_at: -1,
                counters: Arc::clone(&counters),
            };
            probe.configure(config);
            Box::new(probe)
        },
    )
    .with_schema(
        ConfigSchema::new()
            .option(OptionSpec::float("scale", 1.0, 0.0, 100.0))
            .option(OptionSpec::int("failAt", -1, -1, 1_000_000)),
    )
}

/// Registry with the probe types `G`, `P`, `A`, `T`, `Fail` and `Silent`.
///
/// `Silent` reads its input but never writes `dst`.
pub fn registry() -> (StageRegistry, Arc<Counters>) {
    let counters = Arc::new(Counters::default());
    let mut registry = StageRegistry::new();
    for (name, role) in [
        ("G", Role::GBuffer),
        ("P", Role::Tracer),
        ("A", Role::Accumulate),
        ("T", Role::ToneMap),
        ("Fail", Role::Fail),
        ("Silent", Role::Silent),
    ] {
        registry
            .register(probe_type(name, role, &counters))
            .expect("probe types register");
    }
    (registry, counters)
}

/// Add a stage of type `stage_type` named `name` with default options
pub fn add(graph: &mut spectra_graph::Graph, registry: &StageRegistry, stage_type: &str, name: &str) {
    let stage = registry
        .create_stage(stage_type, &StageConfig::new())
        .expect("probe stage creation");
    graph.add_stage(stage, name).expect("unique instance name");
}

/// The G -> P -> A -> T chain with `T.dst` marked
pub fn chain(registry: &StageRegistry) -> spectra_graph::Graph {
    let mut graph = spectra_graph::Graph::new("Chain");
    for name in ["G", "P", "A", "T"] {
        add(&mut graph, registry, name, name);
    }
    graph.add_edge("G.vbuffer", "P.vbuffer").unwrap();
    graph.add_edge("G.viewW", "P.viewW").unwrap();
    graph.add_edge("P.color", "A.input").unwrap();
    graph.add_edge("A.output", "T.src").unwrap();
    graph.mark_output("T.dst").unwrap();
    graph
}

/// First channel of the first pixel of a texture resource
pub fn sample(resource: Option<&Resource>) -> Option<f32> {
    resource
        .and_then(Resource::as_texture)
        .and_then(|t| t.pixels.first())
        .map(|p| p[0])
}
