// SPDX-License-Identifier: MIT OR Apache-2.0
//! Building, validating and scheduling graphs through the public API.

mod common;

use common::{add, chain, registry};
use spectra_graph::{
    Graph, InputSource, PortDirection, PortRef, RegistryError, ResourceType, StageConfig, StagePlugin,
    StageRegistry, StageType, TopologyError, PLUGIN_API_VERSION,
};

#[test]
fn test_chain_schedule_follows_dependencies() {
    let (registry, _) = registry();
    let graph = chain(&registry);
    let schedule = graph.validate().unwrap();
    assert_eq!(schedule.order(), vec!["G", "P", "A", "T"]);
    assert!(schedule.depends_on("T", "G"));
    assert!(!schedule.depends_on("G", "T"));
}

#[test]
fn test_schedule_ignores_insertion_order_for_dependent_stages() {
    let (registry, _) = registry();
    let mut graph = Graph::new("Reversed");
    for name in ["T", "A", "P", "G"] {
        add(&mut graph, &registry, name, name);
    }
    graph.add_edge("A.output", "T.src").unwrap();
    graph.add_edge("G.vbuffer", "P.vbuffer").unwrap();
    graph.add_edge("G.viewW", "P.viewW").unwrap();
    graph.add_edge("P.color", "A.input").unwrap();
    graph.mark_output("T.dst").unwrap();

    let schedule = graph.validate().unwrap();
    assert_eq!(schedule.order(), vec!["G", "P", "A", "T"]);
}

#[test]
fn test_edge_to_unknown_stage_is_rejected_without_side_effects() {
    let (registry, _) = registry();
    let mut graph = chain(&registry);
    let before = graph.edges().to_vec();

    assert_eq!(
        graph.add_edge("Missing.color", "T.src"),
        Err(TopologyError::UnknownStage("Missing".to_string()))
    );
    assert_eq!(
        graph.add_edge("P.color", "Nowhere.input"),
        Err(TopologyError::UnknownStage("Nowhere".to_string()))
    );
    assert_eq!(graph.edges(), before.as_slice());
}

#[test]
fn test_edge_rejections_are_classified() {
    let (registry, _) = registry();
    let mut graph = chain(&registry);

    assert_eq!(
        graph.add_edge("P.nope", "A.input"),
        Err(TopologyError::UnknownPort(PortRef::new("P", "nope")))
    );
    // Endpoint types are checked before the existing binding.
    assert_eq!(
        graph.add_edge("G.vbuffer", "A.input"),
        Err(TopologyError::TypeMismatch {
            src: PortRef::new("G", "vbuffer"),
            src_type: ResourceType::VisibilityBuffer,
            dst: PortRef::new("A", "input"),
            dst_type: ResourceType::ColorBuffer,
        })
    );
    assert_eq!(
        graph.add_edge("A.input", "T.src"),
        Err(TopologyError::WrongPortDirection {
            port: PortRef::new("A", "input"),
            expected: PortDirection::Output,
        })
    );
    assert_eq!(
        graph.add_edge("P.color", "A.input"),
        Err(TopologyError::InputAlreadyBound {
            port: PortRef::new("A", "input"),
            producer: PortRef::new("P", "color"),
        })
    );
    assert!(matches!(
        graph.add_edge("Pcolor", "A.input"),
        Err(TopologyError::MalformedPortSpec(_))
    ));
    assert_eq!(graph.edges().len(), 4);
}

#[test]
fn test_removing_missing_edge_is_rejected() {
    let (registry, _) = registry();
    let mut graph = chain(&registry);
    graph.compile().unwrap();
    let before = graph.edges().to_vec();

    assert_eq!(
        graph.remove_edge("G.vbuffer", "T.src"),
        Err(TopologyError::UnknownEdge {
            src: PortRef::new("G", "vbuffer"),
            dst: PortRef::new("T", "src"),
        })
    );
    assert_eq!(graph.edges(), before.as_slice());
    assert!(graph.is_compiled());

    let removed = graph.remove_edge("A.output", "T.src").unwrap();
    assert_eq!(removed.dst, PortRef::new("T", "src"));
    assert_eq!(graph.edges().len(), 3);
    assert_eq!(
        graph.remove_edge("A.output", "T.src"),
        Err(TopologyError::UnknownEdge {
            src: PortRef::new("A", "output"),
            dst: PortRef::new("T", "src"),
        })
    );
}

#[test]
fn test_feedback_edge_reports_cycle() {
    let (registry, _) = registry();
    let mut graph = Graph::new("Feedback");
    for name in ["G", "P", "A"] {
        add(&mut graph, &registry, name, name);
    }
    graph.add_edge("G.vbuffer", "P.vbuffer").unwrap();
    graph.add_edge("P.color", "A.input").unwrap();
    graph.add_edge("A.output", "P.feedback").unwrap();
    graph.mark_output("A.output").unwrap();

    assert_eq!(
        graph.validate(),
        Err(TopologyError::CycleDetected {
            stages: vec!["P".to_string(), "A".to_string()],
        })
    );
    assert!(graph.compile().is_err());
    assert!(!graph.is_compiled());
}

#[test]
fn test_cycle_takes_precedence_over_unbound_inputs() {
    let (registry, _) = registry();
    let mut graph = Graph::new("Both");
    for name in ["P", "A"] {
        add(&mut graph, &registry, name, name);
    }
    // P.vbuffer stays unbound.
    graph.add_edge("P.color", "A.input").unwrap();
    graph.add_edge("A.output", "P.feedback").unwrap();

    assert!(matches!(
        graph.validate(),
        Err(TopologyError::CycleDetected { .. })
    ));
}

#[test]
fn test_validation_errors() {
    let (registry, _) = registry();
    let mut graph = Graph::new("Incomplete");
    add(&mut graph, &registry, "A", "A");
    assert_eq!(
        graph.validate(),
        Err(TopologyError::UnboundInput {
            stage: "A".to_string(),
            port: "input".to_string(),
        })
    );

    let mut graph = Graph::new("Unmarked");
    add(&mut graph, &registry, "G", "G");
    assert_eq!(graph.validate(), Err(TopologyError::NoMarkedOutput));

    graph.mark_output("G.vbuffer").unwrap();
    assert_eq!(graph.validate().unwrap().order(), vec!["G"]);
}

#[test]
fn test_output_marking_rules() {
    let (registry, _) = registry();
    let mut graph = chain(&registry);
    graph.compile().unwrap();
    let generation = graph.generation();

    graph.mark_output("T.dst").unwrap();
    assert_eq!(graph.generation(), generation);
    assert!(graph.is_compiled());

    assert_eq!(
        graph.mark_output("T.src"),
        Err(TopologyError::WrongPortDirection {
            port: PortRef::new("T", "src"),
            expected: PortDirection::Output,
        })
    );
    assert_eq!(
        graph.mark_output("T.missing"),
        Err(TopologyError::UnknownPort(PortRef::new("T", "missing")))
    );

    graph.mark_output("A.output").unwrap();
    assert_eq!(graph.marked_outputs().count(), 2);
    assert!(!graph.is_compiled());
    assert_eq!(graph.unmark_output("A.output"), Ok(true));
    assert_eq!(graph.unmark_output("A.output"), Ok(false));
}

#[test]
fn test_independent_stages_keep_insertion_order() {
    let (registry, _) = registry();
    let mut graph = Graph::new("Pair");
    add(&mut graph, &registry, "G", "X");
    add(&mut graph, &registry, "G", "Y");
    graph.mark_output("X.vbuffer").unwrap();
    graph.mark_output("Y.vbuffer").unwrap();

    let schedule = graph.validate().unwrap();
    assert_eq!(schedule.order(), vec!["X", "Y"]);
    assert!(schedule.independent("X", "Y"));
}

#[test]
fn test_validate_is_idempotent() {
    let (registry, _) = registry();
    let mut graph = chain(&registry);
    let first = graph.validate().unwrap();
    let second = graph.validate().unwrap();
    assert_eq!(first, second);

    let compiled = graph.compile().unwrap().clone();
    assert_eq!(compiled.order(), first.order());
    assert_eq!(graph.compile().unwrap(), &compiled);
}

#[test]
fn test_optional_inputs_resolve_to_absent() {
    let (registry, _) = registry();
    let mut graph = chain(&registry);
    graph.compile().unwrap();

    let bindings = graph.input_bindings("P").unwrap();
    let source = |port: &str| {
        bindings
            .iter()
            .find(|binding| binding.port == port)
            .map(|binding| binding.source.clone())
    };
    assert_eq!(
        source("vbuffer"),
        Some(InputSource::Edge(PortRef::new("G", "vbuffer")))
    );
    assert_eq!(source("feedback"), Some(InputSource::Absent));
    assert!(graph.input_bindings("Missing").is_none());
}

/// Pseudo-random sequences of building calls never leave the graph in an
/// unclassified state: every call either succeeds or reports a
/// [`TopologyError`], and a rejected edge leaves the edge set untouched.
#[test]
fn test_random_construction_is_always_classified() {
    let (registry, _) = registry();
    let types = ["G", "P", "A", "T"];
    let ports = [
        "vbuffer", "viewW", "color", "feedback", "input", "output", "src", "dst",
    ];
    let mut state: u64 = 0x2545_f491_4f6c_dd1d;
    let mut next = move |bound: usize| {
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        (state % bound as u64) as usize
    };

    for round in 0..20 {
        let mut graph = Graph::new(format!("Random{round}"));
        for _ in 0..40 {
            let stage = format!("S{}", next(6));
            match next(4) {
                0 => {
                    let stage_type = types[next(types.len())];
                    let created = registry
                        .create_stage(stage_type, &StageConfig::new())
                        .unwrap();
                    let _ = graph.add_stage(created, stage);
                }
                1 => {
                    let before = graph.edges().to_vec();
                    let src = format!("{stage}.{}", ports[next(ports.len())]);
                    let dst = format!("S{}.{}", next(6), ports[next(ports.len())]);
                    if graph.add_edge(&src, &dst).is_err() {
                        assert_eq!(graph.edges(), before.as_slice());
                    }
                }
                2 => {
                    let _ = graph.mark_output(&format!("{stage}.{}", ports[next(ports.len())]));
                }
                _ => {
                    graph.remove_stage(&stage);
                }
            }
            let first = graph.validate();
            assert_eq!(first, graph.validate());
            if let Ok(schedule) = first {
                assert_eq!(schedule.len(), graph.stage_count());
            }
        }
    }
}

struct VersionedPlugin {
    version: u32,
}

impl StagePlugin for VersionedPlugin {
    fn name(&self) -> &str {
        "Versioned"
    }

    fn api_version(&self) -> u32 {
        self.version
    }

    fn register(&self, registry: &mut StageRegistry) -> Result<(), RegistryError> {
        registry.register(StageType::new("Extra", |_| Vec::new(), |_| unreachable!()))
    }
}

#[test]
fn test_plugin_version_mismatch_registers_nothing() {
    let (mut registry, _) = registry();
    let before: Vec<String> = registry.type_names().map(str::to_string).collect();

    let error = registry
        .load_plugin(&VersionedPlugin {
            version: PLUGIN_API_VERSION + 1,
        })
        .unwrap_err();
    assert!(matches!(error, RegistryError::IncompatiblePlugin { .. }));
    let after: Vec<String> = registry.type_names().map(str::to_string).collect();
    assert_eq!(before, after);
    assert!(registry.plugins().is_empty());

    registry
        .load_plugin(&VersionedPlugin {
            version: PLUGIN_API_VERSION,
        })
        .unwrap();
    assert!(registry.contains("Extra"));
    assert_eq!(registry.plugins(), ["Versioned".to_string()]);
}
