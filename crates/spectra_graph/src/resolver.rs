// SPDX-License-Identifier: MIT OR Apache-2.0
//! Resource resolution: matching output ports to input ports.
//!
//! Edge checks run when an edge is added, so a graph never holds an edge
//! between incompatible ports. At validation the resolver also computes, for
//! every stage, where each input's value comes from during a frame.

use crate::edge::PortRef;
use crate::port::{PortDirection, Resource};
use crate::topology::{PortLayout, Topology, TopologyError};

/// Where an input port reads its value from
#[derive(Debug, Clone, PartialEq)]
pub enum InputSource {
    /// The value produced by an upstream output in the same frame
    Edge(PortRef),
    /// The port's declared default
    Default(Resource),
    /// Nothing; the input is optional and unbound
    Absent,
}

/// Effective binding of one input port
#[derive(Debug, Clone, PartialEq)]
pub struct InputBinding {
    /// Input port name
    pub port: String,
    /// Value source
    pub source: InputSource,
}

/// Check that `src -> dst` may be added to `topology`
pub(crate) fn check_edge<S: PortLayout>(
    topology: &Topology<S>,
    src: &PortRef,
    dst: &PortRef,
) -> Result<(), TopologyError> {
    check_endpoints(topology, src, dst)?;

    if let Some(existing) = topology.incoming(&dst.stage, &dst.port) {
        return Err(TopologyError::InputAlreadyBound {
            port: dst.clone(),
            producer: existing.src.clone(),
        });
    }
    Ok(())
}

/// Check direction and type compatibility of both endpoints
pub(crate) fn check_endpoints<S: PortLayout>(
    topology: &Topology<S>,
    src: &PortRef,
    dst: &PortRef,
) -> Result<(), TopologyError> {
    let src_stage = topology
        .stage(&src.stage)
        .ok_or_else(|| TopologyError::UnknownStage(src.stage.clone()))?;
    let dst_stage = topology
        .stage(&dst.stage)
        .ok_or_else(|| TopologyError::UnknownStage(dst.stage.clone()))?;

    let src_port = src_stage
        .port(&src.port)
        .ok_or_else(|| TopologyError::UnknownPort(src.clone()))?;
    let dst_port = dst_stage
        .port(&dst.port)
        .ok_or_else(|| TopologyError::UnknownPort(dst.clone()))?;

    if !src_port.is_output() {
        return Err(TopologyError::WrongPortDirection {
            port: src.clone(),
            expected: PortDirection::Output,
        });
    }
    if !dst_port.is_input() {
        return Err(TopologyError::WrongPortDirection {
            port: dst.clone(),
            expected: PortDirection::Input,
        });
    }
    if src_port.resource_type != dst_port.resource_type {
        return Err(TopologyError::TypeMismatch {
            src: src.clone(),
            src_type: src_port.resource_type,
            dst: dst.clone(),
            dst_type: dst_port.resource_type,
        });
    }
    Ok(())
}

/// Compute the input bindings of every stage, indexed like the stage map
pub(crate) fn resolve_bindings<S: PortLayout>(topology: &Topology<S>) -> Vec<Vec<InputBinding>> {
    topology
        .stages
        .iter()
        .map(|(name, stage)| {
            stage
                .ports()
                .iter()
                .filter(|port| port.is_input())
                .map(|port| {
                    let source = match topology.incoming(name, &port.name) {
                        Some(edge) => InputSource::Edge(edge.src.clone()),
                        None => match &port.default_value {
                            Some(value) => InputSource::Default(value.clone()),
                            None => InputSource::Absent,
                        },
                    };
                    InputBinding {
                        port: port.name.clone(),
                        source,
                    }
                })
                .collect()
        })
        .collect()
}

/// Output ports each stage must produce: those consumed by an edge or marked
pub(crate) fn required_outputs<S: PortLayout>(topology: &Topology<S>) -> Vec<Vec<String>> {
    topology
        .stages
        .iter()
        .map(|(name, stage)| {
            stage
                .ports()
                .iter()
                .filter(|port| port.is_output())
                .filter(|port| {
                    let consumed = topology
                        .edges
                        .iter()
                        .any(|e| e.src.stage == *name && e.src.port == port.name);
                    let marked = topology
                        .outputs
                        .iter()
                        .any(|o| o.stage == *name && o.port == port.name);
                    consumed || marked
                })
                .map(|port| port.name.clone())
                .collect()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::{PortDesc, ResourceType};

    fn topology() -> Topology<Vec<PortDesc>> {
        let mut topology = Topology::new();
        topology
            .add_stage(
                "G".into(),
                vec![
                    PortDesc::output("vbuffer", ResourceType::VisibilityBuffer),
                    PortDesc::output("viewW", ResourceType::VectorBuffer),
                ],
            )
            .unwrap();
        topology
            .add_stage(
                "P".into(),
                vec![
                    PortDesc::input("vbuffer", ResourceType::VisibilityBuffer),
                    PortDesc::input("viewW", ResourceType::VectorBuffer).optional(),
                    PortDesc::input("scale", ResourceType::Scalar)
                        .with_default(Resource::Scalar(1.0)),
                    PortDesc::output("color", ResourceType::ColorBuffer),
                ],
            )
            .unwrap();
        topology
    }

    fn port(spec: &str) -> PortRef {
        PortRef::parse(spec).unwrap()
    }

    #[test]
    fn test_edge_checks() {
        let topology = topology();
        assert!(check_edge(&topology, &port("G.vbuffer"), &port("P.vbuffer")).is_ok());

        assert_eq!(
            check_edge(&topology, &port("X.vbuffer"), &port("P.vbuffer")),
            Err(TopologyError::UnknownStage("X".into()))
        );
        assert_eq!(
            check_edge(&topology, &port("G.depth"), &port("P.vbuffer")),
            Err(TopologyError::UnknownPort(port("G.depth")))
        );
        assert_eq!(
            check_edge(&topology, &port("P.vbuffer"), &port("P.viewW")),
            Err(TopologyError::WrongPortDirection {
                port: port("P.vbuffer"),
                expected: PortDirection::Output
            })
        );
        assert_eq!(
            check_edge(&topology, &port("G.vbuffer"), &port("P.color")),
            Err(TopologyError::WrongPortDirection {
                port: port("P.color"),
                expected: PortDirection::Input
            })
        );
        assert!(matches!(
            check_edge(&topology, &port("G.viewW"), &port("P.vbuffer")),
            Err(TopologyError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_single_producer_per_input() {
        let mut topology = topology();
        topology.add_edge(port("G.vbuffer"), port("P.vbuffer")).unwrap();
        assert_eq!(
            check_edge(&topology, &port("G.vbuffer"), &port("P.vbuffer")),
            Err(TopologyError::InputAlreadyBound {
                port: port("P.vbuffer"),
                producer: port("G.vbuffer")
            })
        );
    }

    #[test]
    fn test_bindings() {
        let mut topology = topology();
        topology.add_edge(port("G.vbuffer"), port("P.vbuffer")).unwrap();

        let bindings = resolve_bindings(&topology);
        assert!(bindings[0].is_empty());
        assert_eq!(
            bindings[1],
            vec![
                InputBinding {
                    port: "vbuffer".into(),
                    source: InputSource::Edge(port("G.vbuffer")),
                },
                InputBinding {
                    port: "viewW".into(),
                    source: InputSource::Absent,
                },
                InputBinding {
                    port: "scale".into(),
                    source: InputSource::Default(Resource::Scalar(1.0)),
                },
            ]
        );
    }

    #[test]
    fn test_required_outputs() {
        let mut topology = topology();
        topology.add_edge(port("G.vbuffer"), port("P.vbuffer")).unwrap();
        topology.mark_output(port("P.color")).unwrap();

        let required = required_outputs(&topology);
        assert_eq!(required[0], vec!["vbuffer".to_string()]);
        assert_eq!(required[1], vec!["color".to_string()]);
    }
}
