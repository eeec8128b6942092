use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::blend::BlendFunction;
use crate::env::{CompEnv, EnvError};
use crate::graph::{Graph, GraphError, NodeId};
use crate::sampler::SampleSettings;
use crate::value::{DType, Value};

/// JSON description of a computation environment plus the grid it is
/// sampled over. Nodes may only reference nodes listed before them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    #[serde(default)]
    pub nodes: Vec<PlanNode>,
    #[serde(default)]
    pub functions: Vec<PlanFunction>,
    #[serde(default)]
    pub outputs: Vec<String>,
    #[serde(default)]
    pub settings: SampleSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanNode {
    pub name: String,
    #[serde(flatten)]
    pub kind: PlanNodeKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PlanNodeKind {
    Constant {
        value: PlanValue,
    },
    /// `slot` defaults to the node name.
    Input {
        #[serde(default)]
        slot: Option<String>,
        dtype: DType,
    },
    Connect {
        inputs: Vec<String>,
        connectivity: Vec<(usize, usize)>,
    },
    PolarY {
        input: String,
    },
    Random {
        input: String,
        #[serde(default)]
        seed: Option<u64>,
    },
    Blend {
        input: String,
        segments: Vec<PlanSegment>,
    },
    Multiply {
        a: String,
        b: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PlanValue {
    Scalar(f32),
    Lanes(Vec<f32>),
}

impl PlanValue {
    fn lanes(&self) -> Vec<f32> {
        match self {
            PlanValue::Scalar(value) => vec![*value],
            PlanValue::Lanes(lanes) => lanes.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanSegment {
    pub at: f32,
    pub function: BlendFunction,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanFunction {
    pub name: String,
    pub node: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PlanError {
    Json(String),
    DuplicateNode(String),
    UnknownNode { node: String, reference: String },
    InvalidValue { node: String, lanes: usize },
    Graph { node: String, error: GraphError },
    Env(EnvError),
}

impl From<EnvError> for PlanError {
    fn from(err: EnvError) -> Self {
        PlanError::Env(err)
    }
}

impl fmt::Display for PlanError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlanError::Json(message) => write!(f, "invalid plan: {message}"),
            PlanError::DuplicateNode(name) => write!(f, "node '{name}' is defined twice"),
            PlanError::UnknownNode { node, reference } => {
                write!(f, "'{node}' references unknown node '{reference}'")
            }
            PlanError::InvalidValue { node, lanes } => {
                write!(f, "constant '{node}' has {lanes} lanes, expected 1 to 4")
            }
            PlanError::Graph { node, error } => write!(f, "node '{node}': {error}"),
            PlanError::Env(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for PlanError {}

impl Plan {
    pub fn from_json(json: &str) -> Result<Self, PlanError> {
        serde_json::from_str(json).map_err(|err| PlanError::Json(err.to_string()))
    }

    pub fn to_json(&self) -> Result<String, PlanError> {
        serde_json::to_string_pretty(self).map_err(|err| PlanError::Json(err.to_string()))
    }

    /// Builds the graph node by node and wraps it in an environment. An empty
    /// output list exposes every function.
    pub fn build(&self) -> Result<CompEnv, PlanError> {
        let mut graph = Graph::default();
        let mut ids: HashMap<&str, NodeId> = HashMap::new();

        for node in &self.nodes {
            if ids.contains_key(node.name.as_str()) {
                return Err(PlanError::DuplicateNode(node.name.clone()));
            }
            let name = node.name.as_str();
            let added = match &node.kind {
                PlanNodeKind::Constant { value } => {
                    let lanes = value.lanes();
                    let value = Value::from_lanes(&lanes).ok_or(PlanError::InvalidValue {
                        node: node.name.clone(),
                        lanes: lanes.len(),
                    })?;
                    Ok(graph.add_constant(value))
                }
                PlanNodeKind::Input { slot, dtype } => {
                    let slot = slot.clone().unwrap_or_else(|| node.name.clone());
                    Ok(graph.add_input(slot, *dtype))
                }
                PlanNodeKind::Connect {
                    inputs,
                    connectivity,
                } => {
                    let inputs = inputs
                        .iter()
                        .map(|reference| resolve(&ids, name, reference))
                        .collect::<Result<Vec<_>, _>>()?;
                    graph.add_connect(connectivity, &inputs)
                }
                PlanNodeKind::PolarY { input } => {
                    graph.add_polar_y(resolve(&ids, name, input)?)
                }
                PlanNodeKind::Random { input, seed } => {
                    let input = resolve(&ids, name, input)?;
                    match seed {
                        Some(seed) => graph.add_random_seeded(input, *seed),
                        None => graph.add_random(input),
                    }
                }
                PlanNodeKind::Blend { input, segments } => {
                    let input = resolve(&ids, name, input)?;
                    let segments = segments
                        .iter()
                        .map(|segment| (segment.at, segment.function.clone()))
                        .collect();
                    graph.add_blend(segments, input)
                }
                PlanNodeKind::Multiply { a, b } => {
                    let a = resolve(&ids, name, a)?;
                    let b = resolve(&ids, name, b)?;
                    graph.add_multiply(a, b)
                }
            };
            let id = added.map_err(|error| PlanError::Graph {
                node: node.name.clone(),
                error,
            })?;
            ids.insert(name, id);
        }

        let funcs = self
            .functions
            .iter()
            .map(|func| {
                resolve(&ids, &func.name, &func.node).map(|id| (func.name.clone(), id))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let outputs = if self.outputs.is_empty() {
            warn!(
                "plan lists no outputs, exposing all {} functions",
                funcs.len()
            );
            None
        } else {
            Some(self.outputs.clone())
        };

        debug!(
            "plan built {} nodes and {} functions",
            ids.len(),
            funcs.len()
        );
        Ok(CompEnv::new(graph, funcs, outputs)?)
    }
}

fn resolve(ids: &HashMap<&str, NodeId>, node: &str, reference: &str) -> Result<NodeId, PlanError> {
    ids.get(reference)
        .copied()
        .ok_or_else(|| PlanError::UnknownNode {
            node: node.to_string(),
            reference: reference.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::{Vec2, Vec4};

    const BARK_PLAN: &str = r#"{
        "nodes": [
            { "name": "xy", "kind": "input", "dtype": "vec2" },
            { "name": "x", "kind": "connect", "inputs": ["xy"], "connectivity": [[0, 0]] },
            { "name": "y", "kind": "connect", "inputs": ["xy"], "connectivity": [[0, 1]] },
            { "name": "radius", "kind": "blend", "input": "y", "segments": [
                { "at": 0.0, "function": { "linear": { "zero": 0.1, "one": 0.1 } } },
                { "at": 0.5, "function": { "linear": { "zero": 0.1, "one": 0.9 } } }
            ] },
            { "name": "uvr", "kind": "connect", "inputs": ["xy", "radius"],
              "connectivity": [[0, 0], [0, 1], [1, 0]] },
            { "name": "vertex", "kind": "polar_y", "input": "uvr" },
            { "name": "height", "kind": "random", "input": "x", "seed": 11 },
            { "name": "zero", "kind": "constant", "value": 0.0 },
            { "name": "one", "kind": "constant", "value": 1.0 },
            { "name": "color", "kind": "connect", "inputs": ["height", "zero", "one"],
              "connectivity": [[2, 0], [1, 0], [0, 0], [2, 0]] }
        ],
        "functions": [
            { "name": "vertex", "node": "vertex" },
            { "name": "color", "node": "color" },
            { "name": "radius", "node": "radius" }
        ],
        "outputs": ["vertex", "color"],
        "settings": { "segments": [8, 4], "wrap_x": true }
    }"#;

    #[test]
    fn builds_and_computes() {
        let plan = Plan::from_json(BARK_PLAN).unwrap();
        assert_eq!(plan.settings.segments, [8, 4]);
        assert!(plan.settings.wrap_x);
        assert_eq!(plan.settings.input, "xy");

        let mut env = plan.build().unwrap();
        assert_eq!(env.outputs(), ["vertex".to_string(), "color".to_string()]);
        assert_eq!(env.dtype_out("color"), Some(DType::Vec4));
        assert_eq!(env.dtype_out("radius"), Some(DType::Scalar));

        env.set_value("xy", Value::Vec2(Vec2::new(0.25, 0.75)));
        env.compute().unwrap();
        let radius = env.value("radius").and_then(|v| v.as_scalar()).unwrap();
        assert!((radius - 0.5).abs() < 1e-6);
        let Some(Value::Vec4(color)) = env.value("color") else {
            panic!("color should be vec4");
        };
        assert_eq!((color.x, color.y, color.w), (1.0, 0.0, 1.0));
        assert!((0.0..1.0).contains(&color.z));
    }

    #[test]
    fn json_round_trip_keeps_plan() {
        let plan = Plan::from_json(BARK_PLAN).unwrap();
        let again = Plan::from_json(&plan.to_json().unwrap()).unwrap();
        assert_eq!(plan, again);
    }

    #[test]
    fn empty_plan_uses_defaults() {
        let plan = Plan::from_json("{}").unwrap();
        assert_eq!(plan.settings, SampleSettings::default());
        let env = plan.build().unwrap();
        assert!(env.outputs().is_empty());
    }

    #[test]
    fn missing_outputs_expose_every_function() {
        let plan = Plan::from_json(
            r#"{
                "nodes": [
                    { "name": "t", "kind": "input", "slot": "time", "dtype": "scalar" },
                    { "name": "tint", "kind": "constant", "value": [0.5, 0.5, 0.5, 1.0] },
                    { "name": "shade", "kind": "multiply", "a": "t", "b": "tint" }
                ],
                "functions": [
                    { "name": "shade", "node": "shade" },
                    { "name": "time_out", "node": "t" }
                ]
            }"#,
        )
        .unwrap();
        let mut env = plan.build().unwrap();
        assert_eq!(env.outputs(), ["shade".to_string(), "time_out".to_string()]);

        env.set_value("time", Value::Scalar(2.0));
        env.compute().unwrap();
        assert_eq!(env.value("shade"), Some(Value::Vec4(Vec4::new(1.0, 1.0, 1.0, 2.0))));
    }

    #[test]
    fn reports_bad_references() {
        let duplicate = Plan::from_json(
            r#"{ "nodes": [
                { "name": "a", "kind": "constant", "value": 1.0 },
                { "name": "a", "kind": "constant", "value": 2.0 }
            ] }"#,
        )
        .unwrap();
        assert_eq!(
            duplicate.build().unwrap_err(),
            PlanError::DuplicateNode("a".to_string())
        );

        let forward = Plan::from_json(
            r#"{ "nodes": [
                { "name": "p", "kind": "polar_y", "input": "v" },
                { "name": "v", "kind": "constant", "value": [0.0, 0.0, 1.0] }
            ] }"#,
        )
        .unwrap();
        assert_eq!(
            forward.build().unwrap_err(),
            PlanError::UnknownNode {
                node: "p".to_string(),
                reference: "v".to_string()
            }
        );

        let function = Plan::from_json(r#"{ "functions": [{ "name": "f", "node": "nope" }] }"#)
            .unwrap();
        assert!(matches!(
            function.build(),
            Err(PlanError::UnknownNode { ref reference, .. }) if reference == "nope"
        ));
    }

    #[test]
    fn reports_invalid_nodes() {
        let wide = Plan::from_json(
            r#"{ "nodes": [{ "name": "c", "kind": "constant", "value": [1, 2, 3, 4, 5] }] }"#,
        )
        .unwrap();
        assert_eq!(
            wide.build().unwrap_err(),
            PlanError::InvalidValue {
                node: "c".to_string(),
                lanes: 5
            }
        );

        let lane = Plan::from_json(
            r#"{ "nodes": [
                { "name": "s", "kind": "constant", "value": 1.0 },
                { "name": "c", "kind": "connect", "inputs": ["s"], "connectivity": [[0, 1]] }
            ] }"#,
        )
        .unwrap();
        assert!(matches!(
            lane.build(),
            Err(PlanError::Graph { ref node, error: GraphError::InvalidConnection { input: 0, lane: 1 } })
                if node == "c"
        ));

        let collision = Plan::from_json(
            r#"{
                "nodes": [{ "name": "xy", "kind": "input", "dtype": "vec2" }],
                "functions": [{ "name": "xy", "node": "xy" }]
            }"#,
        )
        .unwrap();
        assert!(matches!(
            collision.build(),
            Err(PlanError::Env(EnvError::NameCollision { .. }))
        ));

        assert!(matches!(
            Plan::from_json(r#"{ "nodes": [{ "name": "n", "kind": "sine" }] }"#),
            Err(PlanError::Json(_))
        ));
    }
}
