use std::collections::BTreeMap;
use std::f32::consts::TAU;
use std::fmt;

use glam::Vec3;

use crate::graph::{Graph, GraphError, NodeId, NodeKind};
use crate::value::{DType, Value};

#[derive(Debug, Clone, PartialEq)]
pub enum EvalError {
    UnsetInput {
        node: NodeId,
        name: String,
    },
    LaneOutOfRange {
        node: NodeId,
        input: usize,
        lane: usize,
        dtype: DType,
    },
    DTypeMismatch {
        node: NodeId,
        expected: DType,
        actual: DType,
    },
    Function {
        node: NodeId,
        message: String,
    },
    NonFiniteInput {
        node: NodeId,
        value: f32,
    },
    Graph(GraphError),
}

impl From<GraphError> for EvalError {
    fn from(err: GraphError) -> Self {
        EvalError::Graph(err)
    }
}

impl fmt::Display for EvalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvalError::UnsetInput { node, name } => {
                write!(f, "input '{name}' ({node}) read before it was set")
            }
            EvalError::LaneOutOfRange {
                node,
                input,
                lane,
                dtype,
            } => write!(
                f,
                "node {node} reads lane {lane} of input {input}, which is a {dtype}"
            ),
            EvalError::DTypeMismatch {
                node,
                expected,
                actual,
            } => write!(f, "node {node} expected {expected}, got {actual}"),
            EvalError::Function { node, message } => write!(f, "node {node}: {message}"),
            EvalError::NonFiniteInput { node, value } => {
                write!(f, "node {node} cannot blend non-finite input {value}")
            }
            EvalError::Graph(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for EvalError {}

/// Evaluates `root` and everything upstream of it, upstream first.
///
/// `results` is shared between calls within one pass, so a node reached from
/// several roots is computed once per pass.
pub fn evaluate_node(
    graph: &mut Graph,
    root: NodeId,
    results: &mut BTreeMap<NodeId, Value>,
) -> Result<Value, EvalError> {
    for node_id in graph.topo_sort_from(root)? {
        if results.contains_key(&node_id) {
            continue;
        }
        let value = compute_node(graph, node_id, results)?;
        results.insert(node_id, value);
    }
    results
        .get(&root)
        .copied()
        .ok_or(EvalError::Graph(GraphError::MissingNode(root)))
}

fn compute_node(
    graph: &mut Graph,
    node_id: NodeId,
    results: &BTreeMap<NodeId, Value>,
) -> Result<Value, EvalError> {
    let node = graph
        .node_mut(node_id)
        .ok_or(GraphError::MissingNode(node_id))?;
    let mut inputs = Vec::new();
    for input in node.inputs() {
        let value = results
            .get(&input)
            .copied()
            .ok_or(GraphError::MissingNode(input))?;
        inputs.push(value);
    }
    let dtype_out = node.dtype_out;
    // Slots hold whatever was set; readers report the mismatch.
    let is_input = matches!(node.kind, NodeKind::Input { .. });

    let value = match &mut node.kind {
        NodeKind::Constant { value } => *value,
        NodeKind::Input { name, value, .. } => (*value).ok_or_else(|| EvalError::UnsetInput {
            node: node_id,
            name: name.clone(),
        })?,
        NodeKind::Function { func, .. } => func
            .call(&inputs)
            .map_err(|message| EvalError::Function {
                node: node_id,
                message,
            })?,
        NodeKind::Connect { connectivity, .. } => {
            let mut lanes = Vec::with_capacity(connectivity.len());
            for (input, lane) in connectivity.iter().copied() {
                let source = inputs
                    .get(input)
                    .ok_or(GraphError::InvalidConnection { input, lane })?;
                let value = source.lane(lane).ok_or(EvalError::LaneOutOfRange {
                    node: node_id,
                    input,
                    lane,
                    dtype: source.dtype(),
                })?;
                lanes.push(value);
            }
            Value::from_lanes(&lanes).ok_or(GraphError::InvalidConnectivity(lanes.len()))?
        }
        NodeKind::PolarY { .. } => match inputs[0] {
            Value::Vec3(coord) => polar_y(coord).into(),
            other => return Err(mismatch(node_id, DType::Vec3, other)),
        },
        NodeKind::Random { sampler, .. } => Value::Scalar(sampler.sample(inputs[0].key())),
        NodeKind::Blend { blend, .. } => match inputs[0] {
            Value::Scalar(x) if !x.is_finite() => {
                return Err(EvalError::NonFiniteInput {
                    node: node_id,
                    value: x,
                })
            }
            Value::Scalar(x) => Value::Scalar(blend.eval(x)),
            other => return Err(mismatch(node_id, DType::Scalar, other)),
        },
        NodeKind::Multiply { .. } => multiply(node_id, inputs[0], inputs[1])?,
    };

    if !is_input && value.dtype() != dtype_out {
        return Err(mismatch(node_id, dtype_out, value));
    }
    Ok(value)
}

/// `(u, v, r)` onto a surface of revolution around the y axis.
fn polar_y(coord: Vec3) -> Vec3 {
    let angle = TAU * coord.x;
    Vec3::new(angle.sin() * coord.z, coord.y, angle.cos() * coord.z)
}

fn multiply(node_id: NodeId, a: Value, b: Value) -> Result<Value, EvalError> {
    let value = match (a, b) {
        (Value::Scalar(a), Value::Scalar(b)) => Value::Scalar(a * b),
        (Value::Vec2(a), Value::Vec2(b)) => Value::Vec2(a * b),
        (Value::Vec3(a), Value::Vec3(b)) => Value::Vec3(a * b),
        (Value::Vec4(a), Value::Vec4(b)) => Value::Vec4(a * b),
        (Value::Scalar(s), Value::Vec2(v)) | (Value::Vec2(v), Value::Scalar(s)) => {
            Value::Vec2(v * s)
        }
        (Value::Scalar(s), Value::Vec3(v)) | (Value::Vec3(v), Value::Scalar(s)) => {
            Value::Vec3(v * s)
        }
        (Value::Scalar(s), Value::Vec4(v)) | (Value::Vec4(v), Value::Scalar(s)) => {
            Value::Vec4(v * s)
        }
        (a, b) => return Err(mismatch(node_id, a.dtype(), b)),
    };
    Ok(value)
}

fn mismatch(node: NodeId, expected: DType, actual: Value) -> EvalError {
    EvalError::DTypeMismatch {
        node,
        expected,
        actual: actual.dtype(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blend::BlendFunction;
    use glam::{Vec2, Vec4};

    fn eval(graph: &mut Graph, root: NodeId) -> Result<Value, EvalError> {
        evaluate_node(graph, root, &mut BTreeMap::new())
    }

    #[test]
    fn connect_identity_swizzles() {
        let mut graph = Graph::default();
        let t = graph.add_constant(Value::Scalar(0.75));
        let xy = graph.add_constant(Value::Vec2(Vec2::new(0.2, 0.4)));
        let same_t = graph.add_connect(&[(0, 0)], &[t]).unwrap();
        let same_xy = graph.add_connect(&[(0, 0), (0, 1)], &[xy]).unwrap();
        assert_eq!(eval(&mut graph, same_t).unwrap(), Value::Scalar(0.75));
        assert_eq!(
            eval(&mut graph, same_xy).unwrap(),
            Value::Vec2(Vec2::new(0.2, 0.4))
        );
    }

    #[test]
    fn connect_reorders_inputs() {
        let mut graph = Graph::default();
        let five = graph.add_constant(Value::Scalar(5.0));
        let nine = graph.add_constant(Value::Scalar(9.0));
        let swapped = graph.add_connect(&[(1, 0), (0, 0)], &[five, nine]).unwrap();
        assert_eq!(
            eval(&mut graph, swapped).unwrap(),
            Value::Vec2(Vec2::new(9.0, 5.0))
        );
    }

    #[test]
    fn connect_broadcasts_lanes() {
        let mut graph = Graph::default();
        let xy = graph.add_constant(Value::Vec2(Vec2::new(0.25, 0.5)));
        let one = graph.add_constant(Value::Scalar(1.0));
        let rgba = graph
            .add_connect(&[(0, 1), (0, 1), (0, 0), (1, 0)], &[xy, one])
            .unwrap();
        assert_eq!(
            eval(&mut graph, rgba).unwrap(),
            Value::Vec4(Vec4::new(0.5, 0.5, 0.25, 1.0))
        );
    }

    #[test]
    fn runtime_lane_out_of_range_is_reported() {
        let mut graph = Graph::default();
        let xy = graph.add_input("xy", DType::Vec2);
        let y = graph.add_connect(&[(0, 1)], &[xy]).unwrap();
        graph.set_input_value(xy, Some(Value::Scalar(0.3))).unwrap();
        let err = eval(&mut graph, y).unwrap_err();
        assert_eq!(
            err,
            EvalError::LaneOutOfRange {
                node: y,
                input: 0,
                lane: 1,
                dtype: DType::Scalar,
            }
        );
    }

    #[test]
    fn unset_input_fails_loudly() {
        let mut graph = Graph::default();
        let t = graph.add_input("t", DType::Scalar);
        let blend = graph
            .add_blend(vec![(0.0, BlendFunction::linear(0.0, 1.0))], t)
            .unwrap();
        let err = eval(&mut graph, blend).unwrap_err();
        assert!(matches!(err, EvalError::UnsetInput { node, ref name } if node == t && name == "t"));
    }

    #[test]
    fn blend_rejects_non_finite_input() {
        let mut graph = Graph::default();
        let t = graph.add_input("t", DType::Scalar);
        let blend = graph
            .add_blend(vec![(0.0, BlendFunction::linear(0.1, 0.9))], t)
            .unwrap();

        for bad in [f32::NAN, f32::INFINITY, f32::NEG_INFINITY] {
            graph.set_input_value(t, Some(Value::Scalar(bad))).unwrap();
            assert!(matches!(
                eval(&mut graph, blend),
                Err(EvalError::NonFiniteInput { node, .. }) if node == blend
            ));
        }

        graph.set_input_value(t, Some(Value::Scalar(-0.25))).unwrap();
        let below = eval(&mut graph, blend).unwrap().as_scalar().unwrap();
        assert!(below.is_finite());
        assert!((below - (0.1 - 0.25 * 0.8)).abs() < 1e-6);
    }

    #[test]
    fn wrong_slot_type_is_reported_by_the_reader() {
        let mut graph = Graph::default();
        let uvr = graph.add_input("uvr", DType::Vec3);
        let r = graph.add_connect(&[(0, 2)], &[uvr]).unwrap();
        graph
            .set_input_value(uvr, Some(Value::Vec2(Vec2::ONE)))
            .unwrap();
        assert!(matches!(
            eval(&mut graph, r),
            Err(EvalError::LaneOutOfRange { node, input: 0, lane: 2, dtype: DType::Vec2 }) if node == r
        ));
    }

    #[test]
    fn polar_y_wraps_around_y_axis() {
        let mut graph = Graph::default();
        let quarter = graph.add_constant(Value::Vec3(Vec3::new(0.25, 0.5, 2.0)));
        let start = graph.add_constant(Value::Vec3(Vec3::new(0.0, 0.1, 1.0)));
        let a = graph.add_polar_y(quarter).unwrap();
        let b = graph.add_polar_y(start).unwrap();

        let Value::Vec3(a) = eval(&mut graph, a).unwrap() else {
            panic!("expected vec3");
        };
        assert!((a - Vec3::new(2.0, 0.5, 0.0)).length() < 1e-5);
        let Value::Vec3(b) = eval(&mut graph, b).unwrap() else {
            panic!("expected vec3");
        };
        assert!((b - Vec3::new(0.0, 0.1, 1.0)).length() < 1e-6);
    }

    #[test]
    fn polar_y_rejects_wrong_runtime_type() {
        let mut graph = Graph::default();
        let uvr = graph.add_input("uvr", DType::Vec3);
        let polar = graph.add_polar_y(uvr).unwrap();
        graph
            .set_input_value(uvr, Some(Value::Vec2(Vec2::ONE)))
            .unwrap();
        assert!(matches!(
            eval(&mut graph, polar),
            Err(EvalError::DTypeMismatch { expected: DType::Vec3, actual: DType::Vec2, .. })
        ));
    }

    #[test]
    fn random_is_memoized_per_key() {
        let mut graph = Graph::default();
        let t = graph.add_input("t", DType::Scalar);
        let noise = graph.add_random_seeded(t, 1).unwrap();

        graph.set_input_value(t, Some(Value::Scalar(0.1))).unwrap();
        let a = eval(&mut graph, noise).unwrap();
        graph.set_input_value(t, Some(Value::Scalar(0.2))).unwrap();
        let b = eval(&mut graph, noise).unwrap();
        graph.set_input_value(t, Some(Value::Scalar(0.1))).unwrap();
        let again = eval(&mut graph, noise).unwrap();

        assert_eq!(a, again);
        assert_ne!(a, b);
        assert_eq!(graph.random_cache_len(noise), Some(2));
    }

    #[test]
    fn distinct_random_nodes_are_independent() {
        let mut graph = Graph::default();
        let t = graph.add_input("t", DType::Scalar);
        let first = graph.add_random_seeded(t, 1).unwrap();
        let second = graph.add_random_seeded(t, 2).unwrap();
        graph.set_input_value(t, Some(Value::Scalar(0.5))).unwrap();
        assert_ne!(
            eval(&mut graph, first).unwrap(),
            eval(&mut graph, second).unwrap()
        );
    }

    #[test]
    fn multiply_broadcasts_scalars() {
        let mut graph = Graph::default();
        let two = graph.add_constant(Value::Scalar(2.0));
        let three = graph.add_constant(Value::Scalar(3.0));
        let v = graph.add_constant(Value::Vec3(Vec3::new(1.0, 2.0, 3.0)));
        let scalar = graph.add_multiply(two, three).unwrap();
        let scaled = graph.add_multiply(v, two).unwrap();
        let squared = graph.add_multiply(v, v).unwrap();
        assert_eq!(eval(&mut graph, scalar).unwrap(), Value::Scalar(6.0));
        assert_eq!(
            eval(&mut graph, scaled).unwrap(),
            Value::Vec3(Vec3::new(2.0, 4.0, 6.0))
        );
        assert_eq!(
            eval(&mut graph, squared).unwrap(),
            Value::Vec3(Vec3::new(1.0, 4.0, 9.0))
        );
    }

    #[test]
    fn function_nodes_check_their_output() {
        let mut graph = Graph::default();
        let t = graph.add_constant(Value::Scalar(0.5));
        let band = graph
            .add_function("band", &[t], DType::Scalar, |inputs| {
                let x = inputs[0].as_scalar().ok_or("band needs a scalar")?;
                Ok(Value::Scalar(0.95 + x * 0.05))
            })
            .unwrap();
        let wrong = graph
            .add_function("wrong", &[t], DType::Scalar, |_| Ok(Value::Vec2(Vec2::ZERO)))
            .unwrap();
        let failing = graph
            .add_function("failing", &[], DType::Scalar, |_| Err("boom".to_string()))
            .unwrap();

        let banded = eval(&mut graph, band).unwrap().as_scalar().unwrap();
        assert!((banded - 0.975).abs() < 1e-6);
        assert!(matches!(
            eval(&mut graph, wrong),
            Err(EvalError::DTypeMismatch { .. })
        ));
        assert_eq!(
            eval(&mut graph, failing).unwrap_err(),
            EvalError::Function {
                node: failing,
                message: "boom".to_string(),
            }
        );
    }

    #[test]
    fn shared_nodes_evaluate_once_per_pass() {
        let mut graph = Graph::default();
        let t = graph.add_input("t", DType::Scalar);
        let noise = graph.add_random_seeded(t, 9).unwrap();
        let pair = graph.add_connect(&[(0, 0), (1, 0)], &[noise, noise]).unwrap();
        graph.set_input_value(t, Some(Value::Scalar(0.3))).unwrap();

        let mut results = BTreeMap::new();
        let Value::Vec2(pair_value) = evaluate_node(&mut graph, pair, &mut results).unwrap() else {
            panic!("expected vec2");
        };
        assert_eq!(pair_value.x, pair_value.y);
        assert_eq!(results[&noise], Value::Scalar(pair_value.x));
    }
}
