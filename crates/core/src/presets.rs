//! Ready-made environments sampled over the unit square `xy`.

use crate::blend::BlendFunction;
use crate::env::{CompEnv, EnvError};
use crate::graph::{Graph, GraphError, NodeId};
use crate::value::{DType, Value};

pub const PRESET_NAMES: [&str; 2] = ["bark", "rough_bark"];

/// Looks a preset up by name.
pub fn by_name(name: &str, seed: Option<u64>) -> Option<Result<CompEnv, EnvError>> {
    match name {
        "bark" => Some(bark_surface(seed)),
        "rough_bark" => Some(rough_bark(seed)),
        _ => None,
    }
}

/// Tree trunk: `vertex` wraps the square around the y axis with a radius
/// profile along y, `color` is red with a per-column blue noise.
pub fn bark_surface(seed: Option<u64>) -> Result<CompEnv, EnvError> {
    let mut graph = Graph::default();
    let bark = BarkNodes::add(&mut graph, seed)?;
    let vertex = trunk_vertex(&mut graph, bark.xy, bark.tree_radius)?;
    let color = bark_color(&mut graph, bark.heightmap)?;
    CompEnv::new(
        graph,
        vec![("vertex".to_string(), vertex), ("color".to_string(), color)],
        None,
    )
}

/// [`bark_surface`] with the radius pushed inwards by up to 5% of the noise.
pub fn rough_bark(seed: Option<u64>) -> Result<CompEnv, EnvError> {
    let mut graph = Graph::default();
    let bark = BarkNodes::add(&mut graph, seed)?;
    let flat_bark = graph.add_function("band", &[bark.heightmap], DType::Scalar, |inputs| {
        match inputs {
            [Value::Scalar(h)] => Ok(Value::Scalar(band(0.95, 1.0, *h))),
            other => Err(format!("band takes one scalar, got {other:?}")),
        }
    })?;
    let radius = graph.add_multiply(flat_bark, bark.tree_radius)?;
    let vertex = trunk_vertex(&mut graph, bark.xy, radius)?;
    let color = bark_color(&mut graph, bark.heightmap)?;
    CompEnv::new(
        graph,
        vec![
            ("vertex".to_string(), vertex),
            ("color".to_string(), color),
            ("radius".to_string(), radius),
        ],
        Some(vec!["vertex".to_string(), "color".to_string()]),
    )
}

struct BarkNodes {
    xy: NodeId,
    tree_radius: NodeId,
    heightmap: NodeId,
}

impl BarkNodes {
    fn add(graph: &mut Graph, seed: Option<u64>) -> Result<Self, GraphError> {
        let xy = graph.add_input("xy", DType::Vec2);
        let x = graph.add_connect(&[(0, 0)], &[xy])?;
        let y = graph.add_connect(&[(0, 1)], &[xy])?;
        let heightmap = match seed {
            Some(seed) => graph.add_random_seeded(x, seed)?,
            None => graph.add_random(x)?,
        };
        let tree_radius = graph.add_blend(tree_radius_profile(), y)?;
        Ok(Self {
            xy,
            tree_radius,
            heightmap,
        })
    }
}

/// Constant base, square-root swell, then a quadratic taper to a point.
pub fn tree_radius_profile() -> Vec<(f32, BlendFunction)> {
    vec![
        (0.0, BlendFunction::linear(0.1, 0.1)),
        (
            0.3,
            BlendFunction::linear(0.1, 0.4).after(BlendFunction::exponential(0.5)),
        ),
        (
            0.7,
            BlendFunction::linear(0.4, 0.0).after(BlendFunction::exponential(2.0)),
        ),
    ]
}

fn band(low: f32, high: f32, t: f32) -> f32 {
    low + t * (high - low)
}

fn trunk_vertex(graph: &mut Graph, xy: NodeId, radius: NodeId) -> Result<NodeId, GraphError> {
    let uvr = graph.add_connect(&[(0, 0), (0, 1), (1, 0)], &[xy, radius])?;
    graph.add_polar_y(uvr)
}

fn bark_color(graph: &mut Graph, heightmap: NodeId) -> Result<NodeId, GraphError> {
    let zero = graph.add_constant(Value::Scalar(0.0));
    let one = graph.add_constant(Value::Scalar(1.0));
    graph.add_connect(&[(2, 0), (1, 0), (0, 0), (2, 0)], &[heightmap, zero, one])
}
