use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;
use std::sync::Arc;

use crate::blend::{BlendFunction, PiecewiseBlend};
use crate::random::RandomSampler;
use crate::value::{DType, Value};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Shared body of a [`NodeKind::Function`] node.
#[derive(Clone)]
pub struct NodeFn(Arc<dyn Fn(&[Value]) -> Result<Value, String> + Send + Sync>);

impl NodeFn {
    pub fn new<F>(func: F) -> Self
    where
        F: Fn(&[Value]) -> Result<Value, String> + Send + Sync + 'static,
    {
        Self(Arc::new(func))
    }

    pub fn call(&self, inputs: &[Value]) -> Result<Value, String> {
        (self.0)(inputs)
    }
}

impl fmt::Debug for NodeFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("NodeFn(..)")
    }
}

#[derive(Debug, Clone)]
pub enum NodeKind {
    Constant {
        value: Value,
    },
    Input {
        name: String,
        dtype: DType,
        value: Option<Value>,
    },
    Function {
        label: String,
        inputs: Vec<NodeId>,
        func: NodeFn,
    },
    Connect {
        inputs: Vec<NodeId>,
        connectivity: Vec<(usize, usize)>,
    },
    PolarY {
        input: NodeId,
    },
    Random {
        input: NodeId,
        sampler: RandomSampler,
    },
    Blend {
        input: NodeId,
        blend: PiecewiseBlend,
    },
    Multiply {
        a: NodeId,
        b: NodeId,
    },
}

impl NodeKind {
    pub fn name(&self) -> &'static str {
        match self {
            NodeKind::Constant { .. } => "Constant",
            NodeKind::Input { .. } => "Input",
            NodeKind::Function { .. } => "Function",
            NodeKind::Connect { .. } => "Connect",
            NodeKind::PolarY { .. } => "PolarY",
            NodeKind::Random { .. } => "Random",
            NodeKind::Blend { .. } => "Blend",
            NodeKind::Multiply { .. } => "Multiply",
        }
    }

    pub fn inputs(&self) -> Vec<NodeId> {
        match self {
            NodeKind::Constant { .. } | NodeKind::Input { .. } => Vec::new(),
            NodeKind::Function { inputs, .. } | NodeKind::Connect { inputs, .. } => inputs.clone(),
            NodeKind::PolarY { input }
            | NodeKind::Random { input, .. }
            | NodeKind::Blend { input, .. } => vec![*input],
            NodeKind::Multiply { a, b } => vec![*a, *b],
        }
    }

    fn with_inputs(&self, inputs: &[NodeId]) -> Option<NodeKind> {
        let mut kind = self.clone();
        match (&mut kind, inputs) {
            (NodeKind::Constant { .. } | NodeKind::Input { .. }, []) => {}
            (NodeKind::Function { inputs: slots, .. }, _)
            | (NodeKind::Connect { inputs: slots, .. }, _) => *slots = inputs.to_vec(),
            (NodeKind::PolarY { input }, [new])
            | (NodeKind::Random { input, .. }, [new])
            | (NodeKind::Blend { input, .. }, [new]) => *input = *new,
            (NodeKind::Multiply { a, b }, [new_a, new_b]) => {
                *a = *new_a;
                *b = *new_b;
            }
            _ => return None,
        }
        Some(kind)
    }
}

#[derive(Debug, Clone)]
pub struct Node {
    pub id: NodeId,
    pub kind: NodeKind,
    pub dtype_out: DType,
}

impl Node {
    pub fn inputs(&self) -> Vec<NodeId> {
        self.kind.inputs()
    }
}

/// Arena of computation nodes. Nodes only reference nodes that already
/// exist, so a graph built with the `add_*` methods is acyclic;
/// [`Graph::set_inputs`] keeps it that way.
#[derive(Debug, Clone)]
pub struct Graph {
    nodes: BTreeMap<NodeId, Node>,
    next_node_id: u64,
}

impl Default for Graph {
    fn default() -> Self {
        Self {
            nodes: BTreeMap::new(),
            next_node_id: 1,
        }
    }
}

impl Graph {
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(&id)
    }

    pub fn dtype_out(&self, id: NodeId) -> Result<DType, GraphError> {
        self.nodes
            .get(&id)
            .map(|node| node.dtype_out)
            .ok_or(GraphError::MissingNode(id))
    }

    pub fn add_constant(&mut self, value: Value) -> NodeId {
        self.insert(NodeKind::Constant { value }, value.dtype())
    }

    pub fn add_input(&mut self, name: impl Into<String>, dtype: DType) -> NodeId {
        self.insert(
            NodeKind::Input {
                name: name.into(),
                dtype,
                value: None,
            },
            dtype,
        )
    }

    pub fn add_function<F>(
        &mut self,
        label: impl Into<String>,
        inputs: &[NodeId],
        dtype_out: DType,
        func: F,
    ) -> Result<NodeId, GraphError>
    where
        F: Fn(&[Value]) -> Result<Value, String> + Send + Sync + 'static,
    {
        let kind = NodeKind::Function {
            label: label.into(),
            inputs: inputs.to_vec(),
            func: NodeFn::new(func),
        };
        self.validate(&kind)?;
        Ok(self.insert(kind, dtype_out))
    }

    /// Swizzle node: output lane `i` is lane `connectivity[i].1` of input
    /// `connectivity[i].0`.
    pub fn add_connect(
        &mut self,
        connectivity: &[(usize, usize)],
        inputs: &[NodeId],
    ) -> Result<NodeId, GraphError> {
        let kind = NodeKind::Connect {
            inputs: inputs.to_vec(),
            connectivity: connectivity.to_vec(),
        };
        let dtype = self.validate(&kind)?;
        Ok(self.insert(kind, dtype))
    }

    pub fn add_polar_y(&mut self, input: NodeId) -> Result<NodeId, GraphError> {
        let kind = NodeKind::PolarY { input };
        let dtype = self.validate(&kind)?;
        Ok(self.insert(kind, dtype))
    }

    pub fn add_random(&mut self, input: NodeId) -> Result<NodeId, GraphError> {
        self.add_random_with(input, RandomSampler::from_entropy())
    }

    pub fn add_random_seeded(&mut self, input: NodeId, seed: u64) -> Result<NodeId, GraphError> {
        self.add_random_with(input, RandomSampler::seeded(seed))
    }

    fn add_random_with(
        &mut self,
        input: NodeId,
        sampler: RandomSampler,
    ) -> Result<NodeId, GraphError> {
        let kind = NodeKind::Random { input, sampler };
        let dtype = self.validate(&kind)?;
        Ok(self.insert(kind, dtype))
    }

    pub fn add_blend(
        &mut self,
        segments: Vec<(f32, BlendFunction)>,
        input: NodeId,
    ) -> Result<NodeId, GraphError> {
        let blend = PiecewiseBlend::new(segments).map_err(GraphError::InvalidBreakpoints)?;
        let kind = NodeKind::Blend { input, blend };
        let dtype = self.validate(&kind)?;
        Ok(self.insert(kind, dtype))
    }

    /// Elementwise product. A scalar operand broadcasts over a vector one.
    pub fn add_multiply(&mut self, a: NodeId, b: NodeId) -> Result<NodeId, GraphError> {
        let kind = NodeKind::Multiply { a, b };
        let dtype = self.validate(&kind)?;
        Ok(self.insert(kind, dtype))
    }

    /// Rewires the inputs of `node_id`. The new wiring must pass the same
    /// checks as construction, keep the node's output type and must not
    /// close a cycle.
    pub fn set_inputs(&mut self, node_id: NodeId, inputs: &[NodeId]) -> Result<(), GraphError> {
        let node = self
            .nodes
            .get(&node_id)
            .ok_or(GraphError::MissingNode(node_id))?;
        let expected = node.kind.inputs().len();
        let kind = node
            .kind
            .with_inputs(inputs)
            .ok_or(GraphError::InputCount {
                node: node_id,
                expected,
                actual: inputs.len(),
            })?;
        let declared = node.dtype_out;
        let dtype = match &kind {
            NodeKind::Function { .. } => {
                self.validate(&kind)?;
                declared
            }
            _ => self.validate(&kind)?,
        };
        if dtype != declared {
            return Err(GraphError::DTypeMismatch {
                node: Some(node_id),
                expected: declared,
                actual: dtype,
            });
        }

        let previous = self
            .node_mut(node_id)
            .map(|node| std::mem::replace(&mut node.kind, kind))
            .ok_or(GraphError::MissingNode(node_id))?;
        if let Err(err) = self.check_acyclic(node_id) {
            if let Some(node) = self.node_mut(node_id) {
                node.kind = previous;
            }
            return Err(err);
        }
        Ok(())
    }

    fn check_acyclic(&self, node_id: NodeId) -> Result<(), GraphError> {
        // Any new cycle has to pass through the rewired node.
        self.topo_sort_from(node_id).map(|_| ())
    }

    pub fn topo_sort_from(&self, output: NodeId) -> Result<Vec<NodeId>, GraphError> {
        if !self.nodes.contains_key(&output) {
            return Err(GraphError::MissingNode(output));
        }

        let mut ordered = Vec::new();
        let mut visiting = HashSet::new();
        let mut visited = HashSet::new();
        let mut stack = Vec::new();

        self.visit_node(
            output,
            &mut visiting,
            &mut visited,
            &mut ordered,
            &mut stack,
        )?;

        Ok(ordered)
    }

    fn visit_node(
        &self,
        node_id: NodeId,
        visiting: &mut HashSet<NodeId>,
        visited: &mut HashSet<NodeId>,
        ordered: &mut Vec<NodeId>,
        stack: &mut Vec<NodeId>,
    ) -> Result<(), GraphError> {
        if visited.contains(&node_id) {
            return Ok(());
        }
        if visiting.contains(&node_id) {
            stack.push(node_id);
            return Err(GraphError::CycleDetected(stack.clone()));
        }

        let node = self
            .nodes
            .get(&node_id)
            .ok_or(GraphError::MissingNode(node_id))?;

        visiting.insert(node_id);
        stack.push(node_id);

        for upstream in node.inputs() {
            self.visit_node(upstream, visiting, visited, ordered, stack)?;
        }

        visiting.remove(&node_id);
        visited.insert(node_id);
        ordered.push(node_id);
        stack.pop();
        Ok(())
    }

    /// Input slots `node_id` depends on, itself included. Shared subnodes
    /// are visited once; identity is the node id.
    pub fn collect_input_slots(&self, node_id: NodeId) -> Result<BTreeSet<NodeId>, GraphError> {
        Ok(self
            .topo_sort_from(node_id)?
            .into_iter()
            .filter(|id| {
                matches!(
                    self.nodes.get(id).map(|node| &node.kind),
                    Some(NodeKind::Input { .. })
                )
            })
            .collect())
    }

    pub fn input_name(&self, node_id: NodeId) -> Option<&str> {
        match self.nodes.get(&node_id).map(|node| &node.kind) {
            Some(NodeKind::Input { name, .. }) => Some(name.as_str()),
            _ => None,
        }
    }

    pub fn input_value(&self, node_id: NodeId) -> Result<Option<Value>, GraphError> {
        match self.nodes.get(&node_id).map(|node| &node.kind) {
            Some(NodeKind::Input { value, .. }) => Ok(*value),
            Some(_) => Err(GraphError::NotAnInput(node_id)),
            None => Err(GraphError::MissingNode(node_id)),
        }
    }

    pub fn set_input_value(
        &mut self,
        node_id: NodeId,
        new_value: Option<Value>,
    ) -> Result<(), GraphError> {
        match self.nodes.get_mut(&node_id).map(|node| &mut node.kind) {
            Some(NodeKind::Input { value, .. }) => {
                *value = new_value;
                Ok(())
            }
            Some(_) => Err(GraphError::NotAnInput(node_id)),
            None => Err(GraphError::MissingNode(node_id)),
        }
    }

    /// Clears every input slot. Random memos are kept.
    pub fn reset(&mut self) {
        for node in self.nodes.values_mut() {
            if let NodeKind::Input { value, .. } = &mut node.kind {
                *value = None;
            }
        }
    }

    pub fn random_cache_len(&self, node_id: NodeId) -> Option<usize> {
        match self.nodes.get(&node_id).map(|node| &node.kind) {
            Some(NodeKind::Random { sampler, .. }) => Some(sampler.len()),
            _ => None,
        }
    }

    /// Deep copy for use on another worker. Input slots and random memos are
    /// copied; each random node then draws unseen keys from its own stream
    /// derived from `seed`, so forks diverge from each other and from
    /// `self` on coordinates none of them had sampled before the fork.
    pub fn fork(&self, seed: u64) -> Graph {
        let mut graph = self.clone();
        for node in graph.nodes.values_mut() {
            if let NodeKind::Random { sampler, .. } = &mut node.kind {
                let NodeId(raw) = node.id;
                sampler.reseed(seed ^ raw.wrapping_mul(0x9E37_79B9_7F4A_7C15));
            }
        }
        graph
    }

    fn insert(&mut self, kind: NodeKind, dtype_out: DType) -> NodeId {
        let id = self.alloc_node_id();
        self.nodes.insert(
            id,
            Node {
                id,
                kind,
                dtype_out,
            },
        );
        id
    }

    fn alloc_node_id(&mut self) -> NodeId {
        let id = self.next_node_id;
        self.next_node_id += 1;
        NodeId(id)
    }

    /// Checks a node's wiring against the declared types of its inputs and
    /// returns the node's output type.
    fn validate(&self, kind: &NodeKind) -> Result<DType, GraphError> {
        let mut declared = Vec::new();
        for input in kind.inputs() {
            declared.push(self.dtype_out(input)?);
        }

        match kind {
            NodeKind::Constant { value } => Ok(value.dtype()),
            NodeKind::Input { dtype, .. } => Ok(*dtype),
            // Output type is declared by the caller.
            NodeKind::Function { .. } => Ok(DType::Scalar),
            NodeKind::Connect { connectivity, .. } => {
                let dtype = DType::from_lanes(connectivity.len())
                    .ok_or(GraphError::InvalidConnectivity(connectivity.len()))?;
                for (input, lane) in connectivity.iter().copied() {
                    let in_range = declared
                        .get(input)
                        .is_some_and(|input_dtype| lane < input_dtype.lanes());
                    if !in_range {
                        return Err(GraphError::InvalidConnection { input, lane });
                    }
                }
                Ok(dtype)
            }
            NodeKind::PolarY { .. } => {
                expect_dtype(DType::Vec3, declared[0])?;
                Ok(DType::Vec3)
            }
            NodeKind::Random { .. } => Ok(DType::Scalar),
            NodeKind::Blend { .. } => {
                expect_dtype(DType::Scalar, declared[0])?;
                Ok(DType::Scalar)
            }
            NodeKind::Multiply { .. } => match (declared[0], declared[1]) {
                (a, b) if a == b => Ok(a),
                (DType::Scalar, other) | (other, DType::Scalar) => Ok(other),
                (a, b) => Err(GraphError::DTypeMismatch {
                    node: None,
                    expected: a,
                    actual: b,
                }),
            },
        }
    }
}

fn expect_dtype(expected: DType, actual: DType) -> Result<(), GraphError> {
    if expected == actual {
        Ok(())
    } else {
        Err(GraphError::DTypeMismatch {
            node: None,
            expected,
            actual,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum GraphError {
    MissingNode(NodeId),
    NotAnInput(NodeId),
    InvalidConnectivity(usize),
    InvalidConnection { input: usize, lane: usize },
    DTypeMismatch {
        node: Option<NodeId>,
        expected: DType,
        actual: DType,
    },
    InputCount {
        node: NodeId,
        expected: usize,
        actual: usize,
    },
    InvalidBreakpoints(Vec<f32>),
    CycleDetected(Vec<NodeId>),
}

impl fmt::Display for GraphError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GraphError::MissingNode(id) => write!(f, "missing node {id}"),
            GraphError::NotAnInput(id) => write!(f, "node {id} is not an input slot"),
            GraphError::InvalidConnectivity(lanes) => {
                write!(f, "connect nodes need 1 to 4 lanes, got {lanes}")
            }
            GraphError::InvalidConnection { input, lane } => {
                write!(f, "connection ({input}, {lane}) addresses a missing input or lane")
            }
            GraphError::DTypeMismatch {
                node,
                expected,
                actual,
            } => match node {
                Some(id) => write!(f, "node {id} expected {expected}, got {actual}"),
                None => write!(f, "expected {expected}, got {actual}"),
            },
            GraphError::InputCount {
                node,
                expected,
                actual,
            } => write!(f, "node {node} takes {expected} inputs, got {actual}"),
            GraphError::InvalidBreakpoints(breakpoints) => write!(
                f,
                "breakpoints must be strictly ascending within [0, 1): {breakpoints:?}"
            ),
            GraphError::CycleDetected(path) => {
                let path: Vec<String> = path.iter().map(|id| id.to_string()).collect();
                write!(f, "cycle detected: {}", path.join(" -> "))
            }
        }
    }
}

impl std::error::Error for GraphError {}
