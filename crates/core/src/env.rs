use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use tracing::debug;

use crate::eval::{evaluate_node, EvalError};
use crate::graph::{Graph, GraphError, NodeId};
use crate::value::{DType, Value};

#[derive(Debug, Clone, PartialEq)]
pub enum EnvError {
    Graph(GraphError),
    DuplicateOutput(String),
    UnknownOutput(String),
    NameCollision { name: String },
}

impl From<GraphError> for EnvError {
    fn from(err: GraphError) -> Self {
        EnvError::Graph(err)
    }
}

impl fmt::Display for EnvError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EnvError::Graph(err) => write!(f, "{err}"),
            EnvError::DuplicateOutput(name) => write!(f, "function '{name}' is defined twice"),
            EnvError::UnknownOutput(name) => write!(f, "output '{name}' has no function"),
            EnvError::NameCollision { name } => {
                write!(f, "'{name}' names both a function and an input slot")
            }
        }
    }
}

impl std::error::Error for EnvError {}

/// Computation environment: named root nodes over one graph plus the value
/// table that feeds input slots and caches root results.
///
/// Function names and input slot names are disjoint, so a cached result can
/// never be fed back into an input.
#[derive(Debug, Clone)]
pub struct CompEnv {
    graph: Graph,
    funcs: Vec<(String, NodeId)>,
    values: BTreeMap<String, Value>,
    outputs: Vec<String>,
}

impl CompEnv {
    /// `funcs` order is evaluation order. `outputs` defaults to every
    /// function name.
    pub fn new(
        graph: Graph,
        funcs: Vec<(String, NodeId)>,
        outputs: Option<Vec<String>>,
    ) -> Result<Self, EnvError> {
        let mut names = BTreeSet::new();
        let mut slot_names = BTreeSet::new();
        for (name, root) in &funcs {
            if !names.insert(name.as_str()) {
                return Err(EnvError::DuplicateOutput(name.clone()));
            }
            for slot in graph.collect_input_slots(*root)? {
                if let Some(slot_name) = graph.input_name(slot) {
                    slot_names.insert(slot_name);
                }
            }
        }
        if let Some(name) = names.intersection(&slot_names).next() {
            return Err(EnvError::NameCollision {
                name: name.to_string(),
            });
        }

        let outputs = match outputs {
            Some(outputs) => {
                if let Some(missing) = outputs.iter().find(|name| !names.contains(name.as_str())) {
                    return Err(EnvError::UnknownOutput(missing.clone()));
                }
                outputs
            }
            None => funcs.iter().map(|(name, _)| name.clone()).collect(),
        };

        Ok(Self {
            graph,
            funcs,
            values: BTreeMap::new(),
            outputs,
        })
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn funcs(&self) -> &[(String, NodeId)] {
        &self.funcs
    }

    pub fn outputs(&self) -> &[String] {
        &self.outputs
    }

    pub fn values(&self) -> &BTreeMap<String, Value> {
        &self.values
    }

    pub fn value(&self, name: &str) -> Option<Value> {
        self.values.get(name).copied()
    }

    pub fn root(&self, name: &str) -> Option<NodeId> {
        self.funcs
            .iter()
            .find(|(func_name, _)| func_name == name)
            .map(|(_, root)| *root)
    }

    pub fn dtype_out(&self, name: &str) -> Option<DType> {
        let root = self.root(name)?;
        self.graph.node(root).map(|node| node.dtype_out)
    }

    /// Clears the value table and every input slot. Random memos survive.
    pub fn reset(&mut self) {
        self.values.clear();
        self.graph.reset();
    }

    pub fn set_value(&mut self, name: impl Into<String>, value: Value) {
        self.values.insert(name.into(), value);
    }

    /// Pushes the value table into the input slots and evaluates every root.
    ///
    /// Results are committed only if every root succeeds; on error the value
    /// table is left as it was. Random samples drawn before the failure stay
    /// memoized.
    pub fn compute(&mut self) -> Result<(), EvalError> {
        let mut updates = Vec::new();
        for (_, root) in &self.funcs {
            for slot in self.graph.collect_input_slots(*root)? {
                let value = self
                    .graph
                    .input_name(slot)
                    .and_then(|name| self.values.get(name));
                if let Some(value) = value {
                    updates.push((slot, *value));
                }
            }
        }
        for (slot, value) in updates {
            self.graph.set_input_value(slot, Some(value))?;
        }

        let mut results = BTreeMap::new();
        let mut computed = Vec::with_capacity(self.funcs.len());
        for (name, root) in &self.funcs {
            let value = evaluate_node(&mut self.graph, *root, &mut results)?;
            computed.push((name.clone(), value));
        }
        debug!("computed {} outputs from {} nodes", computed.len(), results.len());

        self.values.extend(computed);
        Ok(())
    }

    /// Deep copy with independently seeded random nodes; see [`Graph::fork`].
    pub fn fork(&self, seed: u64) -> CompEnv {
        CompEnv {
            graph: self.graph.fork(seed),
            funcs: self.funcs.clone(),
            values: self.values.clone(),
            outputs: self.outputs.clone(),
        }
    }
}
