mod blend;
mod env;
mod eval;
mod graph;
mod parallel;
mod plan;
pub mod presets;
mod random;
mod sampler;
mod value;

pub use blend::{BlendFunction, BlendKind, PiecewiseBlend};
pub use env::{CompEnv, EnvError};
pub use eval::{evaluate_node, EvalError};
pub use graph::{Graph, GraphError, Node, NodeFn, NodeId, NodeKind};
pub use parallel::try_map_index;
pub use plan::{
    Plan, PlanError, PlanFunction, PlanNode, PlanNodeKind, PlanSegment, PlanValue,
};
pub use random::RandomSampler;
pub use sampler::{
    sample_grid, sample_grid_parallel, Column, Columns, SampleError,
    SampleSettings,
};
pub use value::{DType, Value, ValueKey};
