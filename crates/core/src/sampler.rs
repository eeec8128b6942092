use std::collections::BTreeMap;
use std::fmt;

use glam::Vec2;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::env::CompEnv;
use crate::eval::EvalError;
use crate::graph::GraphError;
use crate::parallel::try_map_index;
use crate::value::{DType, Value};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SampleSettings {
    pub segments: [u32; 2],
    pub wrap_x: bool,
    pub wrap_y: bool,
    pub input: String,
}

impl Default for SampleSettings {
    fn default() -> Self {
        Self {
            segments: [16, 16],
            wrap_x: false,
            wrap_y: false,
            input: "xy".to_string(),
        }
    }
}

impl SampleSettings {
    fn segments(&self) -> [u32; 2] {
        [self.segments[0].max(1), self.segments[1].max(1)]
    }

    /// Vertices per axis. A wrapped axis drops its last vertex, which would
    /// coincide with the first. `None` if a count does not fit in `usize`.
    pub fn vertex_counts(&self) -> Option<[usize; 2]> {
        let [sx, sy] = self.segments();
        let nx = usize::try_from(sx).ok()?.checked_add(usize::from(!self.wrap_x))?;
        let ny = usize::try_from(sy).ok()?.checked_add(usize::from(!self.wrap_y))?;
        Some([nx, ny])
    }

    /// Total vertices, `None` on overflow.
    pub fn vertex_count(&self) -> Option<usize> {
        let [nx, ny] = self.vertex_counts()?;
        nx.checked_mul(ny)
    }

    fn grid_size(&self) -> Result<([usize; 2], usize), SampleError> {
        self.vertex_counts()
            .zip(self.vertex_count())
            .ok_or(SampleError::GridTooLarge {
                segments: self.segments,
            })
    }

    pub fn coordinate(&self, x: usize, y: usize) -> Vec2 {
        let [sx, sy] = self.segments();
        Vec2::new(x as f32 / sx as f32, y as f32 / sy as f32)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "dtype", content = "data", rename_all = "snake_case")]
pub enum Column {
    Scalar(Vec<f32>),
    Vec2(Vec<[f32; 2]>),
    Vec3(Vec<[f32; 3]>),
    Vec4(Vec<[f32; 4]>),
}

impl Column {
    pub fn with_capacity(dtype: DType, capacity: usize) -> Self {
        match dtype {
            DType::Scalar => Column::Scalar(Vec::with_capacity(capacity)),
            DType::Vec2 => Column::Vec2(Vec::with_capacity(capacity)),
            DType::Vec3 => Column::Vec3(Vec::with_capacity(capacity)),
            DType::Vec4 => Column::Vec4(Vec::with_capacity(capacity)),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Column::Scalar(values) => values.len(),
            Column::Vec2(values) => values.len(),
            Column::Vec3(values) => values.len(),
            Column::Vec4(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dtype(&self) -> DType {
        match self {
            Column::Scalar(_) => DType::Scalar,
            Column::Vec2(_) => DType::Vec2,
            Column::Vec3(_) => DType::Vec3,
            Column::Vec4(_) => DType::Vec4,
        }
    }

    /// Returns false, leaving the column untouched, if `value` has the
    /// wrong type.
    pub fn push(&mut self, value: Value) -> bool {
        match (self, value) {
            (Column::Scalar(values), Value::Scalar(v)) => values.push(v),
            (Column::Vec2(values), Value::Vec2(v)) => values.push(v.to_array()),
            (Column::Vec3(values), Value::Vec3(v)) => values.push(v.to_array()),
            (Column::Vec4(values), Value::Vec4(v)) => values.push(v.to_array()),
            _ => return false,
        }
        true
    }

    fn append(&mut self, other: Column) -> bool {
        match (self, other) {
            (Column::Scalar(values), Column::Scalar(more)) => values.extend(more),
            (Column::Vec2(values), Column::Vec2(more)) => values.extend(more),
            (Column::Vec3(values), Column::Vec3(more)) => values.extend(more),
            (Column::Vec4(values), Column::Vec4(more)) => values.extend(more),
            _ => return false,
        }
        true
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SampleError {
    GridTooLarge { segments: [u32; 2] },
    Eval(EvalError),
}

impl From<EvalError> for SampleError {
    fn from(err: EvalError) -> Self {
        SampleError::Eval(err)
    }
}

impl fmt::Display for SampleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SampleError::GridTooLarge { segments } => {
                write!(f, "grid of {segments:?} segments has too many vertices")
            }
            SampleError::Eval(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for SampleError {}

/// Per-vertex output columns, vertices ordered x-major.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Columns {
    pub vertex_count: usize,
    pub columns: BTreeMap<String, Column>,
}

impl Columns {
    pub fn get(&self, name: &str) -> Option<&Column> {
        self.columns.get(name)
    }
}

/// Samples every output of `env` over the grid described by `settings`.
///
/// The environment is reset first. Vertex `(x, y)` lands at index
/// `x * rows + y` where `rows` is the vertex count along y.
pub fn sample_grid(env: &mut CompEnv, settings: &SampleSettings) -> Result<Columns, SampleError> {
    let ([nx, ny], total) = settings.grid_size()?;
    env.reset();
    let mut columns = empty_columns(env, total);
    for x in 0..nx {
        for y in 0..ny {
            sample_vertex(env, settings, x, y, &mut columns)?;
        }
    }
    debug!(
        "sampled {} vertices into {} columns",
        total,
        columns.len()
    );
    Ok(Columns {
        vertex_count: total,
        columns,
    })
}

/// Same layout as [`sample_grid`], with grid rows (constant x) spread over
/// worker threads.
///
/// Each row runs on `env.fork(seed + x)`. Random nodes keep whatever `env`
/// had memoized before the call, but keys first seen during the call are
/// drawn per row. Noise therefore differs from [`sample_grid`], and a random
/// node keyed on something other than x (say the y coordinate alone) no
/// longer agrees between rows. `env` itself is not modified.
pub fn sample_grid_parallel(
    env: &CompEnv,
    settings: &SampleSettings,
    seed: u64,
) -> Result<Columns, SampleError> {
    let ([nx, ny], total) = settings.grid_size()?;
    let rows = try_map_index(nx, |x| {
        let mut fork = env.fork(seed.wrapping_add(x as u64));
        fork.reset();
        let mut row = empty_columns(&fork, ny);
        for y in 0..ny {
            sample_vertex(&mut fork, settings, x, y, &mut row)?;
        }
        Ok::<_, EvalError>(row)
    })?;

    let mut columns = empty_columns(env, total);
    for row in rows {
        for (name, column) in row {
            if let Some(target) = columns.get_mut(&name) {
                target.append(column);
            }
        }
    }
    debug!(
        "sampled {} vertices over {} rows in parallel",
        total,
        nx
    );
    Ok(Columns {
        vertex_count: total,
        columns,
    })
}

fn empty_columns(env: &CompEnv, capacity: usize) -> BTreeMap<String, Column> {
    env.outputs()
        .iter()
        .filter_map(|name| {
            env.dtype_out(name)
                .map(|dtype| (name.clone(), Column::with_capacity(dtype, capacity)))
        })
        .collect()
}

fn sample_vertex(
    env: &mut CompEnv,
    settings: &SampleSettings,
    x: usize,
    y: usize,
    columns: &mut BTreeMap<String, Column>,
) -> Result<(), EvalError> {
    env.set_value(
        settings.input.clone(),
        Value::Vec2(settings.coordinate(x, y)),
    );
    env.compute()?;

    for (name, column) in columns.iter_mut() {
        let Some(root) = env.root(name) else {
            continue;
        };
        let value = env.value(name).ok_or(GraphError::MissingNode(root))?;
        if !column.push(value) {
            return Err(EvalError::DTypeMismatch {
                node: root,
                expected: column.dtype(),
                actual: value.dtype(),
            });
        }
    }
    Ok(())
}
