use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlendKind {
    Linear { zero: f32, one: f32 },
    Exponential { exponent: f32 },
}

/// Unary easing transform, optionally applied after an inner transform.
///
/// `BlendFunction::linear(0.1, 0.4).after(BlendFunction::exponential(0.5))`
/// evaluates `linear(exponential(x))`. A negative exponent at `x == 0.0`
/// yields `+inf`, following `f32::powf`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlendFunction {
    #[serde(flatten)]
    pub kind: BlendKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after: Option<Box<BlendFunction>>,
}

impl BlendFunction {
    pub fn linear(zero: f32, one: f32) -> Self {
        Self {
            kind: BlendKind::Linear { zero, one },
            after: None,
        }
    }

    pub fn exponential(exponent: f32) -> Self {
        Self {
            kind: BlendKind::Exponential { exponent },
            after: None,
        }
    }

    pub fn after(mut self, inner: BlendFunction) -> Self {
        self.after = Some(Box::new(inner));
        self
    }

    pub fn eval(&self, x: f32) -> f32 {
        let x = match &self.after {
            Some(inner) => inner.eval(x),
            None => x,
        };
        match self.kind {
            BlendKind::Linear { zero, one } => zero + x * (one - zero),
            BlendKind::Exponential { exponent } => x.powf(exponent),
        }
    }
}

/// Segmented blend over `[0, 1)`. Each breakpoint starts a half-open segment
/// `[b_i, b_{i+1})`; the last segment ends at `1.0`.
#[derive(Debug, Clone, PartialEq)]
pub struct PiecewiseBlend {
    segments: Vec<(f32, BlendFunction)>,
}

impl PiecewiseBlend {
    /// Breakpoints must be finite, inside `[0, 1)` and strictly ascending.
    /// On rejection the offending breakpoints are handed back.
    pub fn new(segments: Vec<(f32, BlendFunction)>) -> Result<Self, Vec<f32>> {
        let valid = !segments.is_empty()
            && segments
                .iter()
                .all(|(at, _)| at.is_finite() && (0.0..1.0).contains(at))
            && segments.windows(2).all(|pair| pair[0].0 < pair[1].0);
        if !valid {
            return Err(segments.iter().map(|(at, _)| *at).collect());
        }
        Ok(Self { segments })
    }

    pub fn breakpoints(&self) -> impl Iterator<Item = f32> + '_ {
        self.segments.iter().map(|(at, _)| *at)
    }

    /// Returns `(lower, upper, function)` for `x`. Inputs below the first
    /// breakpoint use `[0.0, b_0)` with the first function, or `[0.0, 1.0]`
    /// when `b_0` is 0, so `upper > lower` always holds.
    pub fn segment(&self, x: f32) -> (f32, f32, &BlendFunction) {
        let mut index = None;
        let mut upper = 1.0;
        for (i, (at, _)) in self.segments.iter().enumerate() {
            if *at <= x {
                index = Some(i);
            } else {
                upper = *at;
                break;
            }
        }
        match index {
            Some(i) => {
                let (lower, func) = &self.segments[i];
                (*lower, upper, func)
            }
            None if upper > 0.0 => (0.0, upper, &self.segments[0].1),
            None => (0.0, 1.0, &self.segments[0].1),
        }
    }

    pub fn eval(&self, x: f32) -> f32 {
        let (lower, upper, func) = self.segment(x);
        func.eval((x - lower) / (upper - lower))
    }
}
