use crate::palette::{Color, ColorScheme, FLAT_STOPS, PALETTE_LEN, UNKNOWN_COLOR};
use serde::Serialize;

pub const STEP_COUNT: usize = PALETTE_LEN;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ScaleKind {
    /// Quantized: one palette color per breakpoint interval.
    Step,
    /// Fallback for a flat column: two stops over a synthetic `[0, 1]` domain.
    Linear,
}

/// Color mapping for one column. Built per render, never cached.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Classification {
    pub kind: ScaleKind,
    pub scheme: ColorScheme,
    pub breakpoints: Vec<f64>,
    pub colors: Vec<Color>,
    /// Data domain, reported even when the scale itself is the flat fallback.
    pub domain_min: f64,
    pub domain_max: f64,
}

pub fn classify(values: &[f64], scheme: ColorScheme) -> Classification {
    let (domain_min, domain_max) = values
        .iter()
        .copied()
        .filter(|v| !v.is_nan())
        .fold(None, |acc: Option<(f64, f64)>, v| match acc {
            None => Some((v, v)),
            Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
        })
        .unwrap_or((0.0, 0.0));

    if domain_max > domain_min {
        let span = domain_max - domain_min;
        let breakpoints = (0..=STEP_COUNT)
            .map(|i| {
                if i == STEP_COUNT {
                    domain_max
                } else {
                    domain_min + span * i as f64 / STEP_COUNT as f64
                }
            })
            .collect();
        Classification {
            kind: ScaleKind::Step,
            scheme,
            breakpoints,
            colors: scheme.colors().to_vec(),
            domain_min,
            domain_max,
        }
    } else {
        Classification {
            kind: ScaleKind::Linear,
            scheme,
            breakpoints: vec![0.0, 1.0],
            colors: FLAT_STOPS.to_vec(),
            domain_min,
            domain_max,
        }
    }
}

impl Classification {
    pub fn is_degenerate(&self) -> bool {
        self.kind == ScaleKind::Linear
    }

    pub fn color_for(&self, value: Option<f64>) -> Color {
        let v = match value {
            Some(v) if !v.is_nan() => v,
            _ => return UNKNOWN_COLOR,
        };
        match self.kind {
            ScaleKind::Step => {
                let last = self.colors.len() - 1;
                if v >= self.domain_max {
                    return self.colors[last];
                }
                let idx = self.breakpoints[..self.colors.len()]
                    .iter()
                    .rposition(|&b| b <= v)
                    .unwrap_or(0);
                self.colors[idx]
            }
            ScaleKind::Linear => {
                let (lo, hi) = (self.breakpoints[0], self.breakpoints[1]);
                let t = (v - lo) / (hi - lo);
                self.colors[0].lerp(self.colors[1], t)
            }
        }
    }
}
