use crate::fit::{Parameter, Parameters};

// ---------------------------------------------------------------------------
// Messages emitted by the parameter panel
// ---------------------------------------------------------------------------

/// One field change on one parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamEdit {
    Value(f64),
    Min(f64),
    Max(f64),
    /// Empty string clears the expression.
    Expr(String),
    Vary(bool),
}

/// A panel edit addressed to a parameter by name.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamMessage {
    pub name: String,
    pub edit: ParamEdit,
}

impl ParamMessage {
    pub fn new(name: &str, edit: ParamEdit) -> Self {
        ParamMessage {
            name: name.to_string(),
            edit,
        }
    }
}

// ---------------------------------------------------------------------------
// Slider quantisation
// ---------------------------------------------------------------------------

/// Maps integer slider positions `0..=steps` onto `[lo, hi]`, rounded to
/// two decimals.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SliderScale {
    pub lo: f64,
    pub hi: f64,
    pub steps: usize,
}

impl SliderScale {
    /// Slider range for a parameter: its bounds when both are finite,
    /// otherwise a window around the current value clipped to any finite bound.
    pub fn for_param(param: &Parameter, steps: usize) -> Self {
        let steps = steps.max(1);
        if param.min.is_finite() && param.max.is_finite() && param.max > param.min {
            return SliderScale {
                lo: param.min,
                hi: param.max,
                steps,
            };
        }
        let span = (param.value.abs() * 0.5).max(1.0);
        let lo = (param.value - span).max(param.min);
        let hi = (param.value + span).min(param.max);
        let hi = if hi > lo { hi } else { lo + 1.0 };
        SliderScale { lo, hi, steps }
    }

    pub fn value_at(&self, step: usize) -> f64 {
        let step = step.min(self.steps);
        let raw = self.lo + step as f64 * (self.hi - self.lo) / self.steps as f64;
        (raw * 100.0).round() / 100.0
    }

    pub fn step_for(&self, value: f64) -> usize {
        let frac = (value - self.lo) / (self.hi - self.lo);
        (frac * self.steps as f64)
            .round()
            .clamp(0.0, self.steps as f64) as usize
    }
}

// ---------------------------------------------------------------------------
// Panel state: text buffers and slider positions per parameter
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct ParamControls {
    pub name: String,
    pub scale: SliderScale,
    pub step: usize,
    pub min_text: String,
    pub max_text: String,
    pub expr_text: String,
}

impl ParamControls {
    fn from_param(param: &Parameter, steps: usize) -> Self {
        let scale = SliderScale::for_param(param, steps);
        ParamControls {
            name: param.name.clone(),
            scale,
            step: scale.step_for(param.value),
            min_text: format_bound(param.min),
            max_text: format_bound(param.max),
            expr_text: param.expr.clone().unwrap_or_default(),
        }
    }
}

/// Widget state of an open parameter panel, rebuilt from the live
/// parameters whenever they change underneath it.
#[derive(Debug, Clone, PartialEq)]
pub struct PanelState {
    pub controls: Vec<ParamControls>,
    steps: usize,
}

impl PanelState {
    pub fn new(params: &Parameters, steps: usize) -> Self {
        PanelState {
            controls: params
                .iter()
                .map(|p| ParamControls::from_param(p, steps))
                .collect(),
            steps,
        }
    }

    /// Refresh every control from the parameters.
    pub fn sync(&mut self, params: &Parameters) {
        *self = PanelState::new(params, self.steps);
    }

    /// Refresh one control; the slider range is kept unless bounds changed.
    pub fn sync_one(&mut self, param: &Parameter) {
        let steps = self.steps;
        if let Some(c) = self.controls.iter_mut().find(|c| c.name == param.name) {
            let fresh = ParamControls::from_param(param, steps);
            let bounded = param.min.is_finite() && param.max.is_finite();
            if bounded || param.value < c.scale.lo || param.value > c.scale.hi {
                c.scale = fresh.scale;
            }
            c.step = c.scale.step_for(param.value);
            c.min_text = fresh.min_text;
            c.max_text = fresh.max_text;
            c.expr_text = fresh.expr_text;
        }
    }
}

pub fn format_bound(v: f64) -> String {
    if v == f64::INFINITY {
        "inf".to_string()
    } else if v == f64::NEG_INFINITY {
        "-inf".to_string()
    } else {
        format!("{v}")
    }
}

/// Parse a bound entry; `inf`, `-inf` and blank (unbounded) are accepted.
pub fn parse_bound(text: &str, unbounded: f64) -> Option<f64> {
    let t = text.trim();
    if t.is_empty() {
        return Some(unbounded);
    }
    t.parse::<f64>().ok().filter(|v| !v.is_nan())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slider_rounds_to_hundredths() {
        let scale = SliderScale {
            lo: 0.0,
            hi: 1.0,
            steps: 3,
        };
        assert_eq!(scale.value_at(0), 0.0);
        assert_eq!(scale.value_at(1), 0.33);
        assert_eq!(scale.value_at(3), 1.0);
        assert_eq!(scale.value_at(99), 1.0);
        assert_eq!(scale.step_for(0.66), 2);
        assert_eq!(scale.step_for(-5.0), 0);
    }

    #[test]
    fn test_scale_from_bounds_or_value() {
        let bounded = Parameter::new("f", 0.5).with_bounds(0.0, 1.0);
        let s = SliderScale::for_param(&bounded, 100);
        assert_eq!((s.lo, s.hi), (0.0, 1.0));

        let open = Parameter::new("c", 100.0);
        let s = SliderScale::for_param(&open, 100);
        assert_eq!((s.lo, s.hi), (50.0, 150.0));

        let lower = Parameter::new("s", 0.2).with_bounds(0.0, f64::INFINITY);
        let s = SliderScale::for_param(&lower, 100);
        assert_eq!((s.lo, s.hi), (0.0, 1.2));
    }

    #[test]
    fn test_bound_text() {
        assert_eq!(parse_bound("inf", 0.0), Some(f64::INFINITY));
        assert_eq!(parse_bound(" -inf ", 0.0), Some(f64::NEG_INFINITY));
        assert_eq!(parse_bound("", f64::INFINITY), Some(f64::INFINITY));
        assert_eq!(parse_bound("1.5", 0.0), Some(1.5));
        assert_eq!(parse_bound("abc", 0.0), None);
        assert_eq!(parse_bound("NaN", 0.0), None);
        assert_eq!(format_bound(f64::NEG_INFINITY), "-inf");
        assert_eq!(parse_bound(&format_bound(2.25), 0.0), Some(2.25));
    }

    #[test]
    fn test_sync_one_updates_texts() {
        let mut params = Parameters::new();
        params.add(Parameter::new("a", 1.0));
        params.add(Parameter::new("b", 2.0));
        let mut panel = PanelState::new(&params, 10);

        params.get_mut("a").unwrap().set_expr("b * 2").unwrap();
        panel.sync_one(params.get("a").unwrap());
        assert_eq!(panel.controls[0].expr_text, "b * 2");
        assert_eq!(panel.controls[1].expr_text, "");
    }
}
