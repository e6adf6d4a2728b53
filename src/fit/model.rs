use std::f64::consts::{LN_2, PI};

use serde::{Deserialize, Serialize};

use super::params::{Parameter, Parameters};
use crate::error::XpsError;

const TINY: f64 = 1.0e-15;
const S2PI: f64 = 2.506_628_274_631_000_2; // sqrt(2π)
const FWHM_GAUSS: f64 = 2.354_820_0; // 2·sqrt(2 ln 2)

// ---------------------------------------------------------------------------
// Line-shape components
// ---------------------------------------------------------------------------

/// Line shape of one model component. Peak amplitudes are areas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentKind {
    Gaussian,
    Lorentzian,
    PseudoVoigt,
    Linear,
    Constant,
}

impl ComponentKind {
    pub fn is_peak(self) -> bool {
        matches!(
            self,
            ComponentKind::Gaussian | ComponentKind::Lorentzian | ComponentKind::PseudoVoigt
        )
    }
}

pub fn gaussian(x: f64, amplitude: f64, center: f64, sigma: f64) -> f64 {
    let s = sigma.max(TINY);
    amplitude / (S2PI * s) * (-(x - center).powi(2) / (2.0 * s * s)).exp()
}

pub fn lorentzian(x: f64, amplitude: f64, center: f64, sigma: f64) -> f64 {
    let s = sigma.max(TINY);
    amplitude / (1.0 + ((x - center) / s).powi(2)) / (PI * s)
}

/// Area-weighted mix of a Gaussian and a Lorentzian sharing one FWHM.
pub fn pseudo_voigt(x: f64, amplitude: f64, center: f64, sigma: f64, fraction: f64) -> f64 {
    let sigma_g = sigma / (2.0 * LN_2).sqrt();
    (1.0 - fraction) * gaussian(x, amplitude, center, sigma_g)
        + fraction * lorentzian(x, amplitude, center, sigma)
}

/// One additive term of a [`CompositeModel`]. Its parameters are named
/// `prefix + base`, e.g. `si2p_center`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Component {
    pub kind: ComponentKind,
    pub prefix: String,
}

impl Component {
    pub fn new(kind: ComponentKind, prefix: &str) -> Self {
        Component {
            kind,
            prefix: prefix.to_string(),
        }
    }

    pub fn param_name(&self, base: &str) -> String {
        format!("{}{}", self.prefix, base)
    }

    /// Default parameters, including the derived `fwhm` and `height` of peaks.
    pub fn make_params(&self) -> Vec<Parameter> {
        let p = |base: &str| self.param_name(base);
        match self.kind {
            ComponentKind::Linear => vec![
                Parameter::new(&p("slope"), 0.0),
                Parameter::new(&p("intercept"), 0.0),
            ],
            ComponentKind::Constant => vec![Parameter::new(&p("c"), 0.0)],
            kind => {
                let sigma = p("sigma");
                let amplitude = p("amplitude");
                let mut out = vec![
                    Parameter::new(&amplitude, 1.0).with_bounds(0.0, f64::INFINITY),
                    Parameter::new(&p("center"), 0.0),
                    Parameter::new(&sigma, 1.0).with_bounds(0.0, f64::INFINITY),
                ];
                let (fwhm, height) = match kind {
                    ComponentKind::Gaussian => (
                        format!("{FWHM_GAUSS} * {sigma}"),
                        format!("0.3989423 * {amplitude} / max({TINY:e}, {sigma})"),
                    ),
                    ComponentKind::Lorentzian => (
                        format!("2.0 * {sigma}"),
                        format!("0.3183099 * {amplitude} / max({TINY:e}, {sigma})"),
                    ),
                    _ => {
                        let fraction = p("fraction");
                        out.push(Parameter::new(&fraction, 0.5).with_bounds(0.0, 1.0));
                        (
                            format!("2.0 * {sigma}"),
                            format!(
                                "(1 - {fraction}) * {amplitude} / max({TINY:e}, {sigma} * sqrt(pi / ln(2))) \
                                 + {fraction} * {amplitude} / max({TINY:e}, pi * {sigma})"
                            ),
                        )
                    }
                };
                out.push(Parameter::new(&p("fwhm"), 0.0).with_expr(&fwhm));
                out.push(Parameter::new(&p("height"), 0.0).with_expr(&height));
                out
            }
        }
    }

    pub fn eval(&self, params: &Parameters, x: &[f64]) -> Result<Vec<f64>, XpsError> {
        let v = |base: &str| params.value(&self.param_name(base));
        Ok(match self.kind {
            ComponentKind::Gaussian => {
                let (a, c, s) = (v("amplitude")?, v("center")?, v("sigma")?);
                x.iter().map(|&xi| gaussian(xi, a, c, s)).collect()
            }
            ComponentKind::Lorentzian => {
                let (a, c, s) = (v("amplitude")?, v("center")?, v("sigma")?);
                x.iter().map(|&xi| lorentzian(xi, a, c, s)).collect()
            }
            ComponentKind::PseudoVoigt => {
                let (a, c, s, f) = (v("amplitude")?, v("center")?, v("sigma")?, v("fraction")?);
                x.iter().map(|&xi| pseudo_voigt(xi, a, c, s, f)).collect()
            }
            ComponentKind::Linear => {
                let (m, b) = (v("slope")?, v("intercept")?);
                x.iter().map(|&xi| m * xi + b).collect()
            }
            ComponentKind::Constant => {
                let c = v("c")?;
                vec![c; x.len()]
            }
        })
    }
}

// ---------------------------------------------------------------------------
// CompositeModel – sum of components
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CompositeModel {
    pub components: Vec<Component>,
}

impl CompositeModel {
    pub fn new(components: Vec<Component>) -> Self {
        CompositeModel { components }
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    pub fn prefixes(&self) -> Vec<String> {
        self.components.iter().map(|c| c.prefix.clone()).collect()
    }

    /// Fresh parameter collection with default values and derived constraints.
    pub fn make_params(&self) -> Parameters {
        let mut params = Parameters::new();
        for comp in &self.components {
            for p in comp.make_params() {
                params.add(p);
            }
        }
        // Derived expressions only reference parameters declared above.
        if let Err(e) = params.update_constraints() {
            log::warn!("default constraints failed to evaluate: {e}");
        }
        params
    }

    pub fn eval(&self, params: &Parameters, x: &[f64]) -> Result<Vec<f64>, XpsError> {
        let mut total = vec![0.0; x.len()];
        for comp in &self.components {
            for (t, v) in total.iter_mut().zip(comp.eval(params, x)?) {
                *t += v;
            }
        }
        Ok(total)
    }

    /// Each component's contribution, keyed by prefix, in model order.
    pub fn eval_components(
        &self,
        params: &Parameters,
        x: &[f64],
    ) -> Result<Vec<(String, Vec<f64>)>, XpsError> {
        self.components
            .iter()
            .map(|c| Ok((c.prefix.clone(), c.eval(params, x)?)))
            .collect()
    }

    /// Linear background plus one pseudo-Voigt peak with starting values
    /// estimated from the data.
    pub fn auto(x: &[f64], y: &[f64]) -> (Self, Parameters) {
        let model = CompositeModel::new(vec![
            Component::new(ComponentKind::Linear, "bg_"),
            Component::new(ComponentKind::PseudoVoigt, "p1_"),
        ]);
        let mut params = model.make_params();
        if let Some(guess) = PeakGuess::from_data(x, y) {
            let set = |params: &mut Parameters, name: &str, v: f64| {
                if let Some(p) = params.get_mut(name) {
                    p.set_value(v);
                }
            };
            set(&mut params, "bg_slope", guess.slope);
            set(&mut params, "bg_intercept", guess.intercept);
            set(&mut params, "p1_center", guess.center);
            set(&mut params, "p1_sigma", guess.sigma);
            set(&mut params, "p1_amplitude", guess.amplitude);
            if let Err(e) = params.update_constraints() {
                log::warn!("auto model constraints failed: {e}");
            }
        }
        (model, params)
    }
}

/// Starting values for a single peak on a straight background.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PeakGuess {
    pub slope: f64,
    pub intercept: f64,
    pub center: f64,
    pub sigma: f64,
    pub amplitude: f64,
}

impl PeakGuess {
    pub fn from_data(x: &[f64], y: &[f64]) -> Option<Self> {
        if x.len() != y.len() || x.len() < 3 {
            return None;
        }
        let n = x.len();
        let dx = x[n - 1] - x[0];
        let slope = if dx.abs() > f64::EPSILON {
            (y[n - 1] - y[0]) / dx
        } else {
            0.0
        };
        let intercept = y[0] - slope * x[0];

        let net: Vec<f64> = x
            .iter()
            .zip(y)
            .map(|(&xi, &yi)| yi - (slope * xi + intercept))
            .collect();
        let (imax, &height) = net
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))?;
        if height <= 0.0 {
            return None;
        }

        // Half width from the points where the net signal drops below half.
        let half = height / 2.0;
        let left = (0..imax).rev().find(|&i| net[i] < half).unwrap_or(0);
        let right = (imax..n).find(|&i| net[i] < half).unwrap_or(n - 1);
        let fwhm = (x[right] - x[left]).abs().max(f64::EPSILON);
        let sigma = fwhm / 2.0;

        Some(PeakGuess {
            slope,
            intercept,
            center: x[imax],
            sigma,
            // pseudo-Voigt (fraction 0.5) height ≈ 0.5·A/(σ·1.0645) + 0.5·A/(πσ)
            amplitude: height * sigma / (0.5 / 1.0645 + 0.5 / PI),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid(lo: f64, hi: f64, n: usize) -> Vec<f64> {
        (0..n)
            .map(|i| lo + (hi - lo) * i as f64 / (n - 1) as f64)
            .collect()
    }

    #[test]
    fn test_peak_areas_are_amplitude() {
        let x = grid(-200.0, 200.0, 40001);
        let dx = x[1] - x[0];
        let area = |f: &dyn Fn(f64) -> f64| x.iter().map(|&xi| f(xi) * dx).sum::<f64>();
        assert!((area(&|xi| gaussian(xi, 3.0, 1.0, 0.7)) - 3.0).abs() < 1e-6);
        // Lorentzian tails are long; truncated integral is close but below.
        assert!((area(&|xi| lorentzian(xi, 3.0, 1.0, 0.7)) - 3.0).abs() < 0.02);
    }

    #[test]
    fn test_derived_height_matches_curve_maximum() {
        let model = CompositeModel::new(vec![Component::new(ComponentKind::PseudoVoigt, "p1_")]);
        let mut params = model.make_params();
        params.get_mut("p1_amplitude").unwrap().set_value(10.0);
        params.get_mut("p1_sigma").unwrap().set_value(0.8);
        params.get_mut("p1_center").unwrap().set_value(99.0);
        params.update_constraints().unwrap();

        let peak = model.eval(&params, &[99.0]).unwrap()[0];
        let height = params.value("p1_height").unwrap();
        assert!((peak - height).abs() < 1e-5 * height);
        assert!((params.value("p1_fwhm").unwrap() - 1.6).abs() < 1e-12);
    }

    #[test]
    fn test_components_sum_to_model() {
        let model = CompositeModel::new(vec![
            Component::new(ComponentKind::Linear, "bg_"),
            Component::new(ComponentKind::Gaussian, "a_"),
            Component::new(ComponentKind::Lorentzian, "b_"),
        ]);
        let mut params = model.make_params();
        params.get_mut("bg_slope").unwrap().set_value(0.1);
        params.get_mut("b_center").unwrap().set_value(2.0);
        let x = grid(-5.0, 5.0, 21);

        let total = model.eval(&params, &x).unwrap();
        let parts = model.eval_components(&params, &x).unwrap();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[1].0, "a_");
        for i in 0..x.len() {
            let s: f64 = parts.iter().map(|(_, v)| v[i]).sum();
            assert!((s - total[i]).abs() < 1e-12);
        }
    }

    #[test]
    fn test_missing_parameter_is_error() {
        let model = CompositeModel::new(vec![Component::new(ComponentKind::Constant, "k_")]);
        let params = Parameters::new();
        assert_eq!(
            model.eval(&params, &[0.0]),
            Err(XpsError::UnknownParameter("k_c".to_string()))
        );
    }

    #[test]
    fn test_auto_guess_finds_peak() {
        let x = grid(95.0, 110.0, 151);
        let y: Vec<f64> = x
            .iter()
            .map(|&xi| 50.0 + 2.0 * xi + pseudo_voigt(xi, 400.0, 103.0, 0.9, 0.5))
            .collect();
        let (model, params) = CompositeModel::auto(&x, &y);
        assert_eq!(model.prefixes(), vec!["bg_".to_string(), "p1_".to_string()]);
        assert!((params.value("p1_center").unwrap() - 103.0).abs() < 0.2);
        assert!(params.value("p1_sigma").unwrap() > 0.3);
    }
}
