use levenberg_marquardt::{LeastSquaresProblem, LevenbergMarquardt, TerminationReason};
use nalgebra::storage::Owned;
use nalgebra::{DMatrix, DVector, Dyn};
use serde::{Deserialize, Serialize};

use super::model::CompositeModel;
use super::params::Parameters;
use super::result::FitResult;
use crate::error::XpsError;

// ---------------------------------------------------------------------------
// Solver options
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FitOptions {
    /// Upper limit on model evaluations.
    pub max_nfev: usize,
    /// Relative reduction of χ² below which the fit is converged.
    pub ftol: f64,
    /// Relative step size below which the fit is converged.
    pub xtol: f64,
}

impl Default for FitOptions {
    fn default() -> Self {
        FitOptions {
            max_nfev: 2000,
            ftol: 1e-10,
            xtol: 1e-10,
        }
    }
}

// ---------------------------------------------------------------------------
// Bounded <-> unbounded parameter mapping
// ---------------------------------------------------------------------------

/// Maps a bounded external value to an unconstrained internal one so the
/// optimizer can step freely.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Transform {
    Free,
    Both(f64, f64),
    Lower(f64),
    Upper(f64),
}

impl Transform {
    fn for_bounds(min: f64, max: f64) -> Self {
        match (min.is_finite(), max.is_finite()) {
            (true, true) => Transform::Both(min, max),
            (true, false) => Transform::Lower(min),
            (false, true) => Transform::Upper(max),
            (false, false) => Transform::Free,
        }
    }

    fn to_internal(self, v: f64) -> f64 {
        match self {
            Transform::Free => v,
            Transform::Both(lo, hi) => {
                if hi <= lo {
                    return 0.0;
                }
                (2.0 * (v - lo) / (hi - lo) - 1.0).clamp(-1.0, 1.0).asin()
            }
            Transform::Lower(lo) => ((v - lo + 1.0).powi(2) - 1.0).max(0.0).sqrt(),
            Transform::Upper(hi) => ((hi - v + 1.0).powi(2) - 1.0).max(0.0).sqrt(),
        }
    }

    fn to_external(self, t: f64) -> f64 {
        match self {
            Transform::Free => t,
            Transform::Both(lo, hi) => lo + (t.sin() + 1.0) * (hi - lo) / 2.0,
            Transform::Lower(lo) => lo - 1.0 + (t * t + 1.0).sqrt(),
            Transform::Upper(hi) => hi + 1.0 - (t * t + 1.0).sqrt(),
        }
    }

    /// d(external)/d(internal), used to carry errors back out.
    fn gradient(self, t: f64) -> f64 {
        match self {
            Transform::Free => 1.0,
            Transform::Both(lo, hi) => t.cos() * (hi - lo) / 2.0,
            Transform::Lower(_) => t / (t * t + 1.0).sqrt(),
            Transform::Upper(_) => -t / (t * t + 1.0).sqrt(),
        }
    }
}

// ---------------------------------------------------------------------------
// Least-squares problem
// ---------------------------------------------------------------------------

/// Residuals `model - data` as a function of the internal (unbounded)
/// coordinates of the free parameters.
struct Problem<'a> {
    model: &'a CompositeModel,
    x: &'a [f64],
    y: &'a [f64],
    names: Vec<String>,
    transforms: Vec<Transform>,
    theta: DVector<f64>,
    params: Parameters,
    residuals: Result<DVector<f64>, XpsError>,
}

impl Problem<'_> {
    /// Parameter set for internal coordinates `theta`, constraints applied.
    fn params_at(&self, theta: &DVector<f64>) -> Result<Parameters, XpsError> {
        let mut params = self.params.clone();
        for (i, name) in self.names.iter().enumerate() {
            if let Some(p) = params.get_mut(name) {
                p.value = self.transforms[i].to_external(theta[i]);
            }
        }
        params.update_constraints()?;
        Ok(params)
    }

    fn residuals_of(&self, params: &Parameters) -> Result<DVector<f64>, XpsError> {
        let model = self.model.eval(params, self.x)?;
        let r = DVector::from_iterator(
            self.y.len(),
            model.iter().zip(self.y).map(|(m, d)| m - d),
        );
        if r.iter().all(|v| v.is_finite()) {
            Ok(r)
        } else {
            Err(XpsError::EmptyFit("model is not finite".to_string()))
        }
    }

    fn residuals_at(&self, theta: &DVector<f64>) -> Result<DVector<f64>, XpsError> {
        self.residuals_of(&self.params_at(theta)?)
    }

    /// Forward-difference Jacobian at the current point.
    fn jacobian_at(&self) -> Result<DMatrix<f64>, XpsError> {
        let r0 = self.residuals.as_ref().map_err(Clone::clone)?;
        let mut jac = DMatrix::zeros(r0.len(), self.theta.len());
        for j in 0..self.theta.len() {
            let h = f64::EPSILON.sqrt() * self.theta[j].abs().max(1.0);
            let mut shifted = self.theta.clone();
            shifted[j] += h;
            let r = self.residuals_at(&shifted)?;
            jac.set_column(j, &((r - r0) / h));
        }
        Ok(jac)
    }
}

impl LeastSquaresProblem<f64, Dyn, Dyn> for Problem<'_> {
    type ResidualStorage = Owned<f64, Dyn>;
    type JacobianStorage = Owned<f64, Dyn, Dyn>;
    type ParameterStorage = Owned<f64, Dyn>;

    fn set_params(&mut self, theta: &DVector<f64>) {
        self.theta.copy_from(theta);
        let evaluated = self.params_at(theta).and_then(|params| {
            let r = self.residuals_of(&params)?;
            Ok((params, r))
        });
        self.residuals = match evaluated {
            Ok((params, r)) => {
                self.params = params;
                Ok(r)
            }
            Err(e) => Err(e),
        };
    }

    fn params(&self) -> DVector<f64> {
        self.theta.clone()
    }

    fn residuals(&self) -> Option<DVector<f64>> {
        self.residuals.as_ref().ok().cloned()
    }

    fn jacobian(&self) -> Option<DMatrix<f64>> {
        self.jacobian_at()
            .map_err(|e| log::debug!("jacobian not available: {e}"))
            .ok()
    }
}

fn describe(reason: &TerminationReason) -> String {
    match reason {
        TerminationReason::ResidualsZero => "exact fit".to_string(),
        TerminationReason::Converged { ftol: true, .. } => {
            "fit converged: relative χ² reduction below ftol".to_string()
        }
        TerminationReason::Converged { .. } => {
            "fit converged: relative step below xtol".to_string()
        }
        TerminationReason::LostPatience => "maximum number of evaluations reached".to_string(),
        other => format!("fit stopped: {other:?}"),
    }
}

/// Levenberg-Marquardt fit of `model` to `(x, y)` starting from `params`.
///
/// Only parameters with `vary` set and no expression move; expression
/// parameters follow them. Bounds are honoured through a sine / square-root
/// change of variables, so the returned values always lie within them.
pub fn fit(
    model: &CompositeModel,
    params: &Parameters,
    x: &[f64],
    y: &[f64],
    options: &FitOptions,
) -> Result<FitResult, XpsError> {
    if x.len() != y.len() {
        return Err(XpsError::ShapeMismatch(format!(
            "energy has {} points but trace has {}",
            x.len(),
            y.len()
        )));
    }
    if x.is_empty() {
        return Err(XpsError::EmptyFit("trace has no data points".to_string()));
    }
    let names = params.free_names();
    if names.is_empty() {
        return Err(XpsError::EmptyFit("no varying parameters".to_string()));
    }

    let mut working = params.clone();
    working.update_constraints()?;
    let transforms: Vec<Transform> = names
        .iter()
        .map(|n| working.require(n).map(|p| Transform::for_bounds(p.min, p.max)))
        .collect::<Result<_, _>>()?;
    let theta = DVector::from_iterator(
        names.len(),
        names
            .iter()
            .zip(&transforms)
            .map(|(n, t)| t.to_internal(working.get(n).map(|p| p.value).unwrap_or(0.0))),
    );

    let mut problem = Problem {
        model,
        x,
        y,
        names,
        transforms,
        theta: theta.clone(),
        params: working,
        residuals: Ok(DVector::zeros(y.len())),
    };
    problem.set_params(&theta);
    if let Err(e) = &problem.residuals {
        return Err(XpsError::EmptyFit(format!("at the starting values: {e}")));
    }

    let nvarys = theta.len();
    let patience = (options.max_nfev / (nvarys + 1)).max(1);
    let (problem, report) = LevenbergMarquardt::new()
        .with_ftol(options.ftol)
        .with_xtol(options.xtol)
        .with_patience(patience)
        .minimize(problem);
    log::debug!("{:?} after {} evaluations", report.termination, report.number_of_evaluations);

    // The solver leaves the problem at the best point it found.
    let r = problem.residuals.clone()?;
    let chisqr = r.norm_squared();
    let ndata = y.len();
    let redchi = (ndata > nvarys).then(|| chisqr / (ndata - nvarys) as f64);

    let covariance = problem
        .jacobian_at()
        .ok()
        .and_then(|jac| (jac.transpose() * &jac).try_inverse());

    let mut result_params = problem.params.clone();
    for p in result_params.iter_mut() {
        p.stderr = None;
    }
    if let Some(cov) = covariance {
        if let Some(redchi) = redchi {
            for (i, name) in problem.names.iter().enumerate() {
                let var = cov[(i, i)] * redchi;
                if var >= 0.0 {
                    let scale = problem.transforms[i].gradient(problem.theta[i]).abs();
                    if let Some(p) = result_params.get_mut(name) {
                        p.stderr = Some(var.sqrt() * scale);
                    }
                }
            }
        }
    } else {
        log::warn!("covariance matrix is singular, standard errors not estimated");
    }

    Ok(FitResult {
        params: result_params,
        chisqr,
        redchi,
        nfev: report.number_of_evaluations,
        ndata,
        nvarys,
        success: report.termination.was_successful(),
        message: describe(&report.termination),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fit::model::{pseudo_voigt, Component, ComponentKind};

    fn energy() -> Vec<f64> {
        (0..201).map(|i| 95.0 + i as f64 * 0.075).collect()
    }

    #[test]
    fn test_transforms_round_trip() {
        for t in [
            Transform::Free,
            Transform::Both(-2.0, 5.0),
            Transform::Lower(1.0),
            Transform::Upper(3.0),
        ] {
            let v = 2.5;
            let back = t.to_external(t.to_internal(v));
            assert!((back - v).abs() < 1e-9, "{t:?}: {back}");
        }
    }

    #[test]
    fn test_recovers_pseudo_voigt_on_background() {
        let x = energy();
        let y: Vec<f64> = x
            .iter()
            .map(|&xi| 120.0 - 0.5 * xi + pseudo_voigt(xi, 800.0, 102.3, 0.7, 0.3))
            .collect();

        let model = CompositeModel::new(vec![
            Component::new(ComponentKind::Linear, "bg_"),
            Component::new(ComponentKind::PseudoVoigt, "p1_"),
        ]);
        let mut params = model.make_params();
        params.get_mut("p1_amplitude").unwrap().set_value(500.0);
        params.get_mut("p1_center").unwrap().set_value(102.0);
        params.get_mut("p1_sigma").unwrap().set_value(1.0);
        params.get_mut("bg_intercept").unwrap().set_value(100.0);

        let result = fit(&model, &params, &x, &y, &FitOptions::default()).unwrap();
        assert!(result.success, "{}", result.message);
        let v = |n: &str| result.params.value(n).unwrap();
        assert!((v("p1_center") - 102.3).abs() < 1e-4);
        assert!((v("p1_sigma") - 0.7).abs() < 1e-4);
        assert!((v("p1_amplitude") - 800.0).abs() < 1e-2);
        assert!((v("p1_fraction") - 0.3).abs() < 1e-4);
        assert!((v("p1_fwhm") - 1.4).abs() < 1e-3);
        assert!(result.chisqr < 1e-6);
        assert_eq!(result.nvarys, 6);
        // The input set is untouched.
        assert_eq!(params.value("p1_center").unwrap(), 102.0);
    }

    #[test]
    fn test_fixed_and_bounded_parameters_respected() {
        let x = energy();
        let y: Vec<f64> = x
            .iter()
            .map(|&xi| pseudo_voigt(xi, 300.0, 104.0, 0.6, 0.5))
            .collect();

        let model = CompositeModel::new(vec![Component::new(ComponentKind::PseudoVoigt, "p1_")]);
        let mut params = model.make_params();
        params.get_mut("p1_amplitude").unwrap().set_value(250.0);
        params.get_mut("p1_center").unwrap().set_value(103.5);
        params.get_mut("p1_sigma").unwrap().set_value(0.6);
        params.get_mut("p1_sigma").unwrap().set_vary(false);
        {
            let c = params.get_mut("p1_center").unwrap();
            c.set_min(103.0).unwrap();
            c.set_max(103.8).unwrap();
        }

        let result = fit(&model, &params, &x, &y, &FitOptions::default()).unwrap();
        let v = |n: &str| result.params.value(n).unwrap();
        assert_eq!(v("p1_sigma"), 0.6);
        assert!(v("p1_center") <= 103.8 + 1e-12);
        assert!(v("p1_center") >= 103.0);
        assert!(result.params.get("p1_sigma").unwrap().stderr.is_none());
        assert_eq!(result.nvarys, 3);
    }

    #[test]
    fn test_constrained_parameter_kept_within_bounds() {
        let x = energy();
        let y: Vec<f64> = x
            .iter()
            .map(|&xi| pseudo_voigt(xi, 600.0, 99.4, 0.5, 0.3) + pseudo_voigt(xi, 300.0, 100.0, 0.5, 0.3))
            .collect();

        let model = CompositeModel::new(vec![
            Component::new(ComponentKind::PseudoVoigt, "si32_"),
            Component::new(ComponentKind::PseudoVoigt, "si12_"),
        ]);
        let mut params = model.make_params();
        for (name, v) in [
            ("si32_amplitude", 500.0),
            ("si32_center", 99.3),
            ("si32_sigma", 0.6),
            ("si12_center", 99.9),
            ("si12_sigma", 0.6),
        ] {
            params.get_mut(name).unwrap().set_value(v);
        }
        {
            let amp = params.get_mut("si12_amplitude").unwrap();
            amp.set_expr("0.5 * si32_amplitude").unwrap();
            amp.set_max(100.0).unwrap();
        }

        let result = fit(&model, &params, &x, &y, &FitOptions::default()).unwrap();
        let amp = result.params.value("si12_amplitude").unwrap();
        assert!(amp <= 100.0, "{amp}");
        assert!(result.chisqr.is_finite());
        assert!(result.nfev > 0);
    }

    #[test]
    fn test_nothing_to_fit() {
        let model = CompositeModel::new(vec![Component::new(ComponentKind::Constant, "k_")]);
        let mut params = model.make_params();
        params.get_mut("k_c").unwrap().set_vary(false);
        let err = fit(&model, &params, &[1.0, 2.0], &[1.0, 1.0], &FitOptions::default());
        assert!(matches!(err, Err(XpsError::EmptyFit(_))));

        let err = fit(&model, &model.make_params(), &[1.0], &[1.0, 2.0], &FitOptions::default());
        assert!(matches!(err, Err(XpsError::ShapeMismatch(_))));
    }
}
