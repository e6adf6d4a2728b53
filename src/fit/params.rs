use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use super::expr::Expr;
use crate::error::XpsError;

// ---------------------------------------------------------------------------
// Parameter – one named fit coefficient
// ---------------------------------------------------------------------------

/// A named model coefficient with bounds, an optional constraint expression
/// and a vary flag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    pub value: f64,
    #[serde(with = "lower_bound", default = "neg_inf")]
    pub min: f64,
    #[serde(with = "upper_bound", default = "pos_inf")]
    pub max: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expr: Option<String>,
    #[serde(default = "default_vary")]
    pub vary: bool,
    /// Standard error estimated by the last fit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stderr: Option<f64>,
}

fn neg_inf() -> f64 {
    f64::NEG_INFINITY
}

fn pos_inf() -> f64 {
    f64::INFINITY
}

fn default_vary() -> bool {
    true
}

// JSON has no infinity: unbounded sides are written as `null`.
mod lower_bound {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(v: &f64, s: S) -> Result<S::Ok, S::Error> {
        if v.is_finite() {
            s.serialize_some(v)
        } else {
            s.serialize_none()
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<f64, D::Error> {
        Ok(Option::<f64>::deserialize(d)?.unwrap_or(f64::NEG_INFINITY))
    }
}

mod upper_bound {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(v: &f64, s: S) -> Result<S::Ok, S::Error> {
        if v.is_finite() {
            s.serialize_some(v)
        } else {
            s.serialize_none()
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<f64, D::Error> {
        Ok(Option::<f64>::deserialize(d)?.unwrap_or(f64::INFINITY))
    }
}

impl Parameter {
    pub fn new(name: &str, value: f64) -> Self {
        Parameter {
            name: name.to_string(),
            value,
            min: f64::NEG_INFINITY,
            max: f64::INFINITY,
            expr: None,
            vary: true,
            stderr: None,
        }
    }

    pub fn with_bounds(mut self, min: f64, max: f64) -> Self {
        self.min = min;
        self.max = max;
        self.value = self.value.clamp(min, max);
        self
    }

    pub fn with_expr(mut self, expr: &str) -> Self {
        self.expr = Some(expr.to_string());
        self.vary = false;
        self
    }

    /// Whether the optimizer moves this parameter.
    pub fn is_free(&self) -> bool {
        self.vary && self.expr.is_none()
    }

    pub fn set_value(&mut self, value: f64) {
        self.value = value.clamp(self.min, self.max);
    }

    pub fn set_min(&mut self, min: f64) -> Result<(), XpsError> {
        if min > self.max {
            return Err(XpsError::InvalidBounds {
                name: self.name.clone(),
                min,
                max: self.max,
            });
        }
        self.min = min;
        self.value = self.value.max(min);
        Ok(())
    }

    pub fn set_max(&mut self, max: f64) -> Result<(), XpsError> {
        if max < self.min {
            return Err(XpsError::InvalidBounds {
                name: self.name.clone(),
                min: self.min,
                max,
            });
        }
        self.max = max;
        self.value = self.value.min(max);
        Ok(())
    }

    /// Set or clear (empty string) the constraint expression. A constrained
    /// parameter never varies.
    pub fn set_expr(&mut self, expr: &str) -> Result<(), XpsError> {
        let expr = expr.trim();
        if expr.is_empty() {
            self.expr = None;
            return Ok(());
        }
        Expr::parse(expr).map_err(|e| XpsError::Expression {
            name: self.name.clone(),
            message: e.to_string(),
        })?;
        self.expr = Some(expr.to_string());
        self.vary = false;
        Ok(())
    }

    /// Turning `vary` on releases the parameter from its expression.
    pub fn set_vary(&mut self, vary: bool) {
        if vary {
            self.expr = None;
        }
        self.vary = vary;
    }
}

// ---------------------------------------------------------------------------
// Parameters – the ordered collection shared by model, panel and solver
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Parameters {
    params: Vec<Parameter>,
}

impl Parameters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace by name, keeping first-insertion order.
    pub fn add(&mut self, param: Parameter) {
        match self.params.iter_mut().find(|p| p.name == param.name) {
            Some(existing) => *existing = param,
            None => self.params.push(param),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Parameter> {
        self.params.iter().find(|p| p.name == name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Parameter> {
        self.params.iter_mut().find(|p| p.name == name)
    }

    /// Look up a parameter or fail with [`XpsError::UnknownParameter`].
    pub fn require(&self, name: &str) -> Result<&Parameter, XpsError> {
        self.get(name)
            .ok_or_else(|| XpsError::UnknownParameter(name.to_string()))
    }

    pub fn value(&self, name: &str) -> Result<f64, XpsError> {
        self.require(name).map(|p| p.value)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Parameter> {
        self.params.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, Parameter> {
        self.params.iter_mut()
    }

    /// Names of the parameters the optimizer moves, in collection order.
    pub fn free_names(&self) -> Vec<String> {
        self.params
            .iter()
            .filter(|p| p.is_free())
            .map(|p| p.name.clone())
            .collect()
    }

    /// Recompute every expression-constrained value, dependencies first.
    pub fn update_constraints(&mut self) -> Result<(), XpsError> {
        let order = self.constraint_order()?;
        for idx in order {
            let source = match &self.params[idx].expr {
                Some(s) => s.clone(),
                None => continue,
            };
            let name = self.params[idx].name.clone();
            let expr = Expr::parse(&source).map_err(|e| XpsError::Expression {
                name: name.clone(),
                message: e.to_string(),
            })?;
            let value = {
                let lookup = |n: &str| self.get(n).map(|p| p.value);
                expr.eval(&lookup).map_err(|e| XpsError::Expression {
                    name: name.clone(),
                    message: e.to_string(),
                })?
            };
            if !value.is_finite() {
                return Err(XpsError::Expression {
                    name,
                    message: format!("'{source}' evaluates to {value}"),
                });
            }
            let p = &mut self.params[idx];
            p.value = value.clamp(p.min, p.max);
        }
        Ok(())
    }

    /// Topological order of expression parameters (indices into `params`).
    fn constraint_order(&self) -> Result<Vec<usize>, XpsError> {
        let mut deps: BTreeMap<usize, BTreeSet<usize>> = BTreeMap::new();
        for (i, p) in self.params.iter().enumerate() {
            let Some(source) = &p.expr else {
                continue;
            };
            let expr = Expr::parse(source).map_err(|e| XpsError::Expression {
                name: p.name.clone(),
                message: e.to_string(),
            })?;
            let mut on = BTreeSet::new();
            for dep in expr.names() {
                let j = self
                    .params
                    .iter()
                    .position(|q| q.name == dep)
                    .ok_or_else(|| XpsError::Expression {
                        name: p.name.clone(),
                        message: format!("unknown name '{dep}'"),
                    })?;
                if self.params[j].expr.is_some() {
                    on.insert(j);
                }
            }
            deps.insert(i, on);
        }

        let mut order = Vec::with_capacity(deps.len());
        let mut done: BTreeSet<usize> = BTreeSet::new();
        while done.len() < deps.len() {
            let ready: Vec<usize> = deps
                .iter()
                .filter(|(i, on)| !done.contains(i) && on.iter().all(|d| done.contains(d)))
                .map(|(i, _)| *i)
                .collect();
            if ready.is_empty() {
                let stuck = deps
                    .keys()
                    .find(|i| !done.contains(i))
                    .map(|&i| self.params[i].name.clone())
                    .unwrap_or_default();
                return Err(XpsError::ExpressionCycle(stuck));
            }
            for i in ready {
                done.insert(i);
                order.push(i);
            }
        }
        Ok(order)
    }
}

impl<'a> IntoIterator for &'a Parameters {
    type Item = &'a Parameter;
    type IntoIter = std::slice::Iter<'a, Parameter>;

    fn into_iter(self) -> Self::IntoIter {
        self.params.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_params() -> Parameters {
        let mut params = Parameters::new();
        params.add(Parameter::new("p1_sigma", 1.0).with_bounds(0.0, f64::INFINITY));
        params.add(Parameter::new("p1_fwhm", 0.0).with_expr("2.3548200 * p1_sigma"));
        params.add(Parameter::new("p2_sigma", 0.0).with_expr("p1_sigma"));
        params
    }

    #[test]
    fn test_bounds_clip_value() {
        let mut p = Parameter::new("a", 5.0);
        p.set_min(6.0).unwrap();
        assert_eq!(p.value, 6.0);
        p.set_max(7.0).unwrap();
        p.set_value(10.0);
        assert_eq!(p.value, 7.0);
        assert!(matches!(
            p.set_max(1.0),
            Err(XpsError::InvalidBounds { .. })
        ));
        assert_eq!(p.max, 7.0);
    }

    #[test]
    fn test_expr_disables_vary() {
        let mut p = Parameter::new("a", 1.0);
        p.set_expr("b * 2").unwrap();
        assert!(!p.vary);
        assert!(!p.is_free());
        p.set_expr("  ").unwrap();
        assert!(p.expr.is_none());
        assert!(p.set_expr("b *").is_err());
    }

    #[test]
    fn test_update_constraints_in_dependency_order() {
        let mut params = sample_params();
        params.add(Parameter::new("p2_fwhm", 0.0).with_expr("2 * p2_sigma"));
        params.get_mut("p1_sigma").unwrap().set_value(2.0);
        params.update_constraints().unwrap();
        assert!((params.value("p1_fwhm").unwrap() - 4.70964).abs() < 1e-9);
        assert!((params.value("p2_fwhm").unwrap() - 4.0).abs() < 1e-12);
        assert_eq!(params.free_names(), vec!["p1_sigma".to_string()]);
    }

    #[test]
    fn test_constrained_value_stays_in_bounds() {
        let mut params = Parameters::new();
        params.add(Parameter::new("a", 400.0));
        params.add(
            Parameter::new("b", 0.0)
                .with_bounds(0.0, 10.0)
                .with_expr("0.5 * a"),
        );
        params.update_constraints().unwrap();
        assert_eq!(params.value("b").unwrap(), 10.0);

        params.get_mut("a").unwrap().set_value(-4.0);
        params.update_constraints().unwrap();
        assert_eq!(params.value("b").unwrap(), 0.0);
    }

    #[test]
    fn test_non_finite_expression_rejected() {
        let mut params = Parameters::new();
        params.add(Parameter::new("a", 400.0));
        params.add(Parameter::new("b", 1.0).with_expr("sqrt(0 - a)"));
        assert!(matches!(
            params.update_constraints(),
            Err(XpsError::Expression { .. })
        ));
        assert_eq!(params.value("b").unwrap(), 1.0);

        params.get_mut("b").unwrap().set_expr("1 / (a - a)").unwrap();
        assert!(params.update_constraints().is_err());
    }

    #[test]
    fn test_vary_releases_expression() {
        let mut p = Parameter::new("a", 1.0).with_expr("b * 2");
        p.set_vary(false);
        assert!(p.expr.is_some());
        p.set_vary(true);
        assert!(p.expr.is_none());
        assert!(p.is_free());
    }

    #[test]
    fn test_cycle_detected() {
        let mut params = Parameters::new();
        params.add(Parameter::new("a", 0.0).with_expr("b + 1"));
        params.add(Parameter::new("b", 0.0).with_expr("a - 1"));
        assert!(matches!(
            params.update_constraints(),
            Err(XpsError::ExpressionCycle(_))
        ));
    }

    #[test]
    fn test_serde_infinite_bounds() {
        let params = sample_params();
        let text = serde_json::to_string(&params).unwrap();
        assert!(text.contains("\"max\":null"));
        let back: Parameters = serde_json::from_str(&text).unwrap();
        assert_eq!(back, params);
    }
}
