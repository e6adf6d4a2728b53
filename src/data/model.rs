use std::collections::BTreeMap;
use std::fmt;

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

use crate::error::XpsError;
use crate::fit::{CompositeModel, FitResult, Parameters};

// ---------------------------------------------------------------------------
// SpectrumKey – addresses one spectrum inside an archive
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SpectrumKey {
    pub sample: String,
    pub spectrum: String,
}

impl SpectrumKey {
    pub fn new(sample: &str, spectrum: &str) -> Self {
        SpectrumKey {
            sample: sample.to_string(),
            spectrum: spectrum.to_string(),
        }
    }
}

impl fmt::Display for SpectrumKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} / {}", self.sample, self.spectrum)
    }
}

// ---------------------------------------------------------------------------
// Spectrum – one element scan with its model
// ---------------------------------------------------------------------------

/// One measured region (e.g. `Si2p`): a binding-energy axis, one or more
/// intensity traces on that axis, and the fit model applied to them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Spectrum {
    pub name: String,
    /// Binding energy axis (eV).
    pub energy: Vec<f64>,
    /// Intensity traces (counts/s), each the same length as `energy`.
    pub traces: Vec<Vec<f64>>,
    #[serde(default)]
    pub model: CompositeModel,
    /// Live parameters edited by the panel and used as fit starting values.
    #[serde(default)]
    pub params: Parameters,
    /// Component prefixes summed and shaded together, e.g. a doublet.
    #[serde(default)]
    pub groups: Vec<Vec<String>>,
    /// Stored fit results keyed by trace index.
    #[serde(default)]
    pub fit_results: BTreeMap<usize, FitResult>,
}

impl Spectrum {
    pub fn new(name: &str, energy: Vec<f64>, traces: Vec<Vec<f64>>) -> Self {
        Spectrum {
            name: name.to_string(),
            energy,
            traces,
            model: CompositeModel::default(),
            params: Parameters::new(),
            groups: Vec::new(),
            fit_results: BTreeMap::new(),
        }
    }

    /// Number of traces.
    pub fn len(&self) -> usize {
        self.traces.len()
    }

    /// Whether the spectrum holds no traces.
    pub fn is_empty(&self) -> bool {
        self.traces.is_empty()
    }

    pub fn trace(&self, index: usize) -> Result<&[f64], XpsError> {
        self.traces
            .get(index)
            .map(|t| t.as_slice())
            .ok_or(XpsError::TraceOutOfRange {
                index,
                len: self.traces.len(),
            })
    }

    pub fn fit_result(&self, index: usize) -> Result<&FitResult, XpsError> {
        self.fit_results
            .get(&index)
            .ok_or(XpsError::NoFitResult(index))
    }

    /// Component groups to shade. Without explicit groups every peak is its
    /// own group and backgrounds are left unshaded.
    pub fn component_groups(&self) -> Vec<Vec<String>> {
        if !self.groups.is_empty() {
            return self.groups.clone();
        }
        self.model
            .components
            .iter()
            .filter(|c| c.kind.is_peak())
            .map(|c| vec![c.prefix.clone()])
            .collect()
    }

    /// Check array shapes, build a model when there is none and fill in
    /// missing parameters.
    pub fn prepare(&mut self) -> Result<()> {
        for (i, trace) in self.traces.iter().enumerate() {
            if trace.len() != self.energy.len() {
                bail!(
                    "spectrum '{}': trace {i} has {} values but energy has {}",
                    self.name,
                    trace.len(),
                    self.energy.len()
                );
            }
        }
        if self.model.is_empty() {
            if let Some(first) = self.traces.first() {
                let (model, params) = CompositeModel::auto(&self.energy, first);
                self.model = model;
                self.params = params;
            }
        } else {
            // Stored parameters win; anything the model needs beyond them
            // gets its default.
            for default in &self.model.make_params() {
                if self.params.get(&default.name).is_none() {
                    self.params.add(default.clone());
                }
            }
        }
        let prefixes = self.model.prefixes();
        for group in &self.groups {
            for prefix in group {
                if !prefixes.contains(prefix) {
                    bail!(
                        "spectrum '{}': group references unknown component '{prefix}'",
                        self.name
                    );
                }
            }
        }
        if let Err(e) = self.params.update_constraints() {
            bail!("spectrum '{}': {e}", self.name);
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Sample / SampleArchive
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub name: String,
    /// Model shared by every spectrum that does not define its own.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<CompositeModel>,
    pub spectra: Vec<Spectrum>,
}

impl Sample {
    pub fn spectrum_names(&self) -> Vec<String> {
        self.spectra.iter().map(|s| s.name.clone()).collect()
    }
}

/// Everything loaded from one file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SampleArchive {
    pub samples: Vec<Sample>,
}

impl SampleArchive {
    /// Apply shared models, build missing parameters and validate shapes.
    pub fn prepare(&mut self) -> Result<()> {
        for sample in &mut self.samples {
            for spectrum in &mut sample.spectra {
                if spectrum.model.is_empty() {
                    if let Some(shared) = &sample.model {
                        spectrum.model = shared.clone();
                        spectrum.params = Parameters::new();
                    }
                }
                spectrum.prepare()?;
            }
        }
        Ok(())
    }

    pub fn spectrum_count(&self) -> usize {
        self.samples.iter().map(|s| s.spectra.len()).sum()
    }

    pub fn spectrum(&self, key: &SpectrumKey) -> Option<&Spectrum> {
        self.samples
            .iter()
            .find(|s| s.name == key.sample)?
            .spectra
            .iter()
            .find(|sp| sp.name == key.spectrum)
    }

    /// Write an edited spectrum back in place. Returns false if the key is
    /// not part of the archive.
    pub fn replace(&mut self, key: &SpectrumKey, spectrum: Spectrum) -> bool {
        let slot = self
            .samples
            .iter_mut()
            .find(|s| s.name == key.sample)
            .and_then(|s| s.spectra.iter_mut().find(|sp| sp.name == key.spectrum));
        match slot {
            Some(slot) => {
                *slot = spectrum;
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fit::{Component, ComponentKind};

    fn doublet_model() -> CompositeModel {
        CompositeModel::new(vec![
            Component::new(ComponentKind::Constant, "bg_"),
            Component::new(ComponentKind::Gaussian, "si32_"),
            Component::new(ComponentKind::Gaussian, "si12_"),
        ])
    }

    #[test]
    fn test_shared_model_is_applied() {
        let mut archive = SampleArchive {
            samples: vec![Sample {
                name: "205".to_string(),
                model: Some(doublet_model()),
                spectra: vec![Spectrum::new("Si2p", vec![1.0, 2.0], vec![vec![3.0, 4.0]])],
            }],
        };
        archive.prepare().unwrap();
        let sp = archive.spectrum(&SpectrumKey::new("205", "Si2p")).unwrap();
        assert_eq!(sp.model, doublet_model());
        assert!(sp.params.get("si12_center").is_some());
        assert_eq!(
            sp.component_groups(),
            vec![vec!["si32_".to_string()], vec!["si12_".to_string()]]
        );
    }

    #[test]
    fn test_stored_params_kept_and_missing_filled() {
        use crate::fit::Parameter;

        let mut sp = Spectrum::new("Si2p", vec![99.0, 100.0], vec![vec![1.0, 2.0]]);
        sp.model = doublet_model();
        sp.params.add(Parameter::new("si32_center", 99.4));
        sp.params
            .add(Parameter::new("si12_center", 0.0).with_expr("si32_center + 0.61"));
        sp.prepare().unwrap();

        assert_eq!(sp.params.value("si32_center").unwrap(), 99.4);
        assert!((sp.params.value("si12_center").unwrap() - 100.01).abs() < 1e-9);
        assert_eq!(sp.params.value("si32_sigma").unwrap(), 1.0);
        assert!(sp.params.get("si12_fwhm").is_some());
    }

    #[test]
    fn test_shape_mismatch_rejected() {
        let mut sp = Spectrum::new("C1s", vec![1.0, 2.0, 3.0], vec![vec![1.0, 2.0]]);
        sp.model = doublet_model();
        assert!(sp.prepare().is_err());
    }

    #[test]
    fn test_unknown_group_rejected() {
        let mut sp = Spectrum::new("C1s", vec![1.0, 2.0], vec![vec![1.0, 2.0]]);
        sp.model = doublet_model();
        sp.groups = vec![vec!["nope_".to_string()]];
        assert!(sp.prepare().is_err());
    }

    #[test]
    fn test_trace_and_fit_result_lookup() {
        let sp = Spectrum::new("O1s", vec![1.0], vec![vec![1.0]]);
        assert!(sp.trace(0).is_ok());
        assert_eq!(
            sp.trace(1),
            Err(XpsError::TraceOutOfRange { index: 1, len: 1 })
        );
        assert_eq!(sp.fit_result(0).err(), Some(XpsError::NoFitResult(0)));
    }

    #[test]
    fn test_replace_by_key() {
        let mut archive = SampleArchive {
            samples: vec![Sample {
                name: "s".to_string(),
                model: None,
                spectra: vec![Spectrum::new("a", vec![], vec![])],
            }],
        };
        let mut edited = Spectrum::new("a", vec![1.0], vec![]);
        edited.groups.push(vec![]);
        assert!(archive.replace(&SpectrumKey::new("s", "a"), edited.clone()));
        assert_eq!(archive.spectrum(&SpectrumKey::new("s", "a")), Some(&edited));
        assert!(!archive.replace(&SpectrumKey::new("s", "b"), edited));
    }
}
