use serde::{Deserialize, Serialize};

use super::params::Parameters;

/// Snapshot of one completed fit. Read-only once stored on a spectrum.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitResult {
    pub params: Parameters,
    pub chisqr: f64,
    /// `None` when there are no more data points than varying parameters.
    pub redchi: Option<f64>,
    pub nfev: usize,
    pub ndata: usize,
    pub nvarys: usize,
    pub success: bool,
    pub message: String,
}

impl FitResult {
    /// One-line summary for the status bar and logs.
    pub fn summary(&self) -> String {
        let redchi = self
            .redchi
            .map(|r| format!("{r:.4e}"))
            .unwrap_or_else(|| "n/a".to_string());
        format!(
            "{} after {} evaluations, χ²={:.4e}, reduced χ²={redchi}",
            self.message, self.nfev, self.chisqr
        )
    }
}
