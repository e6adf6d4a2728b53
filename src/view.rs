use crate::config::ViewerConfig;
use crate::data::model::{Spectrum, SpectrumKey};
use crate::error::XpsError;
use crate::fit::solver;
use crate::fit::{FitOptions, Parameters};
use crate::panel::{PanelState, ParamEdit, ParamMessage};
use crate::tree::CheckTree;

// ---------------------------------------------------------------------------
// Two-state window handle
// ---------------------------------------------------------------------------

/// An auxiliary window that is either closed or open with its state.
#[derive(Debug, Clone, PartialEq)]
pub enum WindowState<T> {
    Closed,
    Open(T),
}

impl<T> Default for WindowState<T> {
    fn default() -> Self {
        WindowState::Closed
    }
}

impl<T> WindowState<T> {
    pub fn is_open(&self) -> bool {
        matches!(self, WindowState::Open(_))
    }

    /// Open with `make()` when closed, close when open.
    pub fn toggle(&mut self, make: impl FnOnce() -> T) {
        *self = match std::mem::take(self) {
            WindowState::Closed => WindowState::Open(make()),
            WindowState::Open(_) => WindowState::Closed,
        };
    }

    pub fn close(&mut self) {
        *self = WindowState::Closed;
    }

    pub fn as_mut(&mut self) -> Option<&mut T> {
        match self {
            WindowState::Open(inner) => Some(inner),
            WindowState::Closed => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Plot frame – everything the renderer draws, in data coordinates
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct GroupCurve {
    pub label: String,
    pub points: Vec<[f64; 2]>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlotFrame {
    pub index: usize,
    pub from_fit_result: bool,
    /// Measured points of the selected trace.
    pub data: Vec<[f64; 2]>,
    /// Total model curve.
    pub model: Vec<[f64; 2]>,
    /// Summed contribution of each component group.
    pub groups: Vec<GroupCurve>,
    /// Other traces checked in the trace tree window.
    pub overlays: Vec<(usize, Vec<[f64; 2]>)>,
    /// Energy axis limits, high to low (binding energy convention).
    pub x_limits: (f64, f64),
}

fn zip_points(x: &[f64], y: &[f64]) -> Vec<[f64; 2]> {
    x.iter().zip(y).map(|(&xi, &yi)| [xi, yi]).collect()
}

// ---------------------------------------------------------------------------
// FitView – one open spectrum
// ---------------------------------------------------------------------------

pub struct FitView {
    pub key: SpectrumKey,
    pub spectrum: Spectrum,
    /// Trace shown in the plot.
    pub index: usize,
    pub show_fit_result: bool,
    pub grid: bool,
    /// Which traces the Fit button fits ("All" → one leaf per index).
    pub fit_tree: CheckTree<usize>,
    pub param_panel: WindowState<PanelState>,
    pub trace_window: WindowState<CheckTree<usize>>,
    pub status: Option<String>,
    frame: Option<PlotFrame>,
    fit_options: FitOptions,
    slider_steps: usize,
}

impl FitView {
    pub fn new(key: SpectrumKey, spectrum: Spectrum, config: &ViewerConfig) -> Self {
        let fit_tree = index_tree(&spectrum);
        let mut view = FitView {
            key,
            spectrum,
            index: 0,
            show_fit_result: false,
            grid: false,
            fit_tree,
            param_panel: WindowState::Closed,
            trace_window: WindowState::Closed,
            status: None,
            frame: None,
            fit_options: config.fit,
            slider_steps: config.slider_steps,
        };
        view.redraw();
        view
    }

    pub fn frame(&self) -> Option<&PlotFrame> {
        self.frame.as_ref()
    }

    /// Compute the curves for trace `index` using the live parameters, or the
    /// stored fit result for that index when `show_fit_result` is set.
    pub fn render(&self, index: usize, show_fit_result: bool) -> Result<PlotFrame, XpsError> {
        let sp = &self.spectrum;
        let trace = sp.trace(index)?;
        let params: &Parameters = if show_fit_result {
            &sp.fit_result(index)?.params
        } else {
            &sp.params
        };

        let x = &sp.energy;
        let model = sp.model.eval(params, x)?;
        let components = sp.model.eval_components(params, x)?;

        let groups = sp
            .component_groups()
            .into_iter()
            .map(|group| {
                let mut sum = vec![0.0; x.len()];
                for (prefix, values) in &components {
                    if group.contains(prefix) {
                        for (s, v) in sum.iter_mut().zip(values) {
                            *s += v;
                        }
                    }
                }
                GroupCurve {
                    label: group.join(" + "),
                    points: zip_points(x, &sum),
                }
            })
            .collect();

        let overlays = match &self.trace_window {
            WindowState::Open(tree) => tree
                .checked_leaves()
                .into_iter()
                .filter(|&i| i != index)
                .filter_map(|i| sp.traces.get(i).map(|t| (i, zip_points(x, t))))
                .collect(),
            WindowState::Closed => Vec::new(),
        };

        let lo = x.iter().copied().fold(f64::INFINITY, f64::min);
        let hi = x.iter().copied().fold(f64::NEG_INFINITY, f64::max);

        Ok(PlotFrame {
            index,
            from_fit_result: show_fit_result,
            data: zip_points(x, trace),
            model: zip_points(x, &model),
            groups,
            overlays,
            x_limits: (hi, lo),
        })
    }

    /// Re-render with the current selection. On failure the previous frame is
    /// kept and the error is reported in `status`.
    pub fn redraw(&mut self) {
        match self.render(self.index, self.show_fit_result) {
            Ok(frame) => {
                self.frame = Some(frame);
                self.status = None;
            }
            Err(e) => {
                log::warn!("{}: {e}", self.key);
                self.status = Some(e.to_string());
            }
        }
    }

    pub fn set_index(&mut self, index: usize) -> Result<(), XpsError> {
        self.render(index, self.show_fit_result)?;
        self.index = index;
        self.redraw();
        Ok(())
    }

    /// Switch between live parameters and the stored fit result. Showing a
    /// fit result that does not exist is refused.
    pub fn set_show_fit_result(&mut self, show: bool) -> Result<(), XpsError> {
        self.render(self.index, show)?;
        self.show_fit_result = show;
        self.redraw();
        Ok(())
    }

    pub fn set_grid(&mut self, grid: bool) {
        self.grid = grid;
    }

    /// Apply one panel edit to the live parameters and redraw.
    pub fn apply(&mut self, msg: &ParamMessage) -> Result<(), XpsError> {
        log::debug!("{}: {} <- {:?}", self.key, msg.name, msg.edit);
        let params = &mut self.spectrum.params;
        let param = params
            .get_mut(&msg.name)
            .ok_or_else(|| XpsError::UnknownParameter(msg.name.clone()))?;

        let previous = param.clone();

        match &msg.edit {
            ParamEdit::Value(v) => param.set_value(*v),
            ParamEdit::Min(v) => param.set_min(*v)?,
            ParamEdit::Max(v) => param.set_max(*v)?,
            ParamEdit::Vary(b) => param.set_vary(*b),
            ParamEdit::Expr(text) => param.set_expr(text)?,
        }
        if let Err(e) = params.update_constraints() {
            // Unknown name, cycle or non-finite result: keep the old state.
            params.add(previous);
            params.update_constraints().ok();
            return Err(e);
        }

        if let WindowState::Open(panel) = &mut self.param_panel {
            if let Some(p) = self.spectrum.params.get(&msg.name) {
                panel.sync_one(p);
            }
        }
        self.redraw();
        Ok(())
    }

    /// Fit every trace checked in the fit tree, each starting from the live
    /// parameters, and store the results. Returns the fitted indices.
    pub fn fit_checked(&mut self) -> Result<Vec<usize>, XpsError> {
        let indices = self.fit_tree.checked_leaves();
        if indices.is_empty() {
            self.status = Some("No traces checked for fitting".to_string());
            return Ok(indices);
        }
        self.fit_indices(&indices)?;
        Ok(indices)
    }

    /// Fit the given traces in order. The first failure stops the run; the
    /// results stored before it are kept and drawn.
    pub fn fit_indices(&mut self, indices: &[usize]) -> Result<(), XpsError> {
        let outcome = self.fit_each(indices);
        self.redraw();
        outcome
    }

    fn fit_each(&mut self, indices: &[usize]) -> Result<(), XpsError> {
        let sp = &mut self.spectrum;
        for &i in indices {
            let trace = sp.trace(i)?;
            let result = solver::fit(&sp.model, &sp.params, &sp.energy, trace, &self.fit_options)?;
            log::info!("{} trace {i}: {}", self.key, result.summary());
            sp.fit_results.insert(i, result);
        }
        Ok(())
    }

    /// Copy the fit result of the shown trace into the live parameters.
    pub fn adopt_fit_result(&mut self) -> Result<(), XpsError> {
        let params = self.spectrum.fit_result(self.index)?.params.clone();
        self.spectrum.params = params;
        if let WindowState::Open(panel) = &mut self.param_panel {
            panel.sync(&self.spectrum.params);
        }
        self.redraw();
        Ok(())
    }

    pub fn toggle_param_panel(&mut self) {
        let params = &self.spectrum.params;
        let steps = self.slider_steps;
        self.param_panel.toggle(|| PanelState::new(params, steps));
    }

    pub fn close_param_panel(&mut self) {
        self.param_panel.close();
    }

    pub fn toggle_trace_window(&mut self) {
        let spectrum = &self.spectrum;
        self.trace_window.toggle(|| index_tree(spectrum));
        self.redraw();
    }

    pub fn close_trace_window(&mut self) {
        self.trace_window.close();
        self.redraw();
    }
}

/// One parent "All" with a leaf per trace index.
fn index_tree(spectrum: &Spectrum) -> CheckTree<usize> {
    let mut tree = CheckTree::new();
    tree.add_parent("All", (0..spectrum.len()).map(|i| (i.to_string(), i)));
    tree
}
