use std::path::{Path, PathBuf};

use anyhow::Result;

use crate::config::ViewerConfig;
use crate::data::loader;
use crate::data::model::{SampleArchive, SpectrumKey};
use crate::tree::CheckTree;
use crate::view::FitView;

// ---------------------------------------------------------------------------
// Application state
// ---------------------------------------------------------------------------

/// The full UI state, independent of rendering.
pub struct AppState {
    pub config: ViewerConfig,

    /// Loaded archive (None until user loads a file).
    pub archive: Option<SampleArchive>,

    /// Where the archive came from; default target for "Save archive".
    pub archive_path: Option<PathBuf>,

    /// Samples and their spectra, checkable.
    pub sample_tree: CheckTree<SpectrumKey>,

    /// Open fit views, one per spectrum.
    pub views: Vec<FitView>,

    /// Index into `views` of the one shown in the central panel.
    pub active_view: Option<usize>,

    /// Status / error message shown in the UI.
    pub status_message: Option<String>,

    /// Whether the About dialog is shown.
    pub show_about: bool,
}

impl AppState {
    pub fn new(config: ViewerConfig) -> Self {
        Self {
            config,
            archive: None,
            archive_path: None,
            sample_tree: CheckTree::new(),
            views: Vec::new(),
            active_view: None,
            status_message: None,
            show_about: false,
        }
    }

    /// Ingest a newly loaded archive: drop open views and rebuild the tree.
    pub fn set_archive(&mut self, archive: SampleArchive, path: Option<PathBuf>) {
        self.views.clear();
        self.active_view = None;
        self.archive = Some(archive);
        self.archive_path = path;
        self.rebuild_tree();
        self.status_message = None;
    }

    pub fn load(&mut self, path: &Path) -> Result<()> {
        let archive = loader::load_file(path)?;
        log::info!(
            "Loaded {} samples / {} spectra from {}",
            archive.samples.len(),
            archive.spectrum_count(),
            path.display()
        );
        self.set_archive(archive, Some(path.to_path_buf()));
        Ok(())
    }

    /// Clear the sample tree and add one parent per sample.
    pub fn rebuild_tree(&mut self) {
        self.sample_tree.clear();
        if let Some(archive) = &self.archive {
            for sample in &archive.samples {
                let children = sample.spectrum_names().into_iter().map(|name| {
                    let key = SpectrumKey::new(&sample.name, &name);
                    (name, key)
                });
                self.sample_tree.add_parent(&sample.name, children);
            }
        }
    }

    /// Open a fit view for every checked spectrum that is not open yet and
    /// activate the first of them. Returns how many were opened.
    pub fn open_checked(&mut self) -> usize {
        let Some(archive) = &self.archive else {
            return 0;
        };
        let checked = self.sample_tree.checked_leaves();
        if checked.is_empty() {
            self.status_message = Some("Check a spectrum in the sample tree first".to_string());
            return 0;
        }

        let mut first = None;
        let mut opened = 0;
        for key in checked {
            if let Some(i) = self.views.iter().position(|v| v.key == key) {
                first.get_or_insert(i);
                continue;
            }
            let Some(spectrum) = archive.spectrum(&key) else {
                log::warn!("{key} is no longer in the archive");
                continue;
            };
            log::info!("Opening fit view for {key}");
            self.views
                .push(FitView::new(key, spectrum.clone(), &self.config));
            first.get_or_insert(self.views.len() - 1);
            opened += 1;
        }
        if first.is_some() {
            self.active_view = first;
        }
        opened
    }

    /// Write every open view's spectrum back into the archive.
    pub fn sync_views(&mut self) {
        if let Some(archive) = &mut self.archive {
            for view in &self.views {
                if !archive.replace(&view.key, view.spectrum.clone()) {
                    log::warn!("{} could not be written back", view.key);
                }
            }
        }
    }

    /// Close a view, keeping its edits in the archive.
    pub fn close_view(&mut self, index: usize) {
        if index >= self.views.len() {
            return;
        }
        let view = self.views.remove(index);
        if let Some(archive) = &mut self.archive {
            archive.replace(&view.key, view.spectrum);
        }
        self.active_view = match self.active_view {
            _ if self.views.is_empty() => None,
            Some(a) if a > index => Some(a - 1),
            Some(a) => Some(a.min(self.views.len() - 1)),
            None => None,
        };
    }

    pub fn active_view_mut(&mut self) -> Option<&mut FitView> {
        self.active_view.and_then(|i| self.views.get_mut(i))
    }

    pub fn save_archive(&mut self, path: &Path) -> Result<()> {
        self.sync_views();
        let Some(archive) = &self.archive else {
            anyhow::bail!("no archive loaded");
        };
        loader::save_archive(path, archive)?;
        log::info!("Saved archive to {}", path.display());
        self.archive_path = Some(path.to_path_buf());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::model::{Sample, Spectrum};

    fn archive() -> SampleArchive {
        let energy: Vec<f64> = (0..30).map(|i| 280.0 + i as f64 * 0.3).collect();
        let peak: Vec<f64> = energy
            .iter()
            .map(|&e| 100.0 + 500.0 * (-(e - 284.8).powi(2)).exp())
            .collect();
        let mut archive = SampleArchive {
            samples: vec![Sample {
                name: "XPS_205".to_string(),
                model: None,
                spectra: vec![
                    Spectrum::new("C1s", energy.clone(), vec![peak.clone()]),
                    Spectrum::new("O1s", energy, vec![peak]),
                ],
            }],
        };
        archive.prepare().unwrap();
        archive
    }

    #[test]
    fn test_tree_built_from_archive() {
        let mut state = AppState::new(ViewerConfig::default());
        state.set_archive(archive(), None);
        assert_eq!(state.sample_tree.nodes().len(), 1);
        assert_eq!(state.sample_tree.nodes()[0].label, "XPS_205");
        assert_eq!(state.sample_tree.nodes()[0].children.len(), 2);
    }

    #[test]
    fn test_open_checked_views_once() {
        let mut state = AppState::new(ViewerConfig::default());
        state.set_archive(archive(), None);
        assert_eq!(state.open_checked(), 0);
        assert!(state.status_message.is_some());

        state.sample_tree.set_leaf(0, 1, true);
        assert_eq!(state.open_checked(), 1);
        assert_eq!(state.open_checked(), 0);
        assert_eq!(state.views.len(), 1);
        assert_eq!(state.views[0].key, SpectrumKey::new("XPS_205", "O1s"));
        assert_eq!(state.active_view, Some(0));
    }

    #[test]
    fn test_close_view_writes_edits_back() {
        use crate::panel::{ParamEdit, ParamMessage};

        let mut state = AppState::new(ViewerConfig::default());
        state.set_archive(archive(), None);
        state.sample_tree.set_parent(0, true);
        assert_eq!(state.open_checked(), 2);

        state.views[1]
            .apply(&ParamMessage::new("p1_center", ParamEdit::Value(531.0)))
            .unwrap();
        state.close_view(1);
        assert_eq!(state.views.len(), 1);
        assert_eq!(state.active_view, Some(0));

        let key = SpectrumKey::new("XPS_205", "O1s");
        let saved = state.archive.as_ref().unwrap().spectrum(&key).unwrap();
        assert_eq!(saved.params.value("p1_center").unwrap(), 531.0);

        state.close_view(0);
        assert_eq!(state.active_view, None);
        state.close_view(7);
    }
}
