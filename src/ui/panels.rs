use std::path::PathBuf;

use eframe::egui::{self, Color32, Context, Id, RichText, ScrollArea, Ui};

use crate::error::XpsError;
use crate::state::AppState;
use crate::ui::tree::check_tree;
use crate::view::{FitView, WindowState};

/// Menu entries the app handles itself because they need the viewport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MenuAction {
    SavePlot,
    Quit,
}

// ---------------------------------------------------------------------------
// Top bar
// ---------------------------------------------------------------------------

/// Render the top menu bar.
pub fn top_bar(ui: &mut Ui, state: &mut AppState) -> Option<MenuAction> {
    let mut action = None;

    egui::menu::bar(ui, |ui: &mut Ui| {
        ui.menu_button("File", |ui: &mut Ui| {
            if ui.button("Open…  (Ctrl+O)").clicked() {
                open_file_dialog(state);
                ui.close_menu();
            }
            let has_archive = state.archive.is_some();
            if ui
                .add_enabled(has_archive, egui::Button::new("Save archive…"))
                .clicked()
            {
                save_archive_dialog(state);
                ui.close_menu();
            }
            let has_view = state.active_view.is_some();
            if ui
                .add_enabled(has_view, egui::Button::new("Save plot…  (Ctrl+S)"))
                .clicked()
            {
                action = Some(MenuAction::SavePlot);
                ui.close_menu();
            }
            ui.separator();
            if ui.button("Quit").clicked() {
                action = Some(MenuAction::Quit);
                ui.close_menu();
            }
        });

        ui.menu_button("Help", |ui: &mut Ui| {
            if ui.button("About").clicked() {
                state.show_about = true;
                ui.close_menu();
            }
        });

        ui.separator();

        if let Some(archive) = &state.archive {
            ui.label(format!(
                "{} samples, {} spectra, {} open",
                archive.samples.len(),
                archive.spectrum_count(),
                state.views.len()
            ));
        }

        if let Some(msg) = &state.status_message {
            ui.label(RichText::new(msg).color(Color32::RED));
        }
    });

    action
}

pub fn about_window(ctx: &Context, state: &mut AppState) {
    egui::Window::new("About")
        .open(&mut state.show_about)
        .collapsible(false)
        .resizable(false)
        .show(ctx, |ui: &mut Ui| {
            ui.heading(concat!("XPS View ", env!("CARGO_PKG_VERSION")));
            ui.label("Interactive viewing and curve fitting of XPS spectra.");
            ui.label("Set RUST_LOG=debug for a log of every parameter edit.");
        });
}

// ---------------------------------------------------------------------------
// Left side panel – sample tree and open views
// ---------------------------------------------------------------------------

pub fn sample_panel(ui: &mut Ui, state: &mut AppState) {
    ui.heading("Samples");
    ui.separator();

    if state.archive.is_none() {
        ui.label("No archive loaded.");
        return;
    }

    ui.horizontal(|ui: &mut Ui| {
        if ui.button("Open fit view").clicked() {
            let opened = state.open_checked();
            if opened > 0 {
                state.status_message = None;
            }
        }
        if ui.button("Clear tree").clicked() {
            state.sample_tree.clear();
        }
        if ui.button("Rebuild tree").clicked() {
            state.rebuild_tree();
        }
    });
    ui.separator();

    ScrollArea::vertical()
        .id_salt("sample_tree")
        .max_height(ui.available_height() * 0.6)
        .auto_shrink([false, true])
        .show(ui, |ui: &mut Ui| {
            if state.sample_tree.is_empty() {
                ui.weak("Tree cleared. Rebuild to list the samples again.");
            }
            check_tree(ui, Id::new("sample_tree"), &mut state.sample_tree);
        });

    if state.views.is_empty() {
        return;
    }
    ui.separator();
    ui.strong("Open views");

    let mut close = None;
    for (i, view) in state.views.iter().enumerate() {
        ui.horizontal(|ui: &mut Ui| {
            if ui.small_button("✕").on_hover_text("Close view").clicked() {
                close = Some(i);
            }
            let active = state.active_view == Some(i);
            if ui.selectable_label(active, view.key.to_string()).clicked() {
                state.active_view = Some(i);
            }
        });
    }
    if let Some(i) = close {
        state.close_view(i);
    }
}

// ---------------------------------------------------------------------------
// Fit view controls
// ---------------------------------------------------------------------------

fn report(view: &mut FitView, e: XpsError) {
    log::error!("{}: {e}", view.key);
    view.status = Some(format!("Error: {e}"));
}

/// Button row above the plot.
pub fn view_controls(ui: &mut Ui, view: &mut FitView) {
    ui.horizontal_wrapped(|ui: &mut Ui| {
        if ui
            .selectable_label(view.param_panel.is_open(), "Adjust Params")
            .clicked()
        {
            view.toggle_param_panel();
        }

        if ui.button("Fit").clicked() {
            match view.fit_checked() {
                Ok(indices) if !indices.is_empty() => {
                    log::info!("{}: fitted traces {indices:?}", view.key);
                }
                Ok(_) => {}
                Err(e) => report(view, e),
            }
        }

        let mut grid = view.grid;
        if ui.checkbox(&mut grid, "Grid").changed() {
            view.set_grid(grid);
        }

        let mut show = view.show_fit_result;
        if ui.checkbox(&mut show, "Fit Results").changed() {
            if let Err(e) = view.set_show_fit_result(show) {
                report(view, e);
            }
        }

        ui.separator();
        ui.label("Trace");
        let mut index = view.index;
        let last = view.spectrum.len().saturating_sub(1);
        if ui
            .add(egui::DragValue::new(&mut index).range(0..=last))
            .changed()
        {
            if let Err(e) = view.set_index(index) {
                report(view, e);
            }
        }

        if ui
            .selectable_label(view.trace_window.is_open(), "Traces")
            .clicked()
        {
            view.toggle_trace_window();
        }

        let has_result = view.spectrum.fit_results.contains_key(&view.index);
        if ui
            .add_enabled(has_result, egui::Button::new("Use fit as start"))
            .clicked()
        {
            if let Err(e) = view.adopt_fit_result() {
                report(view, e);
            }
        }
    });

    if let Some(result) = view.spectrum.fit_results.get(&view.index) {
        ui.label(RichText::new(result.summary()).small().weak());
    }
    if let Some(msg) = &view.status {
        ui.label(RichText::new(msg).color(Color32::RED));
    }
}

/// Right-hand panel: which traces the Fit button fits.
pub fn fit_tree_panel(ui: &mut Ui, view: &mut FitView) {
    ui.strong("Fit traces");
    ui.separator();
    ScrollArea::vertical()
        .id_salt("fit_tree")
        .auto_shrink([false, false])
        .show(ui, |ui: &mut Ui| {
            check_tree(ui, Id::new(("fit_tree", &view.key)), &mut view.fit_tree);
        });
}

/// Window choosing extra traces drawn behind the current one.
pub fn trace_window(ctx: &Context, view: &mut FitView) {
    let WindowState::Open(tree) = &mut view.trace_window else {
        return;
    };
    let mut open = true;
    let mut changed = false;

    egui::Window::new(format!("Traces: {}", view.key))
        .id(Id::new(("trace_window", &view.key)))
        .open(&mut open)
        .default_width(200.0)
        .vscroll(true)
        .show(ctx, |ui: &mut Ui| {
            changed = check_tree(ui, Id::new(("trace_tree", &view.key)), tree);
        });

    if !open {
        view.close_trace_window();
    } else if changed {
        view.redraw();
    }
}

// ---------------------------------------------------------------------------
// File dialogs
// ---------------------------------------------------------------------------

pub fn open_file_dialog(state: &mut AppState) {
    let file = rfd::FileDialog::new()
        .set_title("Open XPS archive")
        .add_filter("Supported files", &["json", "parquet", "pq", "csv"])
        .add_filter("Archive", &["json"])
        .add_filter("Parquet", &["parquet", "pq"])
        .add_filter("CSV", &["csv"])
        .pick_file();

    if let Some(path) = file {
        if let Err(e) = state.load(&path) {
            log::error!("Failed to load file: {e:#}");
            state.status_message = Some(format!("Error: {e:#}"));
        }
    }
}

pub fn save_archive_dialog(state: &mut AppState) {
    let mut dialog = rfd::FileDialog::new()
        .set_title("Save XPS archive")
        .add_filter("Archive", &["json"]);
    if let Some(name) = state
        .archive_path
        .as_ref()
        .and_then(|p| p.file_stem())
        .and_then(|s| s.to_str())
    {
        dialog = dialog.set_file_name(format!("{name}.json"));
    }

    if let Some(path) = dialog.save_file() {
        if let Err(e) = state.save_archive(&path) {
            log::error!("Failed to save archive: {e:#}");
            state.status_message = Some(format!("Error: {e:#}"));
        }
    }
}

pub fn save_plot_dialog(default_name: &str) -> Option<PathBuf> {
    rfd::FileDialog::new()
        .set_title("Save plot")
        .add_filter("PNG image", &["png"])
        .set_file_name(default_name)
        .save_file()
}
