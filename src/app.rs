use std::path::PathBuf;

use eframe::egui::{self, Key, KeyboardShortcut, Modifiers, Rect};

use crate::export;
use crate::state::AppState;
use crate::ui::panels::{self, MenuAction};
use crate::ui::{params, plot};

const OPEN: KeyboardShortcut = KeyboardShortcut::new(Modifiers::COMMAND, Key::O);
const SAVE_PLOT: KeyboardShortcut = KeyboardShortcut::new(Modifiers::COMMAND, Key::S);

// ---------------------------------------------------------------------------
// eframe App implementation
// ---------------------------------------------------------------------------

pub struct XpsViewApp {
    pub state: AppState,
    /// Screen rect of the plot in the last frame.
    plot_rect: Option<Rect>,
    /// Target of a requested screenshot that has not arrived yet.
    pending_export: Option<PathBuf>,
}

impl XpsViewApp {
    pub fn new(state: AppState) -> Self {
        Self {
            state,
            plot_rect: None,
            pending_export: None,
        }
    }

    fn handle_action(&mut self, ctx: &egui::Context, action: MenuAction) {
        match action {
            MenuAction::SavePlot => self.request_export(ctx),
            MenuAction::Quit => ctx.send_viewport_cmd(egui::ViewportCommand::Close),
        }
    }

    /// Ask for a file name, then request a screenshot; it is written when the
    /// screenshot event comes back.
    fn request_export(&mut self, ctx: &egui::Context) {
        let Some(view) = self.state.active_view.and_then(|i| self.state.views.get(i)) else {
            self.state.status_message = Some("Open a fit view first".to_string());
            return;
        };
        let default_name = format!("{}_{}.png", view.key.sample, view.key.spectrum);
        if let Some(path) = panels::save_plot_dialog(&default_name) {
            self.pending_export = Some(path);
            ctx.send_viewport_cmd(egui::ViewportCommand::Screenshot(Default::default()));
        }
    }

    fn receive_screenshot(&mut self, ctx: &egui::Context) {
        if self.pending_export.is_none() {
            return;
        }
        let Some(image) = ctx.input(|i| {
            i.events.iter().rev().find_map(|e| match e {
                egui::Event::Screenshot { image, .. } => Some(image.clone()),
                _ => None,
            })
        }) else {
            return;
        };
        let Some(path) = self.pending_export.take() else {
            return;
        };
        let Some(rect) = self.plot_rect else {
            self.state.status_message = Some("Plot is not visible".to_string());
            return;
        };

        let cropped = export::crop(&image, rect, ctx.pixels_per_point());
        match export::write_png(&path, &cropped) {
            Ok(written) => {
                log::info!("Saved plot to {}", written.display());
                self.state.status_message = None;
            }
            Err(e) => {
                log::error!("Failed to save plot: {e:#}");
                self.state.status_message = Some(format!("Error: {e:#}"));
            }
        }
    }
}

impl eframe::App for XpsViewApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.receive_screenshot(ctx);

        // ---- Keyboard shortcuts ----
        if ctx.input_mut(|i| i.consume_shortcut(&OPEN)) {
            panels::open_file_dialog(&mut self.state);
        }
        if ctx.input_mut(|i| i.consume_shortcut(&SAVE_PLOT)) {
            self.request_export(ctx);
        }

        // ---- Top panel: menu bar ----
        let action = egui::TopBottomPanel::top("top_bar")
            .show(ctx, |ui| panels::top_bar(ui, &mut self.state))
            .inner;
        if let Some(action) = action {
            self.handle_action(ctx, action);
        }

        // ---- Left side panel: samples ----
        egui::SidePanel::left("sample_panel")
            .default_width(240.0)
            .resizable(true)
            .show(ctx, |ui| {
                panels::sample_panel(ui, &mut self.state);
            });

        let group_alpha = self.state.config.group_alpha;
        let Some(view) = self.state.active_view_mut() else {
            self.plot_rect = None;
            egui::CentralPanel::default().show(ctx, |ui| {
                ui.centered_and_justified(|ui| {
                    ui.heading("Open an archive (File → Open…) and check a spectrum");
                });
            });
            panels::about_window(ctx, &mut self.state);
            return;
        };

        // ---- Right side panel: fit selection ----
        egui::SidePanel::right("fit_tree_panel")
            .default_width(160.0)
            .resizable(true)
            .show(ctx, |ui| {
                panels::fit_tree_panel(ui, view);
            });

        // ---- Central panel: controls and plot ----
        let rect = egui::CentralPanel::default()
            .show(ctx, |ui| {
                ui.heading(view.key.to_string());
                panels::view_controls(ui, view);
                ui.separator();
                plot::fit_plot(ui, view, group_alpha)
            })
            .inner;
        self.plot_rect = rect;

        params::param_window(ctx, view);
        panels::trace_window(ctx, view);
        panels::about_window(ctx, &mut self.state);
    }
}
