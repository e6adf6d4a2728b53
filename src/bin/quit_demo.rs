//! A window that can only be quit after confirming.

use eframe::egui::{self, Align2, Key, KeyboardShortcut, Modifiers, Ui, ViewportCommand};

const QUIT: KeyboardShortcut = KeyboardShortcut::new(Modifiers::COMMAND, Key::Q);

const SMALL: [f32; 2] = [500.0, 300.0];
const LARGE: [f32; 2] = [1000.0, 600.0];

fn window_size(enlarged: bool) -> [f32; 2] {
    if enlarged {
        LARGE
    } else {
        SMALL
    }
}

#[derive(Default)]
struct QuitDemo {
    enlarged: bool,
    confirm_quit: bool,
    allowed_to_close: bool,
}

impl QuitDemo {
    fn quit_button(&mut self, ui: &mut Ui, text: &str) {
        if ui.button(text).on_hover_text("Quit application").clicked() {
            self.confirm_quit = true;
        }
    }
}

impl eframe::App for QuitDemo {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        if ctx.input_mut(|i| i.consume_shortcut(&QUIT)) {
            self.confirm_quit = true;
        }
        // The title bar close button goes through the same confirmation.
        if ctx.input(|i| i.viewport().close_requested()) && !self.allowed_to_close {
            ctx.send_viewport_cmd(ViewportCommand::CancelClose);
            self.confirm_quit = true;
        }

        egui::TopBottomPanel::top("menu_bar").show(ctx, |ui| {
            egui::menu::bar(ui, |ui: &mut Ui| {
                ui.menu_button("File", |ui: &mut Ui| {
                    if ui.button("Quit  (Ctrl+Q)").clicked() {
                        self.confirm_quit = true;
                        ui.close_menu();
                    }
                });
            });
        });

        egui::TopBottomPanel::top("toolbar").show(ctx, |ui| {
            ui.horizontal(|ui: &mut Ui| self.quit_button(ui, "⏻ Quit"));
        });

        egui::CentralPanel::default().show(ctx, |ui| {
            ui.heading("Quit demo");
            if ui.checkbox(&mut self.enlarged, "Enlarge window").changed() {
                let size = window_size(self.enlarged);
                log::debug!("resizing to {size:?}");
                ctx.send_viewport_cmd(ViewportCommand::InnerSize(size.into()));
            }
            ui.add_space(8.0);
            self.quit_button(ui, "Quit");
        });

        if self.confirm_quit {
            egui::Window::new("Message")
                .collapsible(false)
                .resizable(false)
                .anchor(Align2::CENTER_CENTER, [0.0, 0.0])
                .show(ctx, |ui| {
                    ui.label("Are you sure to quit?");
                    ui.horizontal(|ui: &mut Ui| {
                        if ui.button("Yes").clicked() {
                            log::info!("quitting");
                            self.allowed_to_close = true;
                            ctx.send_viewport_cmd(ViewportCommand::Close);
                        }
                        if ui.button("No").clicked() {
                            self.confirm_quit = false;
                        }
                    });
                });
        }
    }
}

fn main() -> eframe::Result {
    env_logger::init();

    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default().with_inner_size(SMALL),
        ..Default::default()
    };
    eframe::run_native(
        "Simple menu",
        options,
        Box::new(|_cc| Ok(Box::new(QuitDemo::default()))),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enlarge_toggles_between_sizes() {
        assert_eq!(window_size(false), [500.0, 300.0]);
        assert_eq!(window_size(true), [1000.0, 600.0]);
    }
}
