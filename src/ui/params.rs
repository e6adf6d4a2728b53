use eframe::egui::{self, Context, Id, RichText, TextEdit, Ui};

use crate::fit::Parameter;
use crate::panel::{format_bound, parse_bound, ParamControls, ParamEdit, ParamMessage};
use crate::view::{FitView, WindowState};

// ---------------------------------------------------------------------------
// Parameter panel window
// ---------------------------------------------------------------------------

/// Show the parameter window of `view` if it is open and apply whatever the
/// user changed.
pub fn param_window(ctx: &Context, view: &mut FitView) {
    let WindowState::Open(panel) = &mut view.param_panel else {
        return;
    };
    let params = &view.spectrum.params;
    let mut messages = Vec::new();
    let mut open = true;

    egui::Window::new(format!("Parameters: {}", view.key))
        .id(Id::new(("param_panel", &view.key)))
        .open(&mut open)
        .default_width(640.0)
        .vscroll(true)
        .show(ctx, |ui: &mut Ui| {
            egui::Grid::new(("param_grid", &view.key))
                .striped(true)
                .num_columns(7)
                .show(ui, |ui: &mut Ui| {
                    for title in ["Name", "Value", "", "Min", "Max", "Expression", "Vary"] {
                        ui.strong(title);
                    }
                    ui.end_row();

                    for controls in &mut panel.controls {
                        let Some(param) = params.get(&controls.name) else {
                            continue;
                        };
                        param_row(ui, controls, param, &mut messages);
                        ui.end_row();
                    }
                });
        });

    if !open {
        view.close_param_panel();
    }

    for msg in messages {
        if let Err(e) = view.apply(&msg) {
            log::error!("{}: {} rejected: {e}", view.key, msg.name);
            view.status = Some(format!("Error: {e}"));
            // Put the text fields back to what the parameter really holds.
            if let (Some(panel), Some(param)) =
                (view.param_panel.as_mut(), view.spectrum.params.get(&msg.name))
            {
                panel.sync_one(param);
            }
        }
    }
}

fn param_row(
    ui: &mut Ui,
    controls: &mut ParamControls,
    param: &Parameter,
    messages: &mut Vec<ParamMessage>,
) {
    let name = controls.name.clone();
    let constrained = param.expr.is_some();

    let mut label = RichText::new(&name);
    if constrained || !param.vary {
        label = label.weak();
    }
    ui.label(label);

    let slider = egui::Slider::new(&mut controls.step, 0..=controls.scale.steps).show_value(false);
    if ui.add_enabled(!constrained, slider).changed() {
        let value = controls.scale.value_at(controls.step);
        messages.push(ParamMessage::new(&name, ParamEdit::Value(value)));
    }
    ui.monospace(format!("{:>10.4}", param.value));

    let min = ui.add(TextEdit::singleline(&mut controls.min_text).desired_width(60.0));
    if min.lost_focus() {
        match parse_bound(&controls.min_text, f64::NEG_INFINITY) {
            Some(v) if v != param.min => messages.push(ParamMessage::new(&name, ParamEdit::Min(v))),
            Some(_) => {}
            None => controls.min_text = format_bound(param.min),
        }
    }

    let max = ui.add(TextEdit::singleline(&mut controls.max_text).desired_width(60.0));
    if max.lost_focus() {
        match parse_bound(&controls.max_text, f64::INFINITY) {
            Some(v) if v != param.max => messages.push(ParamMessage::new(&name, ParamEdit::Max(v))),
            Some(_) => {}
            None => controls.max_text = format_bound(param.max),
        }
    }

    let expr = ui.add(
        TextEdit::singleline(&mut controls.expr_text)
            .desired_width(140.0)
            .hint_text("none"),
    );
    if expr.lost_focus() {
        let text = controls.expr_text.trim();
        if text != param.expr.as_deref().unwrap_or("") {
            messages.push(ParamMessage::new(&name, ParamEdit::Expr(text.to_string())));
        }
    }

    let mut vary = param.vary;
    if ui
        .add_enabled(!constrained, egui::Checkbox::without_text(&mut vary))
        .changed()
    {
        messages.push(ParamMessage::new(&name, ParamEdit::Vary(vary)));
    }
}
