use eframe::egui::{Color32, Rect, Ui};
use egui_plot::{GridMark, Legend, Line, Plot, PlotPoint, PlotPoints, Points};

use crate::color::generate_palette;
use crate::view::FitView;

// ---------------------------------------------------------------------------
// Fit plot (central panel)
// ---------------------------------------------------------------------------

// egui_plot axes only grow to the right, so energies are plotted negated and
// the tick labels flip the sign back.

fn flip(points: &[[f64; 2]]) -> PlotPoints {
    points.iter().map(|&[x, y]| [-x, y]).collect()
}

fn energy_tick(mark: GridMark, _range: &std::ops::RangeInclusive<f64>) -> String {
    energy_label(mark.value)
}

fn energy_label(plot_x: f64) -> String {
    // `+ 0.0` turns -0.0 into 0.0
    let e = (-plot_x * 100.0).round() / 100.0 + 0.0;
    format!("{e}")
}

fn hover_label(name: &str, value: &PlotPoint) -> String {
    let e = energy_label(value.x);
    if name.is_empty() {
        format!("{e} eV\n{:.1}", value.y)
    } else {
        format!("{name}\n{e} eV\n{:.1}", value.y)
    }
}

/// Render the plot of the view's current frame. Returns the screen rect of
/// the plot so it can be cut out of a screenshot.
pub fn fit_plot(ui: &mut Ui, view: &FitView, group_alpha: f32) -> Option<Rect> {
    let Some(frame) = view.frame() else {
        ui.centered_and_justified(|ui: &mut Ui| {
            ui.label("Nothing to plot");
        });
        return None;
    };

    let palette = generate_palette(frame.groups.len());
    let model_name = if frame.from_fit_result {
        "fit result"
    } else {
        "model"
    };

    let response = Plot::new(("fit_plot", &view.key))
        .legend(Legend::default())
        .x_axis_label("Binding Energy (eV)")
        .y_axis_label("Intensity")
        .x_axis_formatter(energy_tick)
        .label_formatter(hover_label)
        .show_grid(view.grid)
        .allow_boxed_zoom(true)
        .allow_drag(true)
        .allow_scroll(true)
        .allow_zoom(true)
        .show(ui, |plot_ui| {
            for (i, points) in &frame.overlays {
                plot_ui.line(
                    Line::new(flip(points))
                        .name(format!("trace {i}"))
                        .color(Color32::GRAY.gamma_multiply(0.5))
                        .width(1.0),
                );
            }

            for (group, color) in frame.groups.iter().zip(palette) {
                plot_ui.line(
                    Line::new(flip(&group.points))
                        .name(&group.label)
                        .color(color)
                        .width(1.0)
                        .fill(0.0_f32)
                        .fill_alpha(group_alpha),
                );
            }

            plot_ui.line(
                Line::new(flip(&frame.model))
                    .name(model_name)
                    .color(Color32::RED)
                    .width(2.0),
            );

            plot_ui.points(
                Points::new(flip(&frame.data))
                    .name(format!("trace {}", frame.index))
                    .color(Color32::LIGHT_BLUE)
                    .radius(2.5),
            );
        });

    Some(response.response.rect)
}
