use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use eframe::egui::{ColorImage, Rect};

// ---------------------------------------------------------------------------
// PNG export of the plot
// ---------------------------------------------------------------------------

/// Ensure the path ends in `.png`, appending it when missing.
pub fn png_path(path: &Path) -> PathBuf {
    let is_png = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("png"));
    if is_png {
        path.to_path_buf()
    } else {
        let mut name = path.as_os_str().to_os_string();
        name.push(".png");
        PathBuf::from(name)
    }
}

/// Cut the plot area out of a full-viewport screenshot.
pub fn crop(screenshot: &ColorImage, plot_rect: Rect, pixels_per_point: f32) -> ColorImage {
    screenshot.region(&plot_rect, Some(pixels_per_point))
}

/// Encode an RGBA image as PNG. Returns the path actually written.
pub fn write_png(path: &Path, image: &ColorImage) -> Result<PathBuf> {
    let path = png_path(path);
    let [w, h] = image.size;
    let buffer = image::RgbaImage::from_raw(w as u32, h as u32, image.as_raw().to_vec())
        .context("screenshot buffer has the wrong size")?;
    buffer
        .save_with_format(&path, image::ImageFormat::Png)
        .with_context(|| format!("writing {}", path.display()))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use eframe::egui::Color32;

    #[test]
    fn test_png_extension_appended() {
        assert_eq!(png_path(Path::new("plot")), PathBuf::from("plot.png"));
        assert_eq!(png_path(Path::new("dir/plot.v2")), PathBuf::from("dir/plot.v2.png"));
        assert_eq!(png_path(Path::new("plot.png")), PathBuf::from("plot.png"));
        assert_eq!(png_path(Path::new("PLOT.PNG")), PathBuf::from("PLOT.PNG"));
    }

    #[test]
    fn test_write_png() {
        let image = ColorImage::new([4, 3], Color32::from_rgb(10, 20, 30));
        let base = std::env::temp_dir().join(format!("xps_view_export_{}", std::process::id()));
        let written = write_png(&base, &image).unwrap();
        assert_eq!(written.extension().and_then(|e| e.to_str()), Some("png"));

        let decoded = image::open(&written).unwrap().to_rgba8();
        std::fs::remove_file(&written).ok();
        assert_eq!(decoded.dimensions(), (4, 3));
        assert_eq!(decoded.get_pixel(2, 1).0, [10, 20, 30, 255]);
    }
}
