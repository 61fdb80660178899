//! Per-city creative synthesis: a rounded text block drawn over the source
//! image and written to the scratch directory as PNG.
use ab_glyph::{point, Font, FontVec, PxScale, ScaleFont};
use image::{ImageFormat, Rgba, RgbaImage};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::settings::{has_extension, OverlaySpec, IMAGE_EXTENSIONS};
use crate::text::{collapse_whitespace, fold_accents};

pub mod bitmap;

const PADDING: u32 = 2;
const RADIUS: u32 = 10;
const LINE_GAP: u32 = 2;
const MAX_FONT_PX: u32 = 180;
const MIN_FONT_PX: u32 = 8;
/// Block fill opacity (GD alpha 38 of 127).
const BACKGROUND_OPACITY: f32 = 1.0 - 38.0 / 127.0;

#[derive(Debug, Error)]
pub enum CompositorError {
    #[error("unsupported image type: {0}")]
    UnsupportedFormat(String),
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write generated image: {0}")]
    Write(#[source] std::io::Error),
    #[error("image codec error: {0}")]
    Image(#[from] image::ImageError),
    #[error("render task failed: {0}")]
    Join(String),
}

/// A rendered creative on disk. The file is removed when this is dropped.
#[derive(Debug)]
pub struct GeneratedImage {
    path: PathBuf,
}

impl GeneratedImage {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for GeneratedImage {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "generated image removed"),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => warn!(path = %self.path.display(), error = %err, "failed to remove generated image"),
        }
    }
}

#[derive(Clone)]
pub struct CityImageGenerator {
    scratch_dir: PathBuf,
    font: Option<Arc<FontVec>>,
}

impl CityImageGenerator {
    /// Use the first loadable font among `font_paths`, or the bitmap font.
    pub fn new(scratch_dir: PathBuf, font_paths: &[PathBuf]) -> Self {
        let font = font_paths.iter().find_map(|path| {
            let bytes = std::fs::read(path).ok()?;
            match FontVec::try_from_vec(bytes) {
                Ok(font) => {
                    info!(font = %path.display(), "overlay font loaded");
                    Some(Arc::new(font))
                }
                Err(err) => {
                    warn!(font = %path.display(), error = %err, "unreadable font file");
                    None
                }
            }
        });
        if font.is_none() {
            warn!("no scalable font found; overlay text uses the bitmap font");
        }
        Self { scratch_dir, font }
    }

    pub fn without_font(scratch_dir: PathBuf) -> Self {
        Self {
            scratch_dir,
            font: None,
        }
    }

    pub fn has_scalable_font(&self) -> bool {
        self.font.is_some()
    }

    /// Render `text` over `source` on the blocking pool.
    pub async fn generate(
        &self,
        source: &Path,
        text: &str,
        overlay: &OverlaySpec,
    ) -> Result<GeneratedImage, CompositorError> {
        let this = self.clone();
        let source = source.to_path_buf();
        let text = text.to_string();
        let overlay = overlay.clone();
        tokio::task::spawn_blocking(move || this.generate_blocking(&source, &text, &overlay))
            .await
            .map_err(|e| CompositorError::Join(e.to_string()))?
    }

    pub fn generate_blocking(
        &self,
        source: &Path,
        text: &str,
        overlay: &OverlaySpec,
    ) -> Result<GeneratedImage, CompositorError> {
        let mut image = open_image(source)?;
        self.render(&mut image, text, overlay);

        std::fs::create_dir_all(&self.scratch_dir).map_err(CompositorError::Write)?;
        let path = self
            .scratch_dir
            .join(format!("city_{}.png", Uuid::new_v4().simple()));
        // Guard first so a failed save still cleans up a partial file.
        let generated = GeneratedImage { path };
        image.save_with_format(generated.path(), ImageFormat::Png)?;
        Ok(generated)
    }

    /// Draw the overlay block in place. Blank text leaves the image untouched.
    pub fn render(&self, image: &mut RgbaImage, text: &str, overlay: &OverlaySpec) {
        let line = collapse_whitespace(text);
        if line.is_empty() {
            return;
        }
        let lines = vec![line];
        let style = BlockStyle::from_overlay(overlay);

        match &self.font {
            Some(font) => draw_scalable(image, font.as_ref(), &lines, &style),
            None => {
                let folded: Vec<String> = lines.iter().map(|l| fold_accents(l)).collect();
                draw_bitmap(image, &folded, &style);
            }
        }
    }
}

fn open_image(path: &Path) -> Result<RgbaImage, CompositorError> {
    let display = path.display().to_string();
    if !has_extension(&display, IMAGE_EXTENSIONS) {
        return Err(CompositorError::UnsupportedFormat(display));
    }
    let bytes = std::fs::read(path).map_err(|source| CompositorError::Read {
        path: display,
        source,
    })?;
    Ok(image::load_from_memory(&bytes)?.to_rgba8())
}

struct BlockStyle {
    text: [u8; 3],
    background: Option<[u8; 3]>,
    position_x: f32,
    position_y: f32,
}

impl BlockStyle {
    fn from_overlay(overlay: &OverlaySpec) -> Self {
        Self {
            text: parse_hex_color(&overlay.text_color),
            background: (!overlay.is_transparent())
                .then(|| parse_hex_color(&overlay.background_color)),
            position_x: normalize_percent(overlay.position_x),
            position_y: normalize_percent(overlay.position_y),
        }
    }
}

/// `#rgb` or `#rrggbb`; anything else is black.
pub fn parse_hex_color(raw: &str) -> [u8; 3] {
    let hex = raw.trim().trim_start_matches('#');
    let expanded: String = match hex.len() {
        3 => hex.chars().flat_map(|c| [c, c]).collect(),
        6 => hex.to_string(),
        _ => return [0, 0, 0],
    };
    match u32::from_str_radix(&expanded, 16) {
        Ok(v) => [(v >> 16) as u8, (v >> 8) as u8, v as u8],
        Err(_) => [0, 0, 0],
    }
}

fn normalize_percent(value: f32) -> f32 {
    if value.is_finite() {
        value.clamp(0.0, 100.0)
    } else {
        0.0
    }
}

/// Top-left corner of a `rect_w` x `rect_h` block centered at the anchor
/// percentages, clamped so the block stays inside the image.
pub fn position_rect(
    image_w: u32,
    image_h: u32,
    rect_w: u32,
    rect_h: u32,
    pos_x: f32,
    pos_y: f32,
) -> (u32, u32) {
    let center_x = image_w as f32 * (pos_x / 100.0);
    let center_y = image_h as f32 * (pos_y / 100.0);
    let x = (center_x - rect_w as f32 / 2.0).round();
    let y = (center_y - rect_h as f32 / 2.0).round();
    let max_x = image_w.saturating_sub(rect_w) as f32;
    let max_y = image_h.saturating_sub(rect_h) as f32;
    (x.clamp(0.0, max_x) as u32, y.clamp(0.0, max_y) as u32)
}

fn blend(pixel: &mut Rgba<u8>, color: [u8; 3], opacity: f32) {
    if opacity <= 0.0 {
        return;
    }
    let a = opacity.min(1.0);
    let dst_a = pixel[3] as f32 / 255.0;
    let out_a = a + dst_a * (1.0 - a);
    for i in 0..3 {
        let src = color[i] as f32;
        let dst = pixel[i] as f32;
        let value = if out_a > 0.0 {
            (src * a + dst * dst_a * (1.0 - a)) / out_a
        } else {
            0.0
        };
        pixel[i] = value.round().clamp(0.0, 255.0) as u8;
    }
    pixel[3] = (out_a * 255.0).round() as u8;
}

fn inside_rounded(px: u32, py: u32, w: u32, h: u32, r: u32) -> bool {
    if r == 0 {
        return true;
    }
    let (fx, fy) = (px as f32 + 0.5, py as f32 + 0.5);
    let rf = r as f32;
    let cx = if fx < rf {
        rf
    } else if fx > w as f32 - rf {
        w as f32 - rf
    } else {
        return true;
    };
    let cy = if fy < rf {
        rf
    } else if fy > h as f32 - rf {
        h as f32 - rf
    } else {
        return true;
    };
    let (dx, dy) = (fx - cx, fy - cy);
    dx * dx + dy * dy <= rf * rf
}

fn fill_block(image: &mut RgbaImage, x: u32, y: u32, w: u32, h: u32, color: [u8; 3]) {
    let radius = RADIUS.min(w / 2).min(h / 2);
    for py in 0..h {
        for px in 0..w {
            let (ix, iy) = (x + px, y + py);
            if ix >= image.width() || iy >= image.height() {
                continue;
            }
            if inside_rounded(px, py, w, h, radius) {
                blend(image.get_pixel_mut(ix, iy), color, BACKGROUND_OPACITY);
            }
        }
    }
}

fn measure_line<F: Font>(font: &F, px: f32, line: &str) -> f32 {
    let scaled = font.as_scaled(PxScale::from(px));
    let mut width = 0.0;
    let mut previous = None;
    for c in line.chars() {
        let id = scaled.glyph_id(c);
        if let Some(prev) = previous {
            width += scaled.kern(prev, id);
        }
        width += scaled.h_advance(id);
        previous = Some(id);
    }
    width
}

/// Largest pixel size from 180 down to 8 at which the lines fit the box.
fn fit_font_size<F: Font>(font: &F, lines: &[String], max_w: u32, max_h: u32) -> f32 {
    let mut size = MAX_FONT_PX;
    while size > MIN_FONT_PX {
        let px = size as f32;
        let height = font.as_scaled(PxScale::from(px)).height();
        let widest = lines
            .iter()
            .map(|l| measure_line(font, px, l))
            .fold(0.0, f32::max);
        if widest <= max_w as f32 && height * lines.len() as f32 <= max_h as f32 {
            break;
        }
        size -= 1;
    }
    size as f32
}

fn draw_scalable<F: Font>(image: &mut RgbaImage, font: &F, lines: &[String], style: &BlockStyle) {
    let (width, height) = image.dimensions();
    let max_w = width.saturating_sub(PADDING * 2);
    let max_h = height.saturating_sub(PADDING * 2);
    let px = fit_font_size(font, lines, max_w, max_h);
    let scaled = font.as_scaled(PxScale::from(px));

    let line_h = scaled.height().ceil() as u32;
    let line_advance = line_h + LINE_GAP;
    let widths: Vec<f32> = lines.iter().map(|l| measure_line(font, px, l)).collect();
    let widest = widths.iter().copied().fold(0.0, f32::max);
    let rect_w = (widest + (PADDING * 2) as f32).ceil() as u32;
    let rect_h = line_advance * lines.len() as u32 + PADDING * 2;

    let (rect_x, rect_y) =
        position_rect(width, height, rect_w, rect_h, style.position_x, style.position_y);
    if let Some(bg) = style.background {
        fill_block(image, rect_x, rect_y, rect_w, rect_h, bg);
    }
    debug!(font_px = px, rect_w, rect_h, rect_x, rect_y, "overlay block placed");

    let mut baseline = rect_y as f32 + PADDING as f32 + scaled.ascent();
    for (line, line_w) in lines.iter().zip(widths) {
        let mut caret = rect_x as f32 + ((rect_w as f32 - line_w) / 2.0).round();
        let mut previous = None;
        for c in line.chars() {
            let id = scaled.glyph_id(c);
            if let Some(prev) = previous {
                caret += scaled.kern(prev, id);
            }
            let glyph = id.with_scale_and_position(PxScale::from(px), point(caret, baseline));
            caret += scaled.h_advance(id);
            previous = Some(id);

            let Some(outlined) = font.outline_glyph(glyph) else {
                continue;
            };
            let bounds = outlined.px_bounds();
            outlined.draw(|gx, gy, coverage| {
                let ix = bounds.min.x as i64 + gx as i64;
                let iy = bounds.min.y as i64 + gy as i64;
                if ix < 0 || iy < 0 || ix >= width as i64 || iy >= height as i64 {
                    return;
                }
                blend(image.get_pixel_mut(ix as u32, iy as u32), style.text, coverage);
            });
        }
        baseline += line_advance as f32;
    }
}

fn draw_bitmap(image: &mut RgbaImage, lines: &[String], style: &BlockStyle) {
    let (width, height) = image.dimensions();
    let max_w = width.saturating_sub(PADDING * 2);
    let scale = bitmap::fit_scale(lines, max_w);

    let line_advance = bitmap::line_height(scale) + LINE_GAP;
    let widest = lines
        .iter()
        .map(|l| bitmap::line_width(l, scale))
        .max()
        .unwrap_or(0);
    let rect_w = widest + PADDING * 2;
    let rect_h = line_advance * lines.len() as u32 + PADDING * 2;

    let (rect_x, rect_y) =
        position_rect(width, height, rect_w, rect_h, style.position_x, style.position_y);
    if let Some(bg) = style.background {
        fill_block(image, rect_x, rect_y, rect_w, rect_h, bg);
    }
    debug!(scale, rect_w, rect_h, rect_x, rect_y, "bitmap overlay block placed");

    let mut top = rect_y + PADDING;
    for line in lines {
        let line_w = bitmap::line_width(line, scale);
        let mut left = rect_x + (rect_w.saturating_sub(line_w)) / 2;
        for c in line.chars() {
            let glyph = bitmap::glyph(c);
            for col in 0..bitmap::GLYPH_WIDTH {
                for row in 0..bitmap::GLYPH_ROWS {
                    if !bitmap::is_set(glyph, col, row) {
                        continue;
                    }
                    for dy in 0..scale {
                        for dx in 0..scale {
                            let ix = left + col * scale + dx;
                            let iy = top + row * scale + dy;
                            if ix < width && iy < height {
                                blend(image.get_pixel_mut(ix, iy), style.text, 1.0);
                            }
                        }
                    }
                }
            }
            left += bitmap::CELL_WIDTH * scale;
        }
        top += line_advance;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::text::substitute_city;

    fn solid(w: u32, h: u32, color: [u8; 4]) -> RgbaImage {
        RgbaImage::from_pixel(w, h, Rgba(color))
    }

    fn overlay(text: &str) -> OverlaySpec {
        OverlaySpec {
            text: Some(text.to_string()),
            ..OverlaySpec::default()
        }
    }

    #[test]
    fn parses_short_and_long_hex() {
        assert_eq!(parse_hex_color("#fff"), [255, 255, 255]);
        assert_eq!(parse_hex_color("#1a2B3c"), [0x1a, 0x2b, 0x3c]);
        assert_eq!(parse_hex_color("red"), [0, 0, 0]);
        assert_eq!(parse_hex_color("#12345"), [0, 0, 0]);
        assert_eq!(parse_hex_color("#ggg"), [0, 0, 0]);
    }

    #[test]
    fn block_is_clamped_inside_the_image() {
        assert_eq!(position_rect(200, 100, 50, 20, 50.0, 12.0), (75, 2));
        assert_eq!(position_rect(200, 100, 50, 20, 0.0, 0.0), (0, 0));
        assert_eq!(position_rect(200, 100, 50, 20, 100.0, 100.0), (150, 80));
        assert_eq!(position_rect(40, 10, 50, 20, 50.0, 50.0), (0, 0));
    }

    #[test]
    fn blank_text_leaves_pixels_untouched() {
        let generator = CityImageGenerator::without_font(PathBuf::from("unused"));
        let original = solid(120, 80, [10, 200, 30, 255]);
        let mut image = original.clone();
        generator.render(&mut image, " \n\t ", &overlay(""));
        assert_eq!(image, original);
    }

    #[test]
    fn bitmap_text_draws_block_and_glyphs() {
        let generator = CityImageGenerator::without_font(PathBuf::from("unused"));
        let mut image = solid(300, 200, [255, 255, 255, 255]);
        generator.render(&mut image, "Salvador", &overlay("Salvador"));

        // Block sits near the top; glyph cells span the middle of it.
        let region: Vec<_> = image
            .enumerate_pixels()
            .filter(|(x, y, _)| (40..250).contains(x) && (5..40).contains(y))
            .map(|(_, _, p)| p[0])
            .collect();
        assert!(region.iter().any(|v| *v < 100), "background block should be drawn");
        assert!(region.iter().any(|v| *v == 255), "text should be drawn");
        assert_eq!(image.get_pixel(5, 150), &Rgba([255, 255, 255, 255]));
    }

    #[test]
    fn transparent_background_only_draws_text() {
        let generator = CityImageGenerator::without_font(PathBuf::from("unused"));
        let mut spec = overlay("Ilheus");
        spec.background_color = "transparent".into();
        spec.text_color = "#ff0000".into();
        let mut image = solid(300, 200, [0, 0, 255, 255]);
        generator.render(&mut image, "Ilheus", &spec);
        assert!(image.pixels().all(|p| *p == Rgba([0, 0, 255, 255]) || *p == Rgba([255, 0, 0, 255])));
        assert!(image.pixels().any(|p| *p == Rgba([255, 0, 0, 255])));
    }

    #[test]
    fn generated_file_is_removed_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("base.png");
        solid(64, 48, [20, 20, 20, 255]).save(&source).unwrap();

        let generator = CityImageGenerator::without_font(dir.path().join("scratch"));
        let generated = generator
            .generate_blocking(&source, "Feira de Santana", &overlay("{city}"))
            .unwrap();
        let path = generated.path().to_path_buf();
        assert!(path.exists());
        assert!(path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap()
            .starts_with("city_"));
        drop(generated);
        assert!(!path.exists());
    }

    #[test]
    fn whitespace_output_matches_source_pixels() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("base.png");
        let original = RgbaImage::from_fn(32, 16, |x, y| Rgba([x as u8 * 7, y as u8 * 13, 90, 255]));
        original.save(&source).unwrap();

        let generator = CityImageGenerator::without_font(dir.path().join("scratch"));
        let generated = generator
            .generate_blocking(&source, "   ", &overlay("   "))
            .unwrap();
        let rendered = image::open(generated.path()).unwrap().to_rgba8();
        assert_eq!(rendered, original);
    }

    #[test]
    fn city_placeholder_changes_rendered_pixels() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("base.png");
        let original = solid(320, 200, [240, 240, 240, 255]);
        original.save(&source).unwrap();

        let generator = CityImageGenerator::without_font(dir.path().join("scratch"));
        let spec = overlay("Ofertas em {city}");
        let template = spec.text.clone().unwrap();
        let render = |city: &str| {
            let text = substitute_city(&template, city);
            let generated = generator.generate_blocking(&source, &text, &spec).unwrap();
            image::open(generated.path()).unwrap().to_rgba8()
        };

        let salvador = render("Salvador");
        let ilheus = render("Ilheus");
        assert_ne!(salvador, original);
        assert_ne!(ilheus, original);
        assert_ne!(salvador, ilheus);

        // Only the placeholder survives the template: blank after substitution.
        let blank = generator
            .generate_blocking(&source, &substitute_city("  {city} ", ""), &overlay("  {city} "))
            .unwrap();
        let untouched = image::open(blank.path()).unwrap().to_rgba8();
        assert_eq!(untouched, original);
    }

    #[test]
    fn rejects_unsupported_sources() {
        let generator = CityImageGenerator::without_font(PathBuf::from("unused"));
        let err = generator
            .generate_blocking(Path::new("clip.gif"), "x", &overlay("x"))
            .unwrap_err();
        assert!(matches!(err, CompositorError::UnsupportedFormat(_)));
    }
}
