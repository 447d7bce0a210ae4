/// Image compositing module
///
/// Crops the generated image to the feed aspect ratio, finds the calmest
/// horizontal band for the quote, picks a text colour that reads against it,
/// wraps and draws the quote with a soft shadow, stamps the watermark, and
/// encodes the result as JPEG.

use anyhow::{Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, GrayImage, Rgba, RgbaImage};
use rusttype::{point, Font, Scale};
use std::fs;
use std::path::Path;

use crate::config::Config;

pub const TARGET_WIDTH: u32 = 1080;
pub const TARGET_HEIGHT: u32 = 1350;

/// Top edge of each candidate text band, as a fraction of image height
const CANDIDATE_ZONES: [f32; 3] = [0.10, 0.38, 0.64];
const ZONE_HEIGHT: f32 = 0.26;
/// Text box width as a fraction of image width
const TEXT_BOX_WIDTH: f32 = 0.80;

const MAX_FONT_PX: f32 = 64.0;
const MIN_FONT_PX: f32 = 34.0;
const LINE_SPACING: f32 = 1.25;
const WATERMARK_PX: f32 = 26.0;
const WATERMARK_MARGIN: i32 = 28;
const JPEG_QUALITY: u8 = 92;

/// Background luminance above which dark text is used
const LIGHT_BACKGROUND: f64 = 150.0;

pub trait Compositor: Send + Sync {
    /// Overlay `quote` on the encoded `image`, returning JPEG bytes
    fn compose(&self, image: &[u8], quote: &str) -> Result<Vec<u8>>;
}

/// A horizontal band of the image, in pixel rows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Zone {
    pub top: u32,
    pub bottom: u32,
}

impl Zone {
    pub fn height(&self) -> u32 {
        self.bottom - self.top
    }
}

/// Centre-crop to the target aspect ratio, then resize to the target size
pub fn crop_to_target(image: &DynamicImage) -> DynamicImage {
    let (width, height) = (image.width(), image.height());
    let target_ratio = TARGET_WIDTH as f64 / TARGET_HEIGHT as f64;

    let (crop_w, crop_h) = if (width as f64 / height as f64) > target_ratio {
        (((height as f64) * target_ratio).round() as u32, height)
    } else {
        (width, ((width as f64) / target_ratio).round() as u32)
    };
    let crop_w = crop_w.clamp(1, width);
    let crop_h = crop_h.clamp(1, height);

    image
        .crop_imm((width - crop_w) / 2, (height - crop_h) / 2, crop_w, crop_h)
        .resize_exact(TARGET_WIDTH, TARGET_HEIGHT, FilterType::Lanczos3)
}

fn candidate_zones(height: u32) -> Vec<Zone> {
    CANDIDATE_ZONES
        .iter()
        .map(|start| {
            let top = (height as f32 * start) as u32;
            let bottom = ((height as f32 * (start + ZONE_HEIGHT)) as u32).min(height);
            Zone { top, bottom }
        })
        .collect()
}

fn text_columns(width: u32) -> (u32, u32) {
    let box_width = (width as f32 * TEXT_BOX_WIDTH) as u32;
    let left = (width - box_width) / 2;
    (left, left + box_width)
}

/// Mean absolute luminance difference between neighbouring pixels in a band
pub fn busyness(gray: &GrayImage, zone: Zone) -> f64 {
    let (left, right) = text_columns(gray.width());
    let mut total = 0u64;
    let mut samples = 0u64;

    for y in zone.top..zone.bottom.saturating_sub(1) {
        for x in left..right.saturating_sub(1) {
            let here = gray.get_pixel(x, y).0[0] as i32;
            let right_px = gray.get_pixel(x + 1, y).0[0] as i32;
            let below = gray.get_pixel(x, y + 1).0[0] as i32;
            total += ((here - right_px).abs() + (here - below).abs()) as u64;
            samples += 1;
        }
    }

    if samples == 0 {
        0.0
    } else {
        total as f64 / samples as f64
    }
}

/// The least busy candidate band; earlier bands win ties
pub fn choose_zone(gray: &GrayImage) -> Zone {
    let mut best: Option<(Zone, f64)> = None;

    for zone in candidate_zones(gray.height()) {
        let score = busyness(gray, zone);
        log::debug!("Zone {}..{} busyness {:.2}", zone.top, zone.bottom, score);
        if best.map_or(true, |(_, best_score)| score < best_score) {
            best = Some((zone, score));
        }
    }

    best.map(|(zone, _)| zone)
        .unwrap_or(Zone { top: 0, bottom: gray.height() })
}

pub fn mean_luminance(gray: &GrayImage, zone: Zone) -> f64 {
    let (left, right) = text_columns(gray.width());
    let mut total = 0u64;
    let mut samples = 0u64;

    for y in zone.top..zone.bottom {
        for x in left..right {
            total += gray.get_pixel(x, y).0[0] as u64;
            samples += 1;
        }
    }

    if samples == 0 {
        0.0
    } else {
        total as f64 / samples as f64
    }
}

/// Text and shadow colours for a background luminance
pub fn text_colors(luminance: f64) -> (Rgba<u8>, Rgba<u8>) {
    if luminance > LIGHT_BACKGROUND {
        (Rgba([28, 28, 32, 255]), Rgba([255, 255, 255, 110]))
    } else {
        (Rgba([250, 248, 240, 255]), Rgba([0, 0, 0, 140]))
    }
}

/// Greedy word wrap; a word wider than `max_width` gets a line of its own
pub fn wrap_text<F>(text: &str, max_width: f32, measure: F) -> Vec<String>
where
    F: Fn(&str) -> f32,
{
    let mut lines = Vec::new();
    let mut current = String::new();

    for word in text.split_whitespace() {
        if current.is_empty() {
            current.push_str(word);
            continue;
        }

        let candidate = format!("{} {}", current, word);
        if measure(&candidate) <= max_width {
            current = candidate;
        } else {
            lines.push(std::mem::replace(&mut current, word.to_string()));
        }
    }

    if !current.is_empty() {
        lines.push(current);
    }
    lines
}

fn text_width(font: &Font<'static>, px: f32, text: &str) -> f32 {
    font.layout(text, Scale::uniform(px), point(0.0, 0.0))
        .last()
        .map(|g| g.position().x + g.unpositioned().h_metrics().advance_width)
        .unwrap_or(0.0)
}

fn line_height(font: &Font<'static>, px: f32) -> f32 {
    let vm = font.v_metrics(Scale::uniform(px));
    (vm.ascent - vm.descent + vm.line_gap) * LINE_SPACING
}

fn blend(img: &mut RgbaImage, x: i32, y: i32, color: Rgba<u8>, coverage: f32) {
    if x < 0 || y < 0 || x as u32 >= img.width() || y as u32 >= img.height() {
        return;
    }

    let alpha = coverage.clamp(0.0, 1.0) * (color.0[3] as f32 / 255.0);
    if alpha <= 0.0 {
        return;
    }

    let dst = img.get_pixel_mut(x as u32, y as u32);
    let inv = 1.0 - alpha;
    for channel in 0..3 {
        dst.0[channel] = (color.0[channel] as f32 * alpha + dst.0[channel] as f32 * inv) as u8;
    }
    dst.0[3] = 255;
}

fn draw_text(img: &mut RgbaImage, font: &Font<'static>, px: f32, x: f32, y: f32, color: Rgba<u8>, text: &str) {
    let scale = Scale::uniform(px);
    let ascent = font.v_metrics(scale).ascent;

    for glyph in font.layout(text, scale, point(x, y + ascent)) {
        if let Some(bb) = glyph.pixel_bounding_box() {
            glyph.draw(|gx, gy, coverage| {
                blend(img, gx as i32 + bb.min.x, gy as i32 + bb.min.y, color, coverage);
            });
        }
    }
}

/// Draws quotes with TrueType fonts via rusttype
pub struct TextCompositor {
    font: Font<'static>,
    watermark_font: Font<'static>,
    watermark: String,
}

fn load_font(path: &Path) -> Result<Font<'static>> {
    let bytes = fs::read(path).with_context(|| format!("Failed to read font {}", path.display()))?;
    Font::try_from_vec(bytes)
        .with_context(|| format!("{} is not a usable TrueType/OpenType font", path.display()))
}

impl TextCompositor {
    pub fn new(font: Font<'static>, watermark_font: Font<'static>, watermark: impl Into<String>) -> Self {
        Self {
            font,
            watermark_font,
            watermark: watermark.into(),
        }
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        let font = load_font(&config.font_path)?;
        let watermark_font = if config.watermark_font_path == config.font_path {
            font.clone()
        } else {
            load_font(&config.watermark_font_path)?
        };

        Ok(Self::new(font, watermark_font, config.watermark_text.clone()))
    }

    /// Largest font size whose wrapped lines fit the band
    fn fit_text(&self, quote: &str, max_width: f32, zone: Zone) -> (f32, Vec<String>) {
        let mut px = MAX_FONT_PX;
        loop {
            let lines = wrap_text(quote, max_width, |s| text_width(&self.font, px, s));
            let block = lines.len() as f32 * line_height(&self.font, px);
            if block <= zone.height() as f32 || px <= MIN_FONT_PX {
                return (px, lines);
            }
            px = (px - 4.0).max(MIN_FONT_PX);
        }
    }
}

impl Compositor for TextCompositor {
    fn compose(&self, image: &[u8], quote: &str) -> Result<Vec<u8>> {
        let source = image::load_from_memory(image).context("Failed to decode generated image")?;
        let cropped = crop_to_target(&source);
        let gray = cropped.to_luma8();

        let zone = choose_zone(&gray);
        let luminance = mean_luminance(&gray, zone);
        let (color, shadow) = text_colors(luminance);
        log::info!(
            "Placing quote in rows {}..{} (luminance {:.0})",
            zone.top,
            zone.bottom,
            luminance
        );

        let mut canvas = cropped.to_rgba8();
        let width = canvas.width() as f32;
        let max_width = width * TEXT_BOX_WIDTH;
        let (px, lines) = self.fit_text(quote, max_width, zone);
        let step = line_height(&self.font, px);

        let block = lines.len() as f32 * step;
        let mut y = zone.top as f32 + (zone.height() as f32 - block).max(0.0) / 2.0;
        let shadow_offset = (px / 20.0).max(2.0);

        for line in &lines {
            let x = (width - text_width(&self.font, px, line)) / 2.0;
            draw_text(&mut canvas, &self.font, px, x + shadow_offset, y + shadow_offset, shadow, line);
            draw_text(&mut canvas, &self.font, px, x, y, color, line);
            y += step;
        }

        if !self.watermark.is_empty() {
            let mark_width = text_width(&self.watermark_font, WATERMARK_PX, &self.watermark);
            let x = width - mark_width - WATERMARK_MARGIN as f32;
            let y = canvas.height() as f32 - line_height(&self.watermark_font, WATERMARK_PX) - WATERMARK_MARGIN as f32;
            draw_text(
                &mut canvas,
                &self.watermark_font,
                WATERMARK_PX,
                x,
                y,
                Rgba([255, 255, 255, 170]),
                &self.watermark,
            );
        }

        let rgb = DynamicImage::ImageRgba8(canvas).to_rgb8();
        let mut out = Vec::new();
        JpegEncoder::new_with_quality(&mut out, JPEG_QUALITY)
            .encode_image(&rgb)
            .context("Failed to encode composed image")?;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Luma, Rgb};

    fn gray(width: u32, height: u32, f: impl Fn(u32, u32) -> u8) -> GrayImage {
        ImageBuffer::from_fn(width, height, |x, y| Luma([f(x, y)]))
    }

    #[test]
    fn crop_produces_target_size_from_any_aspect() {
        for (w, h) in [(1024, 1536), (1536, 1024), (500, 500)] {
            let img = DynamicImage::ImageRgb8(ImageBuffer::from_pixel(w, h, Rgb([10, 20, 30])));
            let cropped = crop_to_target(&img);
            assert_eq!((cropped.width(), cropped.height()), (TARGET_WIDTH, TARGET_HEIGHT));
        }
    }

    #[test]
    fn calm_band_wins_over_noisy_ones() {
        // Checkerboard everywhere except a flat middle band.
        let img = gray(200, 400, |x, y| {
            if (140..270).contains(&y) {
                120
            } else if (x + y) % 2 == 0 {
                0
            } else {
                255
            }
        });

        let zone = choose_zone(&img);

        assert_eq!(zone, candidate_zones(400)[1]);
        assert!(busyness(&img, zone) < 1.0);
    }

    #[test]
    fn flat_image_prefers_first_band() {
        let img = gray(100, 100, |_, _| 50);
        assert_eq!(choose_zone(&img), candidate_zones(100)[0]);
    }

    #[test]
    fn text_color_follows_background() {
        let bright = gray(100, 100, |_, _| 230);
        let dark = gray(100, 100, |_, _| 20);
        let zone = Zone { top: 0, bottom: 50 };

        let (on_bright, _) = text_colors(mean_luminance(&bright, zone));
        let (on_dark, _) = text_colors(mean_luminance(&dark, zone));

        assert!(on_bright.0[0] < 100);
        assert!(on_dark.0[0] > 200);
    }

    #[test]
    fn wrap_respects_width() {
        let measure = |s: &str| s.chars().count() as f32;
        let lines = wrap_text("Growth is quiet when no one is watching.", 16.0, measure);

        assert_eq!(lines, vec!["Growth is quiet", "when no one is", "watching."]);
        assert!(lines.iter().all(|l| measure(l.as_str()) <= 16.0));
    }

    #[test]
    fn wrap_keeps_overlong_word_whole() {
        let lines = wrap_text("a extraordinarily b", 5.0, |s| s.len() as f32);
        assert_eq!(lines, vec!["a", "extraordinarily", "b"]);
    }

    #[test]
    fn wrap_of_blank_text_is_empty() {
        assert!(wrap_text("   ", 10.0, |s| s.len() as f32).is_empty());
    }

    fn fixture_font() -> Font<'static> {
        load_font(&Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/DejaVuSans.ttf")).unwrap()
    }

    fn encode_png(img: &DynamicImage) -> Vec<u8> {
        let mut bytes = std::io::Cursor::new(Vec::new());
        img.write_to(&mut bytes, image::ImageFormat::Png).unwrap();
        bytes.into_inner()
    }

    #[test]
    fn composed_post_is_a_feed_sized_jpeg() {
        let compositor = TextCompositor::new(fixture_font(), fixture_font(), "@dailyquietlight");
        let source = DynamicImage::ImageRgb8(ImageBuffer::from_fn(1024, 1536, |x, y| {
            Rgb([(x % 256) as u8, (y % 256) as u8, 90])
        }));

        let jpeg = compositor
            .compose(&encode_png(&source), "Growth is quiet when no one is watching.")
            .unwrap();

        assert_eq!(image::guess_format(&jpeg).unwrap(), image::ImageFormat::Jpeg);
        let decoded = image::load_from_memory(&jpeg).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (TARGET_WIDTH, TARGET_HEIGHT));
    }

    #[test]
    fn long_quote_shrinks_to_fit_band() {
        let compositor = TextCompositor::new(fixture_font(), fixture_font(), "");
        let zone = Zone { top: 0, bottom: 350 };
        let long_quote = "Some seasons ask you to be brave, and others only ask you to stay, \
                          to breathe, to keep the small light going until the morning comes back.";

        let (short_px, _) = compositor.fit_text("Rest.", 864.0, zone);
        let (long_px, lines) = compositor.fit_text(long_quote, 864.0, zone);

        assert_eq!(short_px, MAX_FONT_PX);
        assert!(long_px < MAX_FONT_PX);
        assert!(long_px >= MIN_FONT_PX);
        assert!(lines.len() > 1);

        let (floor_px, _) = compositor.fit_text(&long_quote.repeat(4), 864.0, zone);
        assert_eq!(floor_px, MIN_FONT_PX);
    }

    #[test]
    fn undecodable_image_is_an_error() {
        let compositor = TextCompositor::new(fixture_font(), fixture_font(), "");
        assert!(compositor.compose(b"not an image", "quote").is_err());
    }

    #[test]
    fn blend_ignores_out_of_bounds() {
        let mut img = RgbaImage::from_pixel(2, 2, Rgba([0, 0, 0, 255]));
        blend(&mut img, -1, 0, Rgba([255, 255, 255, 255]), 1.0);
        blend(&mut img, 5, 5, Rgba([255, 255, 255, 255]), 1.0);
        blend(&mut img, 1, 1, Rgba([255, 255, 255, 255]), 1.0);

        assert_eq!(img.get_pixel(0, 0).0, [0, 0, 0, 255]);
        assert_eq!(img.get_pixel(1, 1).0, [255, 255, 255, 255]);
    }
}
