use std::path::{Path, PathBuf};

use ab_glyph::{FontArc, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;
use tracing::debug;

use crate::error::Result;
use crate::mapping::ClassNames;
use crate::results::Detection;

/// Ultralytics plotting palette.
const PALETTE: [[u8; 3]; 20] = [
    [0x04, 0x2A, 0xFF], [0x0B, 0xDB, 0xEB], [0xF3, 0xF3, 0xF3], [0x00, 0xDF, 0xB7],
    [0x11, 0x1F, 0x68], [0xFF, 0x6F, 0xDD], [0xFF, 0x44, 0x4F], [0xCC, 0xED, 0x00],
    [0x00, 0xF3, 0x44], [0xBD, 0x00, 0xFF], [0x00, 0xB4, 0xFF], [0xDD, 0x00, 0xBA],
    [0x00, 0xFF, 0xFF], [0x26, 0xC0, 0x00], [0x01, 0xFF, 0xB3], [0x7D, 0x24, 0xFF],
    [0x7B, 0x00, 0x68], [0xFF, 0x1B, 0x6C], [0xFC, 0x6D, 0x2F], [0xA2, 0xFF, 0x0B],
];

const SYSTEM_FONTS: &[&str] = &[
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
    "/System/Library/Fonts/Supplemental/Arial.ttf",
    "/Library/Fonts/Arial.ttf",
    "C:\\Windows\\Fonts\\arial.ttf",
];

pub fn class_color(class_id: usize) -> Rgb<u8> {
    Rgb(PALETTE[class_id % PALETTE.len()])
}

/// Loads a TrueType/OpenType font from disk.
pub fn load_font(path: impl AsRef<Path>) -> Result<FontArc> {
    let bytes = std::fs::read(path.as_ref())?;
    FontArc::try_from_vec(bytes).map_err(|e| {
        crate::error::VisionError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("{}: {e}", path.as_ref().display()),
        ))
    })
}

/// Finds a usable font in the usual system locations.
pub fn find_system_font() -> Option<FontArc> {
    let user_fonts = dirs::font_dir()
        .into_iter()
        .flat_map(|dir| [dir.join("DejaVuSans.ttf"), dir.join("Arial.ttf")]);
    SYSTEM_FONTS
        .iter()
        .map(PathBuf::from)
        .chain(user_fonts)
        .filter(|p| p.is_file())
        .find_map(|p| match load_font(&p) {
            Ok(font) => {
                debug!("Using font {}", p.display());
                Some(font)
            }
            Err(e) => {
                debug!("Skipping font {}: {e}", p.display());
                None
            }
        })
}

/// Draws detection boxes and labels.
#[derive(Clone, Default)]
pub struct Annotator {
    pub font: Option<FontArc>,
    /// Box outline width in pixels; derived from the image size when unset.
    pub line_width: Option<u32>,
    pub hide_labels: bool,
    pub hide_conf: bool,
}

impl std::fmt::Debug for Annotator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Annotator")
            .field("font", &self.font.as_ref().map(|_| "FontArc"))
            .field("line_width", &self.line_width)
            .field("hide_labels", &self.hide_labels)
            .field("hide_conf", &self.hide_conf)
            .finish()
    }
}

impl Annotator {
    pub fn with_font(mut self, font: Option<FontArc>) -> Self {
        self.font = font;
        self
    }

    pub fn line_width_for(&self, width: u32, height: u32) -> u32 {
        self.line_width
            .unwrap_or_else(|| (((width + height) as f32 / 2.0 * 0.003).round() as u32).max(2))
    }

    pub fn label(&self, detection: &Detection, names: &ClassNames) -> Option<String> {
        if self.hide_labels {
            return None;
        }
        let name = names.get(detection.class_id);
        if self.hide_conf {
            Some(name)
        } else {
            Some(format!("{name} {:.2}", detection.confidence))
        }
    }

    /// Returns a copy of `img` with every detection drawn on it.
    pub fn annotate(&self, img: &RgbImage, detections: &[Detection], names: &ClassNames) -> RgbImage {
        let mut canvas = img.clone();
        let (img_w, img_h) = (canvas.width(), canvas.height());
        if img_w == 0 || img_h == 0 {
            return canvas;
        }
        let lw = self.line_width_for(img_w, img_h);

        for det in detections {
            let color = class_color(det.class_id);
            let left = det.bbox.x1.round() as i32;
            let top = det.bbox.y1.round() as i32;
            let width = (det.bbox.width().round() as u32).max(1);
            let height = (det.bbox.height().round() as u32).max(1);

            // grow inward so the outline stays inside the box
            for t in 0..lw.min(width.div_ceil(2)).min(height.div_ceil(2)) {
                let rect = Rect::at(left + t as i32, top + t as i32)
                    .of_size(width - 2 * t, height - 2 * t);
                draw_hollow_rect_mut(&mut canvas, rect, color);
            }

            if let (Some(font), Some(label)) = (&self.font, self.label(det, names)) {
                self.draw_label(&mut canvas, font, &label, left, top, lw, color);
            }
        }
        canvas
    }

    #[allow(clippy::too_many_arguments)]
    fn draw_label(
        &self,
        canvas: &mut RgbImage,
        font: &FontArc,
        label: &str,
        left: i32,
        top: i32,
        lw: u32,
        color: Rgb<u8>,
    ) {
        let scale = PxScale::from((lw * 6).max(12) as f32);
        let (text_w, text_h) = text_size(scale, font, label);
        let pad = (lw / 2).max(1);
        let bar_h = text_h + 2 * pad;
        // above the box when there is room, inside it otherwise
        let bar_top = if top - bar_h as i32 >= 0 { top - bar_h as i32 } else { top };
        let bar = Rect::at(left, bar_top).of_size(text_w + 2 * pad, bar_h);
        draw_filled_rect_mut(canvas, bar, color);
        draw_text_mut(
            canvas,
            text_color(color),
            left + pad as i32,
            bar_top + pad as i32,
            scale,
            font,
            label,
        );
    }
}

/// Dark text on light palette entries, white otherwise.
fn text_color(background: Rgb<u8>) -> Rgb<u8> {
    let [r, g, b] = background.0;
    let luma = 0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32;
    if luma > 160.0 { Rgb([0x10, 0x10, 0x10]) } else { Rgb([0xFF, 0xFF, 0xFF]) }
}
