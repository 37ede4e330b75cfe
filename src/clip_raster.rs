//! Clip-Path Rasteriser (C5).
//!
//! Replays the commands recovered by [`crate::content_stream`] against an
//! affine path, fills it, and packs the result into a 1-bpp mask (MSB
//! first) the size of the merged canvas. `tiny-skia` represents masks as
//! one coverage byte per pixel rather than packed bits, so the packing
//! step here is this repo's own — see DESIGN.md's Open Question note.

use tiny_skia::{FillRule, Mask, Path, PathBuilder, Transform};

use crate::content_stream::ClipCommand;
use crate::error::{Pdf2ImgError, Result};

/// A packed 1-bpp bitmap, MSB first, 1 = inside the clip path.
#[derive(Debug, Clone)]
pub struct ClipMask {
    pub width: u32,
    pub height: u32,
    stride: usize,
    bits: Vec<u8>,
}

impl ClipMask {
    fn empty(width: u32, height: u32, fill: bool) -> Self {
        let stride = (width as usize).div_ceil(8);
        let byte = if fill { 0xFF } else { 0x00 };
        Self { width, height, stride, bits: vec![byte; stride * height as usize] }
    }

    /// Solid white mask the size of the image: spec.md's "entire image"
    /// fallback when no clip path was recovered.
    pub fn all_white(width: u32, height: u32) -> Self {
        Self::empty(width, height, true)
    }

    pub fn get(&self, x: u32, y: u32) -> bool {
        if x >= self.width || y >= self.height {
            return false;
        }
        let byte = self.bits[y as usize * self.stride + (x as usize) / 8];
        let bit_index = 7 - (x as usize % 8);
        (byte >> bit_index) & 1 == 1
    }

    fn set(&mut self, x: u32, y: u32, value: bool) {
        let idx = y as usize * self.stride + (x as usize) / 8;
        let bit_index = 7 - (x as usize % 8);
        if value {
            self.bits[idx] |= 1 << bit_index;
        } else {
            self.bits[idx] &= !(1 << bit_index);
        }
    }

    /// Crop to the bounding box of a placed image, matching the paste-mask
    /// size the compositor expects.
    pub fn crop(&self, x0: u32, y0: u32, width: u32, height: u32) -> ClipMask {
        let mut out = ClipMask::empty(width, height, false);
        for y in 0..height {
            for x in 0..width {
                let src_x = x0 + x;
                let src_y = y0 + y;
                if src_x < self.width && src_y < self.height {
                    out.set(x, y, self.get(src_x, src_y));
                }
            }
        }
        out
    }
}

/// Rasterise `commands` (page units, y-up) into a [`ClipMask`] sized
/// `canvas_width × canvas_height`, at `zoom` pixels per page unit.
///
/// An empty command list means no clip was recovered and yields a solid
/// white mask (§4.3's documented fallback).
pub fn rasterize_clip(
    commands: &[ClipCommand],
    canvas_width: u32,
    canvas_height: u32,
    zoom: f64,
) -> Result<ClipMask> {
    if commands.is_empty() {
        return Ok(ClipMask::all_white(canvas_width, canvas_height));
    }

    let path = build_path(commands, canvas_height, zoom)
        .ok_or_else(|| Pdf2ImgError::clip_raster("clip path had no drawable geometry"))?;

    let mut mask = Mask::new(canvas_width, canvas_height)
        .ok_or_else(|| Pdf2ImgError::clip_raster("canvas dimensions out of range for a mask"))?;
    mask.fill_path(&path, FillRule::Winding, true, Transform::identity());

    Ok(pack_mask(&mask, canvas_width, canvas_height))
}

fn to_px(x: f64, y: f64, canvas_height: u32, zoom: f64) -> (f32, f32) {
    let px = (x * zoom) as f32;
    // y_px = canvas_height - y*zoom, per §4.3.
    let py = (canvas_height as f64 - y * zoom) as f32;
    (px, py)
}

fn build_path(commands: &[ClipCommand], canvas_height: u32, zoom: f64) -> Option<Path> {
    let mut pb = PathBuilder::new();
    let mut has_geometry = false;
    // tiny-skia's PathBuilder doesn't expose the current point, so `v`
    // (current-point-as-first-control-point) needs it tracked by hand.
    let mut current: (f32, f32) = (0.0, 0.0);
    for cmd in commands {
        match *cmd {
            ClipCommand::MoveTo(x, y) => {
                current = to_px(x, y, canvas_height, zoom);
                pb.move_to(current.0, current.1);
            }
            ClipCommand::LineTo(x, y) => {
                current = to_px(x, y, canvas_height, zoom);
                pb.line_to(current.0, current.1);
                has_geometry = true;
            }
            ClipCommand::CurveTo(x1, y1, x2, y2, x3, y3) => {
                let (p1x, p1y) = to_px(x1, y1, canvas_height, zoom);
                let (p2x, p2y) = to_px(x2, y2, canvas_height, zoom);
                current = to_px(x3, y3, canvas_height, zoom);
                pb.cubic_to(p1x, p1y, p2x, p2y, current.0, current.1);
                has_geometry = true;
            }
            ClipCommand::VCurveTo(x2, y2, x3, y3) => {
                let (p2x, p2y) = to_px(x2, y2, canvas_height, zoom);
                let (start_x, start_y) = current;
                current = to_px(x3, y3, canvas_height, zoom);
                pb.cubic_to(start_x, start_y, p2x, p2y, current.0, current.1);
                has_geometry = true;
            }
            ClipCommand::YCurveTo(x1, y1, x3, y3) => {
                let (p1x, p1y) = to_px(x1, y1, canvas_height, zoom);
                current = to_px(x3, y3, canvas_height, zoom);
                pb.cubic_to(p1x, p1y, current.0, current.1, current.0, current.1);
                has_geometry = true;
            }
            ClipCommand::Rect(x, y, w, h) => {
                let p0 = to_px(x, y, canvas_height, zoom);
                let p1 = to_px(x + w, y, canvas_height, zoom);
                let p2 = to_px(x + w, y + h, canvas_height, zoom);
                let p3 = to_px(x, y + h, canvas_height, zoom);
                pb.move_to(p0.0, p0.1);
                pb.line_to(p1.0, p1.1);
                pb.line_to(p2.0, p2.1);
                pb.line_to(p3.0, p3.1);
                pb.close();
                current = p0;
                has_geometry = true;
            }
            ClipCommand::Close => pb.close(),
        }
    }
    if !has_geometry {
        return None;
    }
    pb.finish()
}

fn pack_mask(mask: &Mask, width: u32, height: u32) -> ClipMask {
    let mut out = ClipMask::empty(width, height, false);
    let data = mask.data();
    for y in 0..height {
        for x in 0..width {
            let coverage = data[(y * width + x) as usize];
            out.set(x, y, coverage > 127);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rect_clip_at_unity_scale_matches_top_left_square() {
        let commands = vec![ClipCommand::Rect(0.0, 0.0, 100.0, 100.0)];
        let mask = rasterize_clip(&commands, 200, 200, 1.0).expect("rasterize");
        // After y-flip, the page-unit square [0,100]x[0,100] lands at the
        // bottom of a 200-tall canvas in page coordinates, i.e. pixel rows
        // 100..200 (since y_px = 200 - y).
        assert!(mask.get(10, 150));
        assert!(!mask.get(10, 50));
    }

    #[test]
    fn empty_commands_yield_all_white() {
        let mask = rasterize_clip(&[], 10, 10, 1.0).expect("rasterize");
        for y in 0..10 {
            for x in 0..10 {
                assert!(mask.get(x, y));
            }
        }
    }

    #[test]
    fn crop_extracts_requested_window() {
        let mask = ClipMask::all_white(50, 50);
        let cropped = mask.crop(10, 10, 20, 20);
        assert_eq!((cropped.width, cropped.height), (20, 20));
        assert!(cropped.get(0, 0));
    }
}
