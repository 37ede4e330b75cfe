//! Compositor (C6): `generate_image`, ported.
//!
//! Builds one page's merged canvas from its extracted images, their
//! recovered clip paths, and the overlay render of everything that isn't
//! an image. Coordinates throughout are the same raw, bottom-up PDF units
//! `content_stream.rs` recovers them in — including the y-flip that
//! ignores the page rect's own y0 offset, the same simplification
//! `original_source/pdf2img.py::create_clipping_path_image` makes (see
//! SPEC_FULL §9).

use image::{DynamicImage, Rgb, RgbImage};
use pdfium_render::prelude::Pdfium;
use tracing::warn;

use crate::accessor::{ImageRef, PdfAccessor, rasterize_page};
use crate::classifier::{self, ColorMode, ExtractedImage};
use crate::clip_raster::{self, ClipMask};
use crate::config::Config;
use crate::content_stream::{self, Matrix, Placement};
use crate::error::Result;

/// What one page composed to: the merged canvas, plus any JPEGs that need
/// writing out separately because `--extract-jpeg` was set.
pub struct ComposeOutcome {
    pub image: DynamicImage,
    pub extracted_jpegs: Vec<(u32, Vec<u8>)>,
    /// Set when `image` was thresholded to true black/white (`prefer_mono`
    /// on an all-bilevel page) — the encoder writes these as a genuine
    /// 1-bit-per-pixel PNG rather than 8-bit grayscale (§8 scenario 5).
    pub is_bilevel: bool,
}

struct ImagePlan<'a> {
    img: &'a ImageRef,
    placement: Placement,
    matrix: Matrix,
    zoom: f64,
    color_mode: ColorMode,
}

/// `generate_image`.
pub fn compose_page(
    config: &Config,
    accessor: &PdfAccessor,
    overlay: &PdfAccessor,
    pdfium: &Pdfium,
    page_index: u32,
    pagenum_str: &str,
) -> Result<ComposeOutcome> {
    let images = accessor.images_on_page(page_index)?;
    if images.is_empty() {
        // 600 DPI zero-image fallback (§4.5 ADDED note).
        let image = rasterize_page(pdfium, accessor.bytes(), page_index, 600.0 / 72.0, true)?;
        return Ok(ComposeOutcome { image, extracted_jpegs: Vec::new(), is_bilevel: false });
    }

    let page_rect = accessor.page_rect(page_index)?;
    let mut has_warning = false;
    let mut is_mono = true;
    let mut canvas_color = false;

    let mut plans: Vec<ImagePlan> = Vec::with_capacity(images.len());
    for img in &images {
        let placement = content_stream::recover_placement(&img.referencer_content, &img.name);
        let matrix = content_stream::matrix_or_identity(&placement);

        if matrix.b.abs() > 1e-6 || matrix.c.abs() > 1e-6 {
            warn!(page = pagenum_str, xref = img.xref, "image rotated or skewed, output will differ from the pdf");
            has_warning = true;
        }
        let zoom_x = img.width as f64 / matrix.a.abs().max(1e-6);
        let zoom_y = img.height as f64 / matrix.d.abs().max(1e-6);
        if zoom_x / zoom_y > 1.01 || zoom_y / zoom_x > 1.01 {
            warn!(page = pagenum_str, xref = img.xref, "image aspect ratio changed");
            has_warning = true;
        }

        let color_mode = classifier::classify_color_space(accessor, img);
        if color_mode != ColorMode::Bilevel {
            is_mono = false;
        }
        if matches!(color_mode, ColorMode::Rgb | ColorMode::Cmyk) {
            canvas_color = true;
        }

        plans.push(ImagePlan { img, placement, matrix, zoom: zoom_x, color_mode });
    }

    let largest = plans
        .iter()
        .enumerate()
        .max_by_key(|(_, p)| p.img.width as u64 * p.img.height as u64)
        .map(|(i, _)| i)
        .unwrap_or(0);
    let zoom = plans[largest].zoom;

    for plan in &plans {
        let a = ((page_rect.3) * zoom).ceil();
        let b = ((page_rect.3) * plan.zoom).ceil();
        if (a - b).abs() > f64::EPSILON {
            warn!(page = pagenum_str, "page contains images at different zoom levels");
            has_warning = true;
            break;
        }
    }

    let mut rect_merge = page_rect;
    if config.no_crop {
        if images.len() > 1 {
            warn!(page = pagenum_str, "multiple images with no-crop may overlap");
            has_warning = true;
        }
        for plan in &plans {
            let (x0, y0, x1, y1) = placement_bounds(&plan.matrix);
            rect_merge.0 = rect_merge.0.min(x0);
            rect_merge.1 = rect_merge.1.min(y0);
            rect_merge.2 = rect_merge.2.max(x1);
            rect_merge.3 = rect_merge.3.max(y1);
        }
    }

    if has_warning && config.render_image {
        warn!(page = pagenum_str, "falling back to a full render for this page");
        let rendered = rasterize_page(pdfium, accessor.bytes(), page_index, zoom, false)?;
        let image = if canvas_color { rendered } else { DynamicImage::ImageLuma8(rendered.to_luma8()) };
        return Ok(ComposeOutcome { image, extracted_jpegs: Vec::new(), is_bilevel: false });
    }

    let width_merge = ((rect_merge.2 - rect_merge.0) * zoom).ceil().max(1.0) as u32;
    let height_merge = ((rect_merge.3 - rect_merge.1) * zoom).ceil().max(1.0) as u32;
    let mut canvas = RgbImage::from_pixel(width_merge, height_merge, Rgb([255, 255, 255]));

    let mut extracted_jpegs = Vec::new();

    for plan in &plans {
        let extracted = classifier::extract_image(accessor, plan.img)?;
        let (x0, y0, x1, y1) = placement_bounds(&plan.matrix);
        let pos_x = ((x0 - rect_merge.0) * zoom).round() as i64;
        // Naive top-down flip ignoring rect_merge.1, matching the
        // original's own simplification rather than a geometrically
        // rigorous conversion (see module doc comment).
        let pos_y = (height_merge as f64 - (y1) * zoom).round() as i64;

        match extracted {
            ExtractedImage::Jpeg(bytes) => {
                if config.extract_jpeg {
                    extracted_jpegs.push((plan.img.xref, bytes.clone()));
                }
                let decoded =
                    image::load_from_memory_with_format(&bytes, image::ImageFormat::Jpeg)?;
                paste_with_clip(&mut canvas, &decoded, pos_x, pos_y, plan, width_merge, height_merge, config.no_crop)?;
            }
            ExtractedImage::Pixels(decoded) => {
                paste_with_clip(&mut canvas, &decoded, pos_x, pos_y, plan, width_merge, height_merge, config.no_crop)?;
            }
            ExtractedImage::Mask { width, height, bits } => {
                paste_imagemask(&mut canvas, &bits, width, height, pos_x, pos_y, plan, width_merge, height_merge, config.no_crop)?;
            }
        }
        let _ = (x0, y0, x1, y1);
    }

    // `img_noimg = render_image(page_noimg, zoom, colorspace=mode_merge,
    // alpha=True)` then pasted with itself as mask: everywhere the overlay
    // page (images blanked, per `stripper.rs`) painted something opaque,
    // that mark gets merged in on top of the pasted images. Skipped
    // entirely when `original-only` is set (§4.5 step 8): the caller wants
    // just the recovered images, with no non-image marks pasted over them.
    if !config.original_only {
        let overlay_render = rasterize_page(pdfium, overlay.bytes(), page_index, zoom, false);
        if let Ok(overlay_render) = overlay_render {
            let offset_x = ((page_rect.0 - rect_merge.0) * zoom).round() as i64;
            let offset_y = ((rect_merge.3 - page_rect.3) * zoom).round() as i64;
            merge_overlay(&mut canvas, &overlay_render, (offset_x, offset_y));
        } else {
            warn!(page = pagenum_str, "overlay render failed, page may be missing non-image marks");
        }
    }

    let mut image = if canvas_color {
        DynamicImage::ImageRgb8(canvas)
    } else {
        DynamicImage::ImageLuma8(image::imageops::grayscale(&canvas))
    };

    if is_mono && config.prefer_mono {
        image = DynamicImage::ImageLuma8(threshold_to_bilevel(&image.to_luma8()));
    }

    Ok(ComposeOutcome { image, extracted_jpegs, is_bilevel: is_mono && config.prefer_mono })
}

/// Paste the overlay page render (everything but the images) over
/// `canvas`, using the render's own alpha channel as the paste mask —
/// opaque marks (text, vector art) come through, transparent holes where
/// images used to be leave the already-pasted image pixels untouched.
/// The alpha is snapped to fully-on/off first (`a = a > 254 ? 255 : 0`,
/// §4.5 step 8): anti-aliased edge pixels drop out rather than painting a
/// grey halo over the image underneath.
fn merge_overlay(canvas: &mut RgbImage, overlay_render: &DynamicImage, offset: (i64, i64)) {
    let rgba = overlay_render.to_rgba8();
    for (x, y, pixel) in rgba.enumerate_pixels() {
        if pixel.0[3] <= 254 {
            continue;
        }
        let dst_x = offset.0 + x as i64;
        let dst_y = offset.1 + y as i64;
        if dst_x < 0 || dst_y < 0 {
            continue;
        }
        let (dst_x, dst_y) = (dst_x as u32, dst_y as u32);
        if dst_x >= canvas.width() || dst_y >= canvas.height() {
            continue;
        }
        canvas.put_pixel(dst_x, dst_y, Rgb([pixel.0[0], pixel.0[1], pixel.0[2]]));
    }
}

fn placement_bounds(matrix: &Matrix) -> (f64, f64, f64, f64) {
    let (x0, x1) = if matrix.a >= 0.0 { (matrix.e, matrix.e + matrix.a) } else { (matrix.e + matrix.a, matrix.e) };
    let (y0, y1) = if matrix.d >= 0.0 { (matrix.f, matrix.f + matrix.d) } else { (matrix.f + matrix.d, matrix.f) };
    (x0, y0, x1, y1)
}

#[allow(clippy::too_many_arguments)]
fn paste_with_clip(
    canvas: &mut RgbImage,
    src: &DynamicImage,
    pos_x: i64,
    pos_y: i64,
    plan: &ImagePlan,
    canvas_w: u32,
    canvas_h: u32,
    no_crop: bool,
) -> Result<()> {
    let src_rgb = src.to_rgb8();
    let (w, h) = (src_rgb.width(), src_rgb.height());
    let mask = clip_mask_for(plan, canvas_w, canvas_h, w, h, pos_x, pos_y, no_crop)?;
    for y in 0..h {
        for x in 0..w {
            if !mask.get(x, y) {
                continue;
            }
            let (cx, cy) = (pos_x + x as i64, pos_y + y as i64);
            if cx < 0 || cy < 0 || cx as u32 >= canvas_w || cy as u32 >= canvas_h {
                continue;
            }
            canvas.put_pixel(cx as u32, cy as u32, *src_rgb.get_pixel(x, y));
        }
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn paste_imagemask(
    canvas: &mut RgbImage,
    bits: &[u8],
    width: u32,
    height: u32,
    pos_x: i64,
    pos_y: i64,
    plan: &ImagePlan,
    canvas_w: u32,
    canvas_h: u32,
    no_crop: bool,
) -> Result<()> {
    let mask = clip_mask_for(plan, canvas_w, canvas_h, width, height, pos_x, pos_y, no_crop)?;
    let stride = (width as usize).div_ceil(8);
    for y in 0..height {
        for x in 0..width {
            if !mask.get(x, y) {
                continue;
            }
            let byte = bits.get(y as usize * stride + x as usize / 8).copied().unwrap_or(0xFF);
            let bit = (byte >> (7 - (x as usize % 8))) & 1;
            if bit != 0 {
                // Decode default [0 1]: 1 means "don't paint".
                continue;
            }
            let (cx, cy) = (pos_x + x as i64, pos_y + y as i64);
            if cx < 0 || cy < 0 || cx as u32 >= canvas_w || cy as u32 >= canvas_h {
                continue;
            }
            canvas.put_pixel(cx as u32, cy as u32, Rgb([0, 0, 0]));
        }
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn clip_mask_for(
    plan: &ImagePlan,
    canvas_w: u32,
    canvas_h: u32,
    src_w: u32,
    src_h: u32,
    pos_x: i64,
    pos_y: i64,
    no_crop: bool,
) -> Result<ClipMask> {
    if no_crop {
        return Ok(ClipMask::all_white(src_w, src_h));
    }
    let full = clip_raster::rasterize_clip(&plan.placement.clip, canvas_w, canvas_h, plan.zoom)?;
    let x0 = pos_x.max(0) as u32;
    let y0 = pos_y.max(0) as u32;
    Ok(full.crop(x0, y0, src_w, src_h))
}

fn threshold_to_bilevel(image: &image::GrayImage) -> image::GrayImage {
    image::GrayImage::from_fn(image.width(), image.height(), |x, y| {
        let v = image.get_pixel(x, y).0[0];
        image::Luma([if v > 127 { 255 } else { 0 }])
    })
}
