//! Image Classifier + Extractor (C3).
//!
//! Decision order ported from `original_source/pdf2img.py::extract_image`
//! rather than from teacher's MRC pipeline, which has no equivalent
//! classifier — teacher's `pdf/image_xobject.rs` only contributes the
//! dictionary-reading and stream-decoding plumbing this module sits on top
//! of. Two branches below ("indirect colour space" and "unrecognised
//! colour space") are carried forward unresolved, exactly as the original
//! leaves them: a best-effort format-sniffing fallback rather than a
//! correct decode, annotated at the call site it was ported from.

use image::{DynamicImage, ImageBuffer, Luma, Rgb};

use crate::accessor::{ImageRef, PdfAccessor};
use crate::error::{Pdf2ImgError, Result};

/// The colour-space classification `get_image_colorspace` produces — drives
/// both extraction and the compositor's canvas-mode merge (§4.2, §4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorMode {
    /// `ImageMask` or 1-bit-per-component: bilevel.
    Bilevel,
    Gray,
    Rgb,
    Cmyk,
}

/// What C3 hands back for one image: either bytes the encoder can pass
/// through untouched, or a decoded pixel buffer the compositor pastes.
pub enum ExtractedImage {
    /// Raw JPEG bytes — not re-encoded unless the caller explicitly wants
    /// a transcode (`--extract-jpeg` still writes these bytes as-is).
    Jpeg(Vec<u8>),
    /// An `ImageMask` stencil: 1 bit/pixel, MSB first, un-color-managed.
    Mask { width: u32, height: u32, bits: Vec<u8> },
    /// Anything else, already decoded to a concrete pixel buffer.
    Pixels(DynamicImage),
}

/// `get_image_colorspace`: classify without decoding pixel data.
pub fn classify_color_space(accessor: &PdfAccessor, img: &ImageRef) -> ColorMode {
    if img.image_mask {
        return ColorMode::Bilevel;
    }
    if img.bits_per_component == 1 {
        return ColorMode::Bilevel;
    }
    if img.color_space == "Indirect" {
        return ColorMode::Rgb;
    }
    match img.color_space.as_str() {
        "DeviceCMYK" => ColorMode::Cmyk,
        "DeviceGray" => ColorMode::Gray,
        "DeviceRGB" => ColorMode::Rgb,
        _ => {
            let _ = accessor;
            ColorMode::Rgb
        }
    }
}

/// `extract_image`: decode (or pass through) one image XObject's pixel
/// data, following the original's exact branch order.
pub fn extract_image(accessor: &PdfAccessor, img: &ImageRef) -> Result<ExtractedImage> {
    let is_jpeg = img.filter.as_deref() == Some("DCTDecode");

    if is_jpeg {
        if img.color_space == "Indirect" || img.color_space == "DeviceCMYK" {
            // The original re-decodes through a colour-managed pixmap here
            // ("directly reading the raw stream produces inverted colour"
            // for indirect/CMYK JPEGs) rather than trusting the JPEG's own
            // declared colour transform. `image`'s JPEG decoder performs
            // the equivalent Adobe-marker-aware colour transform on decode,
            // so decoding the raw bytes through it serves the same purpose.
            let raw = accessor.stream_raw(img.xref)?;
            let decoded = image::load_from_memory_with_format(&raw, image::ImageFormat::Jpeg)?;
            return Ok(ExtractedImage::Pixels(decoded));
        }
        return Ok(ExtractedImage::Jpeg(accessor.stream_raw(img.xref)?));
    }

    if img.image_mask {
        let bits = accessor.stream_decoded(img.xref)?;
        return Ok(ExtractedImage::Mask { width: img.width, height: img.height, bits });
    }

    if img.bits_per_component == 1 {
        let bits = accessor.stream_decoded(img.xref)?;
        let image = unpack_1bpp_to_gray(&bits, img.width, img.height)?;
        return Ok(ExtractedImage::Pixels(DynamicImage::ImageLuma8(image)));
    }

    if img.color_space == "Indirect" {
        // "太難了不會做，用第一版的方法" — too hard to classify properly;
        // fall back to sniffing the raw stream as a self-contained image
        // file, same last resort the original reaches for here.
        return sniff_fallback(accessor, img);
    }

    match img.color_space.as_str() {
        "DeviceCMYK" => {
            let raw = accessor.stream_decoded(img.xref)?;
            cmyk_image(&raw, img.width, img.height).map(ExtractedImage::Pixels)
        }
        "DeviceGray" => {
            let raw = accessor.stream_decoded(img.xref)?;
            gray_image(&raw, img.width, img.height).map(ExtractedImage::Pixels)
        }
        "DeviceRGB" => {
            let raw = accessor.stream_decoded(img.xref)?;
            rgb_image(&raw, img.width, img.height).map(ExtractedImage::Pixels)
        }
        _ => sniff_fallback(accessor, img),
    }
}

/// Same last-resort path the original takes for an unrecognised colour
/// space: treat the stream as an embedded image file and let a generic
/// decoder guess the format, rather than interpreting it as raw samples.
fn sniff_fallback(accessor: &PdfAccessor, img: &ImageRef) -> Result<ExtractedImage> {
    let raw = accessor.stream_decoded(img.xref)?;
    image::load_from_memory(&raw)
        .map(ExtractedImage::Pixels)
        .map_err(|_| Pdf2ImgError::UnknownColorSpace { xref: img.xref })
}

fn rgb_image(raw: &[u8], width: u32, height: u32) -> Result<DynamicImage> {
    let expected = width as usize * height as usize * 3;
    if raw.len() < expected {
        return Err(Pdf2ImgError::content_stream(format!(
            "RGB stream too short: got {} bytes, need {expected}",
            raw.len()
        )));
    }
    let buf = ImageBuffer::<Rgb<u8>, _>::from_raw(width, height, raw[..expected].to_vec())
        .ok_or_else(|| Pdf2ImgError::content_stream("RGB buffer dimensions mismatch"))?;
    Ok(DynamicImage::ImageRgb8(buf))
}

fn gray_image(raw: &[u8], width: u32, height: u32) -> Result<DynamicImage> {
    let expected = width as usize * height as usize;
    if raw.len() < expected {
        return Err(Pdf2ImgError::content_stream(format!(
            "gray stream too short: got {} bytes, need {expected}",
            raw.len()
        )));
    }
    let buf = ImageBuffer::<Luma<u8>, _>::from_raw(width, height, raw[..expected].to_vec())
        .ok_or_else(|| Pdf2ImgError::content_stream("gray buffer dimensions mismatch"))?;
    Ok(DynamicImage::ImageLuma8(buf))
}

/// CMYK has no native `image` pixel type; carried as RGB8 via the same
/// naive subtractive conversion PIL's `CMYK -> RGB` uses, since the
/// compositor and encoder only ever need CMYK coerced to RGB (§4.5, §4.7).
fn cmyk_image(raw: &[u8], width: u32, height: u32) -> Result<DynamicImage> {
    let expected = width as usize * height as usize * 4;
    if raw.len() < expected {
        return Err(Pdf2ImgError::content_stream(format!(
            "CMYK stream too short: got {} bytes, need {expected}",
            raw.len()
        )));
    }
    let mut rgb = Vec::with_capacity(width as usize * height as usize * 3);
    for px in raw[..expected].chunks_exact(4) {
        let (c, m, y, k) = (px[0] as u32, px[1] as u32, px[2] as u32, px[3] as u32);
        rgb.push((255 - c.min(255 - k)).clamp(0, 255) as u8);
        rgb.push((255 - m.min(255 - k)).clamp(0, 255) as u8);
        rgb.push((255 - y.min(255 - k)).clamp(0, 255) as u8);
    }
    let buf = ImageBuffer::<Rgb<u8>, _>::from_raw(width, height, rgb)
        .ok_or_else(|| Pdf2ImgError::content_stream("CMYK->RGB buffer dimensions mismatch"))?;
    Ok(DynamicImage::ImageRgb8(buf))
}

/// Unpack an MSB-first 1-bit-per-pixel stream into 8-bit grayscale
/// (0 -> black, 1 -> white), mirroring `Image.frombytes('1', ...)`.
fn unpack_1bpp_to_gray(raw: &[u8], width: u32, height: u32) -> Result<ImageBuffer<Luma<u8>, Vec<u8>>> {
    let stride = (width as usize).div_ceil(8);
    if raw.len() < stride * height as usize {
        return Err(Pdf2ImgError::content_stream("1-bpp stream shorter than width*height implies"));
    }
    let mut out = vec![0u8; width as usize * height as usize];
    for y in 0..height as usize {
        for x in 0..width as usize {
            let byte = raw[y * stride + x / 8];
            let bit = (byte >> (7 - (x % 8))) & 1;
            out[y * width as usize + x] = if bit == 1 { 255 } else { 0 };
        }
    }
    ImageBuffer::from_raw(width, height, out)
        .ok_or_else(|| Pdf2ImgError::content_stream("1-bpp buffer dimensions mismatch"))
}
