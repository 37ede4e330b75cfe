//! Overlay-document builder (C2).
//!
//! `convert_page_init`'s `doc_noimg` construction, ported: for every page,
//! neutralise the leading path fill ahead of the first image's `Do` call
//! (`remove_path_fill`), then delete every image XObject's resource entry
//! on the page (`blank_images`) so the page has zero images afterwards and
//! rendering it with an alpha channel leaves transparent holes exactly
//! where images used to paint — the signal the compositor pastes the
//! extracted images back into (§4.1, §4.5). Garbage-collection and stream
//! compression borrow teacher's `pdf/optimizer.rs` pass.

use std::io::Write;

use flate2::Compression;
use flate2::write::ZlibEncoder;
use lopdf::{Object, Stream, dictionary};

use crate::accessor::PdfAccessor;
use crate::error::Result;

/// Build the "no-image" overlay document: same page content as the
/// original, minus every image's pixels, serialised and ready to be
/// reopened (the original goes through `fitz.open('pdf', tobytes())`, an
/// actual reopen step — `resync_bytes` is this repo's equivalent).
pub fn build_overlay(accessor: &PdfAccessor) -> Result<PdfAccessor> {
    let mut bytes = accessor.bytes().to_vec();
    let mut overlay = PdfAccessor::from_bytes(std::mem::take(&mut bytes))?;

    for page_index in 0..overlay.page_count() {
        remove_path_fill(&mut overlay, page_index)?;
        blank_images(&mut overlay, page_index)?;
    }

    compress_streams(overlay.doc_mut())?;
    overlay.doc_mut().prune_objects();
    overlay.resync_bytes()?;
    Ok(overlay)
}

/// `remove_path_fill`: on this page's first image only, flip `f`/`f*` to
/// `n` (fill -> no-op) in the operators preceding that image's `Do` call,
/// inside whichever stream actually invokes it (page content, or a Form
/// XObject's). A no-op here (no images on the page) matches the original's
/// early return.
fn remove_path_fill(accessor: &mut PdfAccessor, page_index: u32) -> Result<()> {
    let images = accessor.images_on_page(page_index)?;
    let Some(first) = images.first() else { return Ok(()) };

    let needle = format!("/{} Do\n", first.name);
    let Some(split_at) = find(&first.referencer_content, needle.as_bytes()) else {
        return Ok(());
    };
    let (before, after) = first.referencer_content.split_at(split_at);
    let patched = replace_all(before, b"\nf\n", b"\nn\n");
    let patched = replace_all(&patched, b"\nf*\n", b"\nn\n");

    let mut new_content = patched;
    new_content.extend_from_slice(after);

    if let Ok(Object::Stream(stream)) = accessor.doc_mut().get_object_mut(first.referencer_id) {
        stream.set_content(new_content);
    }
    Ok(())
}

/// `page.delete_image(xref)` for every image on the page: removes the
/// image's binding from whichever `/XObject` resource dictionary names it
/// (the page's own, inherited, or a Form XObject's), so the page reports
/// zero images afterwards and the `Do` call that used to invoke it is
/// simply gone rather than pointing at a blanked stand-in.
fn blank_images(accessor: &mut PdfAccessor, page_index: u32) -> Result<()> {
    let images = accessor.images_on_page(page_index)?;
    for img in images {
        accessor.remove_xobject_entry(img.resources_holder, &img.name)?;
    }
    Ok(())
}

/// Same as teacher's `optimizer::compress_streams`: FlateDecode any
/// still-uncompressed stream left after the blanking pass above.
fn compress_streams(doc: &mut lopdf::Document) -> Result<()> {
    let ids: Vec<_> = doc.objects.keys().copied().collect();
    for id in ids {
        let needs_compression = match doc.objects.get(&id) {
            Some(Object::Stream(stream)) => stream.dict.get(b"Filter").is_err(),
            _ => false,
        };
        if !needs_compression {
            continue;
        }
        let Some(Object::Stream(stream)) = doc.objects.get_mut(&id) else { continue };
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&stream.content)?;
        let compressed = encoder.finish()?;
        stream.dict.set("Filter", "FlateDecode");
        stream.set_content(compressed);
    }
    Ok(())
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn replace_all(haystack: &[u8], from: &[u8], to: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(haystack.len());
    let mut i = 0;
    while i < haystack.len() {
        if haystack[i..].starts_with(from) {
            out.extend_from_slice(to);
            i += from.len();
        } else {
            out.push(haystack[i]);
            i += 1;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::Document;

    fn minimal_pdf_bytes() -> Vec<u8> {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let content = Stream::new(
            dictionary! {},
            b"q\n1 0 0 1 0 0 cm\n0 0 0 rg\n0 0 10 10 re\nf\n/Im1 Do\nQ\n".to_vec(),
        );
        let content_id = doc.add_object(content);
        let image_dict = dictionary! {
            "Type" => "XObject",
            "Subtype" => "Image",
            "Width" => 10,
            "Height" => 10,
            "ColorSpace" => "DeviceRGB",
            "BitsPerComponent" => 8,
        };
        let image_id = doc.add_object(Stream::new(image_dict, vec![0u8; 300]));
        let resources_id = doc.add_object(Object::Dictionary(dictionary! {
            "XObject" => Object::Dictionary(dictionary! { "Im1" => Object::Reference(image_id) }),
        }));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => Object::Reference(pages_id),
            "Contents" => Object::Reference(content_id),
            "Resources" => Object::Reference(resources_id),
            "MediaBox" => vec![0.into(), 0.into(), 100.into(), 100.into()],
        });
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => vec![Object::Reference(page_id)],
                "Count" => 1,
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => Object::Reference(pages_id),
        });
        doc.trailer.set("Root", Object::Reference(catalog_id));
        let mut bytes = Vec::new();
        doc.save_to(&mut bytes).expect("save test pdf");
        bytes
    }

    #[test]
    fn overlay_has_zero_images_and_neutralises_fill() {
        let accessor = PdfAccessor::from_bytes(minimal_pdf_bytes()).expect("open");
        let overlay = build_overlay(&accessor).expect("overlay");
        let images = overlay.images_on_page(0).expect("images");
        assert!(images.is_empty(), "overlay page should have zero images, got {}", images.len());

        let page_content = overlay
            .doc()
            .get_page_content(overlay.doc().get_pages()[&1])
            .expect("content");
        assert!(!page_content.windows(3).any(|w| w == b"\nf\n"));
    }
}
