//! PDF Accessor (C1): a thin façade over `lopdf` (object graph, streams,
//! content-stream mutation, serialisation) and `pdfium-render` (page
//! rasterisation), matching the library contract in SPEC_FULL §6.

use std::path::Path;

use lopdf::{Dictionary, Document, Object, ObjectId};
use pdfium_render::prelude::*;

use crate::error::{Pdf2ImgError, Result};

/// One image XObject placement as enumerated from a page's resources.
#[derive(Debug, Clone)]
pub struct ImageRef {
    pub xref: u32,
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub bits_per_component: u8,
    pub color_space: String,
    pub filter: Option<String>,
    pub image_mask: bool,
    /// Content-stream bytes of whatever invokes this image's `Do` — the
    /// page's own stream, or a Form XObject's, per §3's Image Reference.
    pub referencer_content: Vec<u8>,
    /// Object id of that same referencer stream, so C2 can rewrite it.
    pub referencer_id: ObjectId,
    /// Object id of the page (for page-level images) or Form XObject (for
    /// images nested inside one) whose `Resources -> XObject` dictionary
    /// binds `name` to this image — the id C2 deletes the binding from.
    pub resources_holder: ObjectId,
}

/// Wraps an open `lopdf::Document` together with the raw bytes it was
/// parsed from, so a fresh `pdfium-render` document can be loaded from the
/// same bytes without a round trip through disk.
pub struct PdfAccessor {
    doc: Document,
    bytes: Vec<u8>,
}

impl PdfAccessor {
    pub fn open(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)
            .map_err(|e| Pdf2ImgError::open_failed(format!("{}: {e}", path.display())))?;
        Self::from_bytes(bytes)
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        let doc = Document::load_mem(&bytes)
            .map_err(|e| Pdf2ImgError::open_failed(e.to_string()))?;
        Ok(Self { doc, bytes })
    }

    pub fn doc(&self) -> &Document {
        &self.doc
    }

    pub fn doc_mut(&mut self) -> &mut Document {
        &mut self.doc
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Re-derive `bytes` from the current (possibly mutated) `doc` — the
    /// serialise-and-reopen step C2 needs after stripping images.
    pub fn resync_bytes(&mut self) -> Result<()> {
        let mut buf = Vec::new();
        self.doc.save_to(&mut buf)?;
        self.bytes = buf;
        Ok(())
    }

    pub fn page_count(&self) -> u32 {
        self.doc.get_pages().len() as u32
    }

    pub(crate) fn page_id(&self, page_index: u32) -> Result<ObjectId> {
        // lopdf's page map is 1-indexed; the rest of this crate is 0-indexed.
        self.doc
            .get_pages()
            .get(&(page_index + 1))
            .copied()
            .ok_or_else(|| Pdf2ImgError::open_failed(format!("page {page_index} not found")))
    }

    /// `Page.rect`: `(x0, y0, x1, y1)` in page units, from `/MediaBox`
    /// (inherited from an ancestor Pages node if the page itself has none).
    pub fn page_rect(&self, page_index: u32) -> Result<(f64, f64, f64, f64)> {
        let page_id = self.page_id(page_index)?;
        let media_box = self.inherited_rect(page_id, b"MediaBox").ok_or_else(|| {
            Pdf2ImgError::open_failed(format!("page {page_index} has no MediaBox"))
        })?;
        Ok(media_box)
    }

    fn inherited_rect(&self, mut object_id: ObjectId, key: &[u8]) -> Option<(f64, f64, f64, f64)> {
        loop {
            let dict = self.doc.get_dictionary(object_id).ok()?;
            if let Ok(Object::Array(arr)) = dict.get(key) {
                if arr.len() == 4 {
                    let nums: Vec<f64> = arr.iter().filter_map(object_to_f64).collect();
                    if nums.len() == 4 {
                        return Some((nums[0], nums[1], nums[2], nums[3]));
                    }
                }
            }
            object_id = dict.get(b"Parent").ok()?.as_reference().ok()?;
        }
    }

    /// `Page.get_images(full=true)`: every image XObject reachable from the
    /// page's resources (including Form XObject resources one level deep),
    /// paired with the content-stream bytes of whatever invokes it.
    pub fn images_on_page(&self, page_index: u32) -> Result<Vec<ImageRef>> {
        let page_id = self.page_id(page_index)?;
        let content_id = self.page_content_id(page_id)?;
        let page_content = self.page_content(page_id)?;

        let (page_resources, form_streams) = self.page_resource_dicts(page_id)?;

        let mut refs = Vec::new();
        for dict in &page_resources {
            self.collect_images_from(dict, &page_content, content_id, page_id, &mut refs)?;
        }
        for (form_id, form_dict, form_content) in &form_streams {
            if let Ok((form_resources, _)) = self.xobject_resource_dicts(form_dict) {
                for dict in &form_resources {
                    self.collect_images_from(dict, form_content, *form_id, *form_id, &mut refs)?;
                }
            }
        }
        Ok(refs)
    }

    /// The object id of the page's first content stream — `get_contents()[0]`
    /// in the original, used as the direct-reference fallback in
    /// `get_referencer_of_image`.
    pub fn page_content_id(&self, page_id: ObjectId) -> Result<ObjectId> {
        let dict = self.doc.get_dictionary(page_id)?;
        match dict.get(b"Contents")? {
            Object::Reference(id) => Ok(*id),
            Object::Array(arr) => arr
                .first()
                .and_then(|o| o.as_reference().ok())
                .ok_or_else(|| Pdf2ImgError::open_failed("empty Contents array")),
            _ => Err(Pdf2ImgError::open_failed("unexpected Contents value")),
        }
    }

    fn collect_images_from(
        &self,
        resources: &Dictionary,
        referencer_content: &[u8],
        referencer_id: ObjectId,
        resources_holder: ObjectId,
        out: &mut Vec<ImageRef>,
    ) -> Result<()> {
        let Ok(xobjects) = self.dict_or_ref(resources, b"XObject") else {
            return Ok(());
        };
        for (name_bytes, value) in xobjects.iter() {
            let Ok(stream_id) = value.as_reference() else { continue };
            let Ok(object) = self.doc.get_object(stream_id) else { continue };
            let Object::Stream(stream) = object else { continue };
            let is_image = matches!(
                stream.dict.get(b"Subtype").and_then(Object::as_name),
                Ok(b"Image")
            );
            if !is_image {
                continue;
            }
            let name = String::from_utf8_lossy(name_bytes).into_owned();
            let width = dict_get_u32(&stream.dict, b"Width")?;
            let height = dict_get_u32(&stream.dict, b"Height")?;
            let bits_per_component = match stream.dict.get(b"BitsPerComponent") {
                Ok(_) => dict_get_u32(&stream.dict, b"BitsPerComponent")? as u8,
                Err(_) => 8,
            };
            let color_space = color_space_name(&stream.dict);
            let filter = filter_name(&stream.dict);
            let image_mask = matches!(stream.dict.get(b"ImageMask"), Ok(Object::Boolean(true)));
            out.push(ImageRef {
                xref: stream_id.0,
                name,
                width,
                height,
                bits_per_component,
                color_space,
                filter,
                image_mask,
                referencer_content: referencer_content.to_vec(),
                referencer_id,
                resources_holder,
            });
        }
        Ok(())
    }

    fn dict_or_ref<'a>(&'a self, dict: &'a Dictionary, key: &[u8]) -> Result<&'a Dictionary> {
        match dict.get(key)? {
            Object::Dictionary(d) => Ok(d),
            Object::Reference(id) => Ok(self.doc.get_dictionary(*id)?),
            _ => Err(Pdf2ImgError::open_failed(format!(
                "expected dictionary for {}",
                String::from_utf8_lossy(key)
            ))),
        }
    }

    /// Resources dictionaries reachable from a page: its own (inherited if
    /// necessary), plus the dictionaries of any Form XObjects it references
    /// (so images nested one level inside a Form XObject are still found).
    fn page_resource_dicts(
        &self,
        page_id: ObjectId,
    ) -> Result<(Vec<Dictionary>, Vec<(ObjectId, Dictionary, Vec<u8>)>)> {
        let resources = self.inherited_resources(page_id)?;
        let forms = self.form_xobjects(&resources)?;
        Ok((vec![resources], forms))
    }

    fn xobject_resource_dicts(&self, form_dict: &Dictionary) -> Result<(Vec<Dictionary>, ())> {
        let resources = self.dict_or_ref(form_dict, b"Resources")?.clone();
        Ok((vec![resources], ()))
    }

    fn inherited_resources(&self, mut object_id: ObjectId) -> Result<Dictionary> {
        loop {
            let dict = self.doc.get_dictionary(object_id)?;
            if let Ok(resources) = self.dict_or_ref(dict, b"Resources") {
                return Ok(resources.clone());
            }
            object_id = dict
                .get(b"Parent")
                .ok()
                .and_then(|o| o.as_reference().ok())
                .ok_or_else(|| Pdf2ImgError::open_failed("no Resources found on page chain"))?;
        }
    }

    /// Form XObjects referenced from `resources`, paired with their own
    /// decoded content-stream bytes (the Form's content stream is itself
    /// the referencer for anything it invokes via `Do`).
    fn form_xobjects(&self, resources: &Dictionary) -> Result<Vec<(ObjectId, Dictionary, Vec<u8>)>> {
        let mut forms = Vec::new();
        let Ok(xobjects) = self.dict_or_ref(resources, b"XObject") else {
            return Ok(forms);
        };
        for (_, value) in xobjects.iter() {
            let Ok(stream_id) = value.as_reference() else { continue };
            let Ok(Object::Stream(stream)) = self.doc.get_object(stream_id) else { continue };
            let is_form = matches!(
                stream.dict.get(b"Subtype").and_then(Object::as_name),
                Ok(b"Form")
            );
            if is_form {
                let content = decode_stream_content(stream);
                forms.push((stream_id, stream.dict.clone(), content));
            }
        }
        Ok(forms)
    }

    fn page_content(&self, page_id: ObjectId) -> Result<Vec<u8>> {
        Ok(self.doc.get_page_content(page_id)?)
    }

    /// Raw, still-filtered bytes of a stream by xref number — e.g. a
    /// DCTDecode (JPEG) stream passed straight through to the encoder.
    pub fn stream_raw(&self, xref: u32) -> Result<Vec<u8>> {
        let id = (xref, 0);
        match self.doc.get_object(id)? {
            Object::Stream(s) => Ok(s.content.clone()),
            _ => Err(Pdf2ImgError::open_failed(format!("object {xref} is not a stream"))),
        }
    }

    /// Decoded (FlateDecode-resolved) bytes of a stream by xref number,
    /// for the raw-sample interpreters that need actual pixel bytes rather
    /// than whatever the stream's `/Filter` left on the wire.
    pub fn stream_decoded(&self, xref: u32) -> Result<Vec<u8>> {
        let id = (xref, 0);
        match self.doc.get_object(id)? {
            Object::Stream(s) => Ok(decode_stream_content(s)),
            _ => Err(Pdf2ImgError::open_failed(format!("object {xref} is not a stream"))),
        }
    }

    pub fn stream_dict(&self, xref: u32) -> Result<&Dictionary> {
        let id = (xref, 0);
        match self.doc.get_object(id)? {
            Object::Stream(s) => Ok(&s.dict),
            _ => Err(Pdf2ImgError::open_failed(format!("object {xref} is not a stream"))),
        }
    }

    /// `page.delete_image(xref)`, the resource-graph way: remove `name`'s
    /// binding from the `/XObject` dictionary reachable from `holder_id`
    /// (a page, walking up to whichever ancestor actually owns `/Resources`,
    /// or a Form XObject, which owns its own directly). The `Do` call that
    /// used to invoke it becomes a no-op reference to nothing.
    pub fn remove_xobject_entry(&mut self, holder_id: ObjectId, name: &str) -> Result<()> {
        let resources_owner = self.resources_owner(holder_id)?;
        let resources_id = self.follow_to_addressable_dict(resources_owner, b"Resources")?;
        let xobject_id = self.follow_to_addressable_dict(resources_id, b"XObject")?;
        if let Ok(Object::Dictionary(dict)) = self.doc.get_object_mut(xobject_id) {
            dict.remove(name.as_bytes());
        }
        Ok(())
    }

    /// Walk `Parent` links starting at `object_id` until reaching the node
    /// whose own dictionary carries a `/Resources` entry (inherited lookup,
    /// same chain `inherited_rect`/`inherited_resources` walk).
    fn resources_owner(&self, mut object_id: ObjectId) -> Result<ObjectId> {
        loop {
            let dict = self.doc.get_dictionary(object_id)?;
            if dict.get(b"Resources").is_ok() {
                return Ok(object_id);
            }
            object_id = dict
                .get(b"Parent")
                .ok()
                .and_then(|o| o.as_reference().ok())
                .ok_or_else(|| Pdf2ImgError::open_failed("no Resources found on page chain"))?;
        }
    }

    /// Resolve `holder_id`'s dictionary value at `key` to an addressable
    /// object id, mutably. If the value is already an indirect reference,
    /// that id is returned as-is; if it's an inline dictionary (no id of
    /// its own to mutate through), it's promoted to its own indirect object
    /// first, with `holder_id`'s entry rewritten to reference it.
    fn follow_to_addressable_dict(&mut self, holder_id: ObjectId, key: &[u8]) -> Result<ObjectId> {
        let existing_ref = match self.doc.get_dictionary(holder_id)?.get(key) {
            Ok(Object::Reference(id)) => Some(*id),
            Ok(Object::Dictionary(_)) => None,
            _ => {
                return Err(Pdf2ImgError::open_failed(format!(
                    "expected dictionary for {}",
                    String::from_utf8_lossy(key)
                )));
            }
        };
        if let Some(id) = existing_ref {
            return Ok(id);
        }

        let inline = match self.doc.get_object_mut(holder_id)? {
            Object::Dictionary(dict) => dict.get(key)?.clone(),
            _ => return Err(Pdf2ImgError::open_failed("resources holder is not a dictionary")),
        };
        let new_id = self.doc.add_object(inline);
        if let Object::Dictionary(dict) = self.doc.get_object_mut(holder_id)? {
            dict.set(key, Object::Reference(new_id));
        }
        Ok(new_id)
    }
}

fn decode_stream_content(stream: &lopdf::Stream) -> Vec<u8> {
    match stream.dict.get(b"Filter") {
        Ok(Object::Name(name)) if name == b"FlateDecode" => {
            use std::io::Read;
            let mut out = Vec::new();
            if flate2::read::ZlibDecoder::new(stream.content.as_slice())
                .read_to_end(&mut out)
                .is_ok()
            {
                out
            } else {
                stream.content.clone()
            }
        }
        _ => stream.content.clone(),
    }
}

fn object_to_f64(obj: &Object) -> Option<f64> {
    match obj {
        Object::Integer(i) => Some(*i as f64),
        Object::Real(r) => Some(*r as f64),
        _ => None,
    }
}

fn dict_get_u32(dict: &Dictionary, key: &[u8]) -> Result<u32> {
    match dict.get(key) {
        Ok(Object::Integer(i)) if *i >= 0 => Ok(*i as u32),
        Ok(Object::Real(f)) if *f >= 0.0 => Ok(*f as u32),
        Ok(other) => Err(Pdf2ImgError::open_failed(format!(
            "expected non-negative integer for {}, got {other:?}",
            String::from_utf8_lossy(key)
        ))),
        Err(_) => Err(Pdf2ImgError::open_failed(format!(
            "missing required key {}",
            String::from_utf8_lossy(key)
        ))),
    }
}

fn color_space_name(dict: &Dictionary) -> String {
    match dict.get(b"ColorSpace") {
        Ok(Object::Name(name)) => String::from_utf8_lossy(name).into_owned(),
        Ok(Object::Reference(_)) => "Indirect".to_string(),
        _ => "DeviceRGB".to_string(),
    }
}

fn filter_name(dict: &Dictionary) -> Option<String> {
    match dict.get(b"Filter") {
        Ok(Object::Name(name)) => Some(String::from_utf8_lossy(name).into_owned()),
        Ok(Object::Array(arr)) => arr.first().and_then(|o| {
            if let Object::Name(name) = o {
                Some(String::from_utf8_lossy(name).into_owned())
            } else {
                None
            }
        }),
        _ => None,
    }
}

/// `Page.get_pixmap`: rasterise one page of `bytes` at `zoom` pixels per
/// page unit. `grayscale` selects the 600 DPI pure-text fallback's colour
/// mode; otherwise the page is rendered RGBA so the compositor can apply
/// its own alpha-snap logic.
pub fn rasterize_page(
    pdfium: &Pdfium,
    bytes: &[u8],
    page_index: u32,
    zoom: f64,
    grayscale: bool,
) -> Result<image::DynamicImage> {
    let document = pdfium
        .load_pdf_from_byte_slice(bytes, None)
        .map_err(|e| Pdf2ImgError::open_failed(e.to_string()))?;
    let page = document
        .pages()
        .get(page_index as u16)
        .map_err(|e| Pdf2ImgError::open_failed(e.to_string()))?;

    let width_px = (page.width().value as f64 * zoom).ceil() as i32;
    let height_px = (page.height().value as f64 * zoom).ceil() as i32;

    let config = PdfRenderConfig::new()
        .set_target_width(width_px)
        .set_target_height(Some(height_px))
        .render_annotations(true);

    let bitmap = page
        .render_with_config(&config)
        .map_err(|e| Pdf2ImgError::open_failed(e.to_string()))?;

    let image = bitmap.as_image();
    Ok(if grayscale { image::DynamicImage::ImageLuma8(image.to_luma8()) } else { image })
}

/// Binds to the system `pdfium` library. Expensive — call once per worker
/// thread and cache the result (see `scheduler.rs`).
pub fn bind_pdfium() -> Result<Pdfium> {
    let bindings = Pdfium::bind_to_system_library()
        .map_err(|e| Pdf2ImgError::open_failed(format!("pdfium: {e}")))?;
    Ok(Pdfium::new(bindings))
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::{Stream, dictionary};

    fn minimal_pdf_bytes() -> Vec<u8> {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let content = Stream::new(dictionary! {}, b"q 1 0 0 1 0 0 cm /Im1 Do Q".to_vec());
        let content_id = doc.add_object(content);
        let image_dict = dictionary! {
            "Type" => "XObject",
            "Subtype" => "Image",
            "Width" => 10,
            "Height" => 10,
            "ColorSpace" => "DeviceRGB",
            "BitsPerComponent" => 8,
        };
        let image_stream = Stream::new(image_dict, vec![0u8; 300]);
        let image_id = doc.add_object(image_stream);
        let resources_id = doc.add_object(Object::Dictionary(dictionary! {
            "XObject" => Object::Dictionary(dictionary! { "Im1" => Object::Reference(image_id) }),
        }));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => Object::Reference(pages_id),
            "Contents" => Object::Reference(content_id),
            "Resources" => Object::Reference(resources_id),
            "MediaBox" => vec![0.into(), 0.into(), 200.into(), 300.into()],
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
    fn enumerates_single_image_with_referencer_bytes() {
        let accessor = PdfAccessor::from_bytes(minimal_pdf_bytes()).expect("open");
        assert_eq!(accessor.page_count(), 1);
        let rect = accessor.page_rect(0).expect("rect");
        assert_eq!(rect, (0.0, 0.0, 200.0, 300.0));

        let images = accessor.images_on_page(0).expect("images");
        assert_eq!(images.len(), 1);
        assert_eq!(images[0].name, "Im1");
        assert_eq!((images[0].width, images[0].height), (10, 10));
        assert!(images[0].referencer_content.windows(8).any(|w| w == b"/Im1 Do"));
    }
}
