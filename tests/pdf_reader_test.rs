use lopdf::{Document, Object, Stream, dictionary};
use pdf2img::accessor::PdfAccessor;

fn pdf_with_media_box(media_box: Vec<Object>) -> Vec<u8> {
    let mut doc = Document::with_version("1.7");
    let pages_id = doc.new_object_id();
    let contents_id = doc.add_object(Stream::new(dictionary! {}, vec![]));
    let page_id = doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "MediaBox" => media_box,
        "Contents" => contents_id,
        "Resources" => lopdf::Dictionary::new(),
    });
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => vec![page_id.into()],
            "Count" => 1,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes).expect("save");
    bytes
}

fn pdf_with_inherited_media_box(media_box: Vec<Object>) -> Vec<u8> {
    let mut doc = Document::with_version("1.7");
    let pages_id = doc.new_object_id();
    let contents_id = doc.add_object(Stream::new(dictionary! {}, vec![]));
    let page_id = doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "Contents" => contents_id,
        "Resources" => lopdf::Dictionary::new(),
    });
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => vec![page_id.into()],
            "Count" => 1,
            "MediaBox" => media_box,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes).expect("save");
    bytes
}

#[test]
fn page_rect_reads_own_media_box() {
    let media_box = vec![0.into(), 0.into(), Object::Real(595.276), Object::Real(841.89)];
    let bytes = pdf_with_media_box(media_box);
    let accessor = PdfAccessor::from_bytes(bytes).expect("open");
    let (x0, y0, x1, y1) = accessor.page_rect(0).expect("page_rect");
    assert_eq!((x0, y0), (0.0, 0.0));
    assert!((x1 - 595.276).abs() < 0.01);
    assert!((y1 - 841.89).abs() < 0.01);
}

#[test]
fn page_rect_reads_non_zero_origin() {
    let media_box = vec![10.into(), 20.into(), 605.into(), 812.into()];
    let bytes = pdf_with_media_box(media_box);
    let accessor = PdfAccessor::from_bytes(bytes).expect("open");
    let rect = accessor.page_rect(0).expect("page_rect");
    assert_eq!(rect, (10.0, 20.0, 605.0, 812.0));
}

#[test]
fn page_rect_inherits_from_parent_pages_node() {
    let media_box = vec![0.into(), 0.into(), 612.into(), 792.into()];
    let bytes = pdf_with_inherited_media_box(media_box);
    let accessor = PdfAccessor::from_bytes(bytes).expect("open");
    let rect = accessor.page_rect(0).expect("page_rect");
    assert_eq!(rect, (0.0, 0.0, 612.0, 792.0));
}

#[test]
fn page_rect_errors_when_media_box_missing_anywhere_in_chain() {
    let mut doc = Document::with_version("1.7");
    let pages_id = doc.new_object_id();
    let contents_id = doc.add_object(Stream::new(dictionary! {}, vec![]));
    let page_id = doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "Contents" => contents_id,
        "Resources" => lopdf::Dictionary::new(),
    });
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => vec![page_id.into()],
            "Count" => 1,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes).expect("save");

    let accessor = PdfAccessor::from_bytes(bytes).expect("open");
    let result = accessor.page_rect(0);
    assert!(result.is_err(), "should fail when no MediaBox is found anywhere in the chain");
}
