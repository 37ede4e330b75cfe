use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use lopdf::{Dictionary, Document, Object, Stream, dictionary};
use pdf2img::config::Config;
use pdf2img::pipeline;

fn minimal_pdf_bytes() -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let content = Stream::new(dictionary! {}, b"0 0 1 1 re f".to_vec());
    let content_id = doc.add_object(Object::Stream(content));

    let pages_id = doc.new_object_id();
    let page_id = doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "Contents" => content_id,
        "MediaBox" => vec![0.into(), 0.into(), 200.into(), 200.into()],
        "Resources" => Dictionary::new(),
    });

    let pages = dictionary! {
        "Type" => "Pages",
        "Kids" => vec![page_id.into()],
        "Count" => 1,
    };
    doc.objects.insert(pages_id, Object::Dictionary(pages));

    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes).expect("save minimal pdf");
    bytes
}

#[test]
fn convert_file_writes_output_dir_with_one_page() {
    let dir = tempfile::tempdir().expect("tempdir");
    let input_path = dir.path().join("doc.pdf");
    std::fs::write(&input_path, minimal_pdf_bytes()).expect("write input pdf");

    let config = Config::default();
    let cancelled = Arc::new(AtomicBool::new(false));

    let failed = pipeline::convert_file(&config, &input_path, &cancelled).expect("convert_file");
    assert!(failed.is_empty(), "expected no failed pages, got {failed:?}");

    let output_dir = Config::output_dir_for(&input_path);
    assert!(output_dir.is_dir(), "output dir should have been created");
    let entries: Vec<_> = std::fs::read_dir(&output_dir).expect("read output dir").collect();
    assert!(!entries.is_empty(), "output dir should contain at least one file");
}

#[test]
fn convert_file_on_missing_input_is_an_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    let missing = dir.path().join("nope.pdf");
    let config = Config::default();
    let cancelled = Arc::new(AtomicBool::new(false));

    let result = pipeline::convert_file(&config, &missing, &cancelled);
    assert!(result.is_err());
}
