use std::process::Command;

use lopdf::{Dictionary, Document, Object, Stream, dictionary};

fn cargo_bin() -> Command {
    Command::new(env!("CARGO_BIN_EXE_pdf2img"))
}

fn two_page_pdf() -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();

    let mut page_ids = Vec::new();
    for _ in 0..2 {
        let content_id = doc.add_object(Stream::new(dictionary! {}, b"0 0 1 1 re f".to_vec()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
            "MediaBox" => vec![0.into(), 0.into(), 200.into(), 200.into()],
            "Resources" => Dictionary::new(),
        });
        page_ids.push(page_id);
    }

    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => page_ids.iter().map(|&id| id.into()).collect::<Vec<_>>(),
            "Count" => page_ids.len() as i64,
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
fn converts_every_page_of_a_multi_page_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let input_path = dir.path().join("doc.pdf");
    std::fs::write(&input_path, two_page_pdf()).expect("write input pdf");

    let output = cargo_bin()
        .arg(&input_path)
        .output()
        .expect("failed to execute binary");
    assert!(output.status.success(), "conversion should succeed: {:?}", output);

    let output_dir = dir.path().join("doc.pdf-img");
    assert!(output_dir.is_dir(), "expected output dir at {output_dir:?}");

    let mut names: Vec<_> = std::fs::read_dir(&output_dir)
        .expect("read output dir")
        .filter_map(|e| e.ok().map(|e| e.file_name().to_string_lossy().into_owned()))
        .collect();
    names.sort();
    assert!(names.iter().any(|n| n.starts_with("001")));
    assert!(names.iter().any(|n| n.starts_with("002")));
}

#[test]
fn multiple_input_files_are_each_converted_independently() {
    let dir = tempfile::tempdir().expect("tempdir");
    let first = dir.path().join("a.pdf");
    let second = dir.path().join("b.pdf");
    std::fs::write(&first, two_page_pdf()).expect("write a.pdf");
    std::fs::write(&second, two_page_pdf()).expect("write b.pdf");

    let output = cargo_bin()
        .arg(&first)
        .arg(&second)
        .output()
        .expect("failed to execute binary");
    assert!(output.status.success());

    assert!(dir.path().join("a.pdf-img").is_dir());
    assert!(dir.path().join("b.pdf-img").is_dir());
}
