use std::process::Command;

fn cargo_bin() -> Command {
    Command::new(env!("CARGO_BIN_EXE_pdf2img"))
}

#[test]
fn no_args_exits_nonzero_without_panicking() {
    let output = cargo_bin().output().expect("failed to execute binary");
    assert!(!output.status.success(), "should exit with failure when no input files given");
}

#[test]
fn nonexistent_input_file_reports_error_and_exits_nonzero() {
    let unique_path = std::env::temp_dir().join(format!(
        "pdf2img_nonexistent_{}.pdf",
        std::process::id()
    ));
    let output = cargo_bin()
        .arg(&unique_path)
        .output()
        .expect("failed to execute binary");

    assert!(!output.status.success(), "should fail on a missing input file");
}
