use std::env;
use std::process::ExitCode;

use pdf2img::config::Config;
use pdf2img::error::Result;
use pdf2img::{gui, pipeline, scheduler};
use tracing::error;

fn main() -> ExitCode {
    tracing_subscriber::fmt::init();

    let args: Vec<String> = env::args().skip(1).collect();
    if args.is_empty() {
        gui::launch();
    }

    let config = Config::load();
    let cancelled = scheduler::install_cancellation_flag();

    // Exit code reflects whether any file could not be processed at all, not
    // whether individual pages within a file failed (§6): those are reported
    // to stderr and the run still exits 0.
    let mut any_fatal = false;
    for path in &args {
        match convert_one_file(&config, path, &cancelled) {
            Ok(failed_pages) if failed_pages.is_empty() => {}
            Ok(failed_pages) => {
                error!(file = %path, pages = ?failed_pages, "some pages failed to convert");
            }
            Err(e) => {
                any_fatal = true;
                error!(file = %path, error = %e, "failed to convert file");
            }
        }
    }

    if any_fatal { ExitCode::FAILURE } else { ExitCode::SUCCESS }
}

fn convert_one_file(
    config: &Config,
    path: &str,
    cancelled: &std::sync::Arc<std::sync::atomic::AtomicBool>,
) -> Result<Vec<u32>> {
    pipeline::convert_file(config, std::path::Path::new(path), cancelled)
}
