//! Per-file driver (A2): `main()` / `convert_page_init`, ported.
//!
//! One call per input path: open the document, build the overlay once
//! (`stripper::build_overlay`, the original's one-time
//! `convert_page_init` work), then hand every page to the scheduler.
//! Failures are collected rather than raised — a broken page never aborts
//! the rest of the file (§7), matching teacher's `pipeline/orchestrator.rs`
//! per-file independence philosophy applied here at the per-page level.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use tracing::{info, warn};

use crate::accessor::PdfAccessor;
use crate::config::Config;
use crate::error::{Pdf2ImgError, Result};
use crate::scheduler;
use crate::stripper;

/// Convert every page of `input_path`, writing output into
/// `Config::output_dir_for`. Returns the 1-indexed page numbers that
/// failed, mirroring the original's `failed_page` list.
pub fn convert_file(config: &Config, input_path: &Path, cancelled: &Arc<AtomicBool>) -> Result<Vec<u32>> {
    let accessor = PdfAccessor::open(input_path)?;
    let page_count = accessor.page_count();
    if page_count == 0 {
        return Ok(Vec::new());
    }

    let output_dir = Config::output_dir_for(input_path);
    std::fs::create_dir_all(&output_dir)?;

    // run_pages' signature is shared between the only-extract and
    // composited paths, so the overlay is always built even though
    // only-extract never looks at it; its cost is one save_to + reopen.
    let overlay = stripper::build_overlay(&accessor)
        .map_err(|e| Pdf2ImgError::open_failed(format!("failed to build overlay document: {e}")))?;

    let page_indices: Vec<u32> = (0..page_count).collect();
    let outcomes = scheduler::run_pages(config, &accessor, &overlay, &page_indices, &output_dir, cancelled);

    let mut failed = Vec::new();
    for outcome in outcomes {
        match outcome.error {
            None => {}
            Some(e) => {
                warn!(page = outcome.page_index + 1, error = %e, "page failed to convert");
                failed.push(outcome.page_index + 1);
            }
        }
    }

    info!(
        file = %input_path.display(),
        pages = page_count,
        failed = failed.len(),
        "finished converting file"
    );
    Ok(failed)
}
