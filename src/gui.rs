//! Zero-argument launch surface.
//!
//! The original opens a Tkinter file picker when invoked with no
//! arguments. A GUI toolkit is out of scope here (see DESIGN.md Open
//! Question #4); this keeps the documented entry point named and callable
//! rather than silently folding it into the CLI's "no input" error path.

use tracing::error;

/// Always fails — there is no GUI in this build. Exists so `main.rs` has a
/// single, testable thing to call for the zero-argument case instead of
/// inlining an ad hoc error there.
pub fn launch() -> ! {
    error!("no input files given and this build has no GUI; pass one or more PDF paths");
    std::process::exit(1);
}
