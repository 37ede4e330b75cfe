//! Plain-text configuration: one option per line, whitespace-separated.
//!
//! No serde here on purpose — the file format (§6) is not self-describing,
//! so a line-oriented hand parser (in the spirit of [`parse_page_range`]
//! below) is a better fit than forcing a serde `Deserialize` onto it.

use std::env;
use std::path::{Path, PathBuf};

use tracing::{trace, warn};

/// A merged, validated view of the configuration file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub processes: usize,
    pub only_extract: bool,
    pub render_image: bool,
    pub no_crop: bool,
    pub original_only: bool,
    pub extract_jpeg: bool,
    pub prefer_mono: bool,
    pub save_jxl: bool,
    pub save_png: bool,
    /// libtiff compression name, e.g. `tiff_lzw`. Absent unless `save-tiff`
    /// was set; restored from `original_source/pdf2img.py`'s defaults dict,
    /// which spec.md's distillation dropped (see SPEC_FULL §6).
    pub save_tiff: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            processes: 2,
            only_extract: false,
            render_image: false,
            no_crop: false,
            original_only: false,
            extract_jpeg: false,
            prefer_mono: false,
            save_jxl: false,
            save_png: false,
            save_tiff: None,
        }
    }
}

/// Output format selected once the config is known.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Jxl,
    Png,
    Tiff,
    Webp,
}

impl Config {
    /// Which encoder C8 should use, in the original's priority order
    /// (jxl > png > tiff > webp, webp being the lossless default).
    pub fn output_format(&self) -> OutputFormat {
        if self.save_jxl {
            OutputFormat::Jxl
        } else if self.save_png {
            OutputFormat::Png
        } else if self.save_tiff.is_some() {
            OutputFormat::Tiff
        } else {
            OutputFormat::Webp
        }
    }

    /// Resolve the config file path: `PDF2IMG_CONFIG` env var if set, else
    /// a file named `pdf2img.conf` next to the running executable.
    pub fn resolve_path() -> Option<PathBuf> {
        if let Ok(p) = env::var("PDF2IMG_CONFIG") {
            return Some(PathBuf::from(p));
        }
        env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(|dir| dir.join("pdf2img.conf")))
    }

    /// Load from the resolved path, falling back to defaults with a warning
    /// when the file is missing (ConfigMissing policy: "log warning, use
    /// defaults").
    pub fn load() -> Self {
        match Self::resolve_path() {
            Some(path) if path.exists() => match std::fs::read_to_string(&path) {
                Ok(text) => Self::parse(&text),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "config file unreadable, using defaults");
                    Self::default()
                }
            },
            Some(path) => {
                warn!(path = %path.display(), "config file not found, using defaults");
                Self::default()
            }
            None => {
                warn!("could not resolve a config file path, using defaults");
                Self::default()
            }
        }
    }

    /// Parse config text directly (used by `load` and by tests).
    ///
    /// Unknown lines are ignored. Malformed option values (e.g. a
    /// non-numeric `processes`) are logged at trace level and the default
    /// is kept for that field, per the ConfigParse policy.
    pub fn parse(text: &str) -> Self {
        let mut config = Self::default();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut parts = line.split_whitespace();
            let Some(key) = parts.next() else { continue };
            match key {
                "processes" => match parts.next().and_then(|v| v.parse::<usize>().ok()) {
                    Some(n) => config.processes = n,
                    None => trace!(line, "malformed processes option, keeping default"),
                },
                "only-extract" => config.only_extract = true,
                "render-image" => config.render_image = true,
                "no-crop" => config.no_crop = true,
                "original-only" => config.original_only = true,
                "extract-jpeg" => config.extract_jpeg = true,
                "prefer-mono" => config.prefer_mono = true,
                "save-jxl" => config.save_jxl = true,
                "save-png" => config.save_png = true,
                "save-tiff" => config.save_tiff = Some(
                    parts.next().unwrap_or("tiff_lzw").to_string(),
                ),
                _ => trace!(line, "unrecognised config option, ignoring"),
            }
        }
        config
    }

    /// Output directory for an input file: `PDF2IMG_OUTPUT`-relative if the
    /// env var is set, else `<file>-img` next to the input.
    pub fn output_dir_for(input: &Path) -> PathBuf {
        let base_name = format!(
            "{}-img",
            input.file_name().map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| input.to_string_lossy().into_owned())
        );
        match env::var("PDF2IMG_OUTPUT") {
            Ok(parent) => PathBuf::from(parent).join(base_name),
            Err(_) => input
                .parent()
                .map(|dir| dir.join(&base_name))
                .unwrap_or_else(|| PathBuf::from(&base_name)),
        }
    }
}
