use thiserror::Error;

/// Error taxonomy. Variants without a direct counterpart in the documented
/// Kind column (Pdf, Image, Io, ContentStream, ClipRaster, Encode) carry the
/// structural failures every module needs a place to put.
#[derive(Debug, Error)]
pub enum Pdf2ImgError {
    #[error("config file not found: {0}")]
    ConfigMissing(String),

    #[error("malformed config option: {0}")]
    ConfigParse(String),

    #[error("failed to open PDF: {0}")]
    OpenFailed(String),

    #[error("page {page} failed to convert: {reason}")]
    PageConvertFailed { page: u32, reason: String },

    #[error("worker crashed while processing page {page}: {reason}")]
    WorkerCrashed { page: u32, reason: String },

    #[error("unknown colour space for image xref {xref}")]
    UnknownColorSpace { xref: u32 },

    #[error("geometry warning: {0}")]
    GeometryWarning(String),

    #[error("image dimension exceeds WebP's 16383px limit, falling back to PNG")]
    OversizeForWebP,

    #[error("content stream error: {0}")]
    ContentStream(String),

    #[error("clip rasterisation error: {0}")]
    ClipRaster(String),

    #[error("encode error: {0}")]
    Encode(String),

    #[error("lopdf error: {0}")]
    Pdf(#[from] lopdf::Error),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Generates factory methods for [`Pdf2ImgError`] variants that wrap a `String`.
macro_rules! error_constructors {
    ($(
        $(#[doc = $doc:expr])*
        $method:ident => $variant:ident
    ),* $(,)?) => {
        impl Pdf2ImgError {
            $(
                $(#[doc = $doc])*
                pub fn $method(msg: impl Into<String>) -> Self {
                    Self::$variant(msg.into())
                }
            )*
        }
    };
}

error_constructors! {
    /// Create a ConfigMissing error.
    config_missing => ConfigMissing,
    /// Create a ConfigParse error.
    config_parse => ConfigParse,
    /// Create an OpenFailed error.
    open_failed => OpenFailed,
    /// Create a GeometryWarning error.
    geometry_warning => GeometryWarning,
    /// Create a ContentStream error.
    content_stream => ContentStream,
    /// Create a ClipRaster error.
    clip_raster => ClipRaster,
    /// Create an Encode error.
    encode => Encode,
}

pub type Result<T> = std::result::Result<T, Pdf2ImgError>;
