//! Page rendering for uploaded files.
//!
//! Turns a source file into the ordered list of [`PageContent`]s handed to
//! the orchestrator: raster uploads pass through as a single page image, PDFs
//! contribute the first [`MAX_PDF_PAGES`] pages. A scanned PDF page yields
//! its largest embedded raster; a page without rasters falls back to its text
//! layer, so digitally generated PDFs extract without a vision call.

use std::ffi::OsStr;
use std::io::Read;
use std::path::{Path, PathBuf};

use flate2::read::ZlibDecoder;
use lopdf::Document;
use thiserror::Error;

use super::{PageContent, PageImage};

/// File extensions accepted by the pipeline.
pub const SUPPORTED_EXTENSIONS: &[&str] = &["pdf", "jpg", "jpeg", "png"];

/// PDF page budget per run.
const MAX_PDF_PAGES: usize = 2;

/// Failures while turning a source file into page content.
#[derive(Debug, Error)]
pub enum RenderError {
    /// Source file is missing at run start.
    #[error("file not found: {0}")]
    FileNotFound(PathBuf),
    /// Extension outside [`SUPPORTED_EXTENSIONS`].
    #[error("unsupported file type: {0}")]
    UnsupportedFileType(String),
    /// The file yielded zero renderable pages.
    #[error("no renderable page content in {0}")]
    NoContent(PathBuf),
    /// Reading the source file failed.
    #[error("failed to read {path}: {source}")]
    Io {
        /// File being read.
        path: PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },
    /// The PDF could not be parsed.
    #[error("failed to parse PDF {path}: {source}")]
    Pdf {
        /// File being parsed.
        path: PathBuf,
        /// Underlying parser failure.
        #[source]
        source: lopdf::Error,
    },
    /// Rendering task failed to complete.
    #[error("page rendering failed: {0}")]
    Failed(String),
}

/// Whether `path` carries a supported extension.
pub fn is_supported(path: &Path) -> bool {
    SUPPORTED_EXTENSIONS.contains(&extension_of(path).as_str())
}

/// Render `path` into ordered page content. Blocking; see
/// [`page_contents_async`].
pub fn page_contents(path: &Path) -> Result<Vec<PageContent>, RenderError> {
    if !path.exists() {
        return Err(RenderError::FileNotFound(path.to_path_buf()));
    }

    match extension_of(path).as_str() {
        "pdf" => pdf_page_contents(path),
        "jpg" | "jpeg" => single_image(path, "image/jpeg"),
        "png" => single_image(path, "image/png"),
        other => Err(RenderError::UnsupportedFileType(format!(".{other}"))),
    }
}

/// Run [`page_contents`] on the blocking pool; PDF decoding is CPU-bound.
pub async fn page_contents_async(path: PathBuf) -> Result<Vec<PageContent>, RenderError> {
    tokio::task::spawn_blocking(move || page_contents(&path))
        .await
        .map_err(|err| RenderError::Failed(format!("render task join error: {err}")))?
}

fn extension_of(path: &Path) -> String {
    path.extension()
        .and_then(OsStr::to_str)
        .map(str::to_ascii_lowercase)
        .unwrap_or_default()
}

fn single_image(path: &Path, mime_type: &'static str) -> Result<Vec<PageContent>, RenderError> {
    let data = std::fs::read(path).map_err(|source| RenderError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    if data.is_empty() {
        return Err(RenderError::NoContent(path.to_path_buf()));
    }
    Ok(vec![PageContent::Image(PageImage {
        data,
        mime_type,
        page_number: 1,
    })])
}

fn pdf_page_contents(path: &Path) -> Result<Vec<PageContent>, RenderError> {
    let doc = Document::load(path).map_err(|source| RenderError::Pdf {
        path: path.to_path_buf(),
        source,
    })?;

    let mut pages = Vec::new();
    for (index, (page_no, page_id)) in doc.get_pages().iter().take(MAX_PDF_PAGES).enumerate() {
        let page_number = index + 1;
        if let Some((data, mime_type)) = page_raster(&doc, *page_id, page_number) {
            pages.push(PageContent::Image(PageImage {
                data,
                mime_type,
                page_number,
            }));
            continue;
        }

        // Digitally generated page: no raster, but usually a text layer.
        match doc.extract_text(&[*page_no]) {
            Ok(text) if !text.trim().is_empty() => pages.push(PageContent::Text {
                page_number,
                text: text.trim().to_string(),
            }),
            Ok(_) => tracing::debug!(page_number, "Page has neither rasters nor text"),
            Err(err) => {
                tracing::debug!(page_number, error = %err, "Text-layer extraction failed");
            }
        }
    }

    if pages.is_empty() {
        return Err(RenderError::NoContent(path.to_path_buf()));
    }
    Ok(pages)
}

/// The page's largest decodable embedded raster, if any.
fn page_raster(
    doc: &Document,
    page_id: lopdf::ObjectId,
    page_number: usize,
) -> Option<(Vec<u8>, &'static str)> {
    let page_images = match doc.get_page_images(page_id) {
        Ok(images) => images,
        Err(err) => {
            tracing::debug!(page_number, error = %err, "Failed to enumerate page images");
            return None;
        }
    };

    // A scanned page carries one dominant raster; take the largest.
    let best = page_images
        .iter()
        .max_by_key(|img| img.width.saturating_mul(img.height))?;
    match decode_pdf_image(best) {
        Some(decoded) => Some(decoded),
        None => {
            tracing::debug!(page_number, "No decodable raster on page");
            None
        }
    }
}

/// Decode an embedded PDF raster into encoded bytes plus MIME type.
fn decode_pdf_image(pdf_image: &lopdf::xobject::PdfImage<'_>) -> Option<(Vec<u8>, &'static str)> {
    let filters = pdf_image.filters.as_ref()?;

    if filters.iter().any(|f| f == "DCTDecode") {
        // Already JPEG; pass the stream through untouched.
        return Some((pdf_image.content.to_vec(), "image/jpeg"));
    }
    if filters.iter().any(|f| f == "FlateDecode") {
        return match reencode_flate_image(pdf_image) {
            Ok(data) => Some((data, "image/png")),
            Err(err) => {
                tracing::debug!(error = %err, "Failed to decode FlateDecode image");
                None
            }
        };
    }

    tracing::debug!(?filters, "Unsupported image filter");
    None
}

/// Decompress a `FlateDecode` raster and re-encode it as PNG.
fn reencode_flate_image(pdf_image: &lopdf::xobject::PdfImage<'_>) -> Result<Vec<u8>, String> {
    let mut decoder = ZlibDecoder::new(pdf_image.content);
    let mut raw = Vec::new();
    decoder
        .read_to_end(&mut raw)
        .map_err(|err| format!("decompression failed: {err}"))?;

    let width = u32::try_from(pdf_image.width).map_err(|_| "invalid width".to_string())?;
    let height = u32::try_from(pdf_image.height).map_err(|_| "invalid height".to_string())?;
    let color_space = pdf_image.color_space.as_deref().unwrap_or("DeviceRGB");

    let img = match color_space {
        "DeviceGray" | "Gray" | "CalGray" => {
            image::GrayImage::from_raw(width, height, raw).map(image::DynamicImage::ImageLuma8)
        }
        _ => image::RgbImage::from_raw(width, height, raw).map(image::DynamicImage::ImageRgb8),
    }
    .ok_or_else(|| format!("raw data does not match {width}x{height} {color_space}"))?;

    let mut png = Vec::new();
    img.write_to(&mut std::io::Cursor::new(&mut png), image::ImageFormat::Png)
        .map_err(|err| format!("PNG encoding failed: {err}"))?;
    Ok(png)
}
