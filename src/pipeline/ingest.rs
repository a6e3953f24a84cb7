//! Ingestion: turn a [`Source`] into the run's first [`WorkingDocument`].
//!
//! Extension resolution order: explicit file name → URL path → declared
//! `Content-Type` → unknown. The MIME type is sniffed from content; the
//! extension only matters downstream when sniffing is inconclusive.
//! Exactly one temp file is written, named `in_<uuid>.<ext>`.

use super::{StageContext, WorkingDocument};
use crate::error::PrepError;
use crate::output::Stage;
use crate::tools::sniff::SNIFF_HEAD_LEN;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Where the document comes from.
#[derive(Clone)]
pub enum Source {
    /// Bytes uploaded by the caller, with the client-side file name if known.
    Upload {
        bytes: Vec<u8>,
        filename: Option<String>,
    },
    /// A remote HTTP(S) resource.
    Url(String),
    /// A local file.
    Path(PathBuf),
}

impl Source {
    /// Pick the source from an optional upload and an optional URL.
    /// An upload wins when both are present.
    pub fn from_parts(
        upload: Option<(Vec<u8>, Option<String>)>,
        url: Option<String>,
    ) -> Result<Self, PrepError> {
        match (upload, url) {
            (Some((bytes, filename)), _) => Ok(Source::Upload { bytes, filename }),
            (None, Some(url)) if !url.trim().is_empty() => Ok(Source::Url(url.trim().to_string())),
            _ => Err(PrepError::invalid_input("Send a file or a file_url")),
        }
    }

    /// Short human-readable label for logs and progress events.
    pub fn label(&self) -> String {
        match self {
            Source::Upload { filename, bytes } => match filename {
                Some(name) => name.clone(),
                None => format!("upload ({} bytes)", bytes.len()),
            },
            Source::Url(url) => url.clone(),
            Source::Path(path) => path.display().to_string(),
        }
    }
}

impl fmt::Debug for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::Upload { bytes, filename } => f
                .debug_struct("Upload")
                .field("bytes", &format_args!("[{} bytes]", bytes.len()))
                .field("filename", filename)
                .finish(),
            Source::Url(url) => f.debug_tuple("Url").field(url).finish(),
            Source::Path(path) => f.debug_tuple("Path").field(path).finish(),
        }
    }
}

/// Result of ingestion: the first working document and the byte count the
/// size statistics are measured against.
#[derive(Debug)]
pub struct Ingested {
    pub document: WorkingDocument,
    pub original_size: u64,
}

/// Run the ingestion stage.
pub async fn run(ctx: &mut StageContext<'_>, source: Source) -> Result<Ingested, PrepError> {
    let (bytes, filename, url, declared) = match source {
        Source::Upload { bytes, filename } => {
            ctx.log.push(
                Stage::Ingestion,
                format!(
                    "Received upload {} ({} bytes)",
                    filename.as_deref().unwrap_or("<unnamed>"),
                    bytes.len()
                ),
            );
            (bytes, filename, None, None)
        }
        Source::Url(url) => {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(PrepError::invalid_input(format!(
                    "file_url must be an http(s) URL, got '{}'",
                    url
                )));
            }
            let fetched = ctx.toolkit.fetcher.fetch(&url).await?;
            ctx.log.push(
                Stage::Ingestion,
                format!("Downloaded {} bytes from {}", fetched.bytes.len(), url),
            );
            (fetched.bytes, None, Some(url), fetched.content_type)
        }
        Source::Path(path) => {
            let bytes = tokio::fs::read(&path).await.map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    PrepError::invalid_input(format!("File not found: {}", path.display()))
                } else {
                    PrepError::io("reading input file", &path, e)
                }
            })?;
            ctx.log.push(
                Stage::Ingestion,
                format!("Read {} ({} bytes)", path.display(), bytes.len()),
            );
            let filename = path.file_name().map(|n| n.to_string_lossy().into_owned());
            (bytes, filename, None, None)
        }
    };

    if bytes.is_empty() {
        return Err(PrepError::invalid_input("The supplied document is empty"));
    }

    let extension = resolve_extension(filename.as_deref(), url.as_deref(), declared.as_deref());
    let mime = ctx.toolkit.sniffer.sniff(&bytes[..bytes.len().min(SNIFF_HEAD_LEN)]);
    debug!("Classified input: extension={:?} mime={:?}", extension, mime);
    ctx.log.push(
        Stage::Ingestion,
        format!(
            "Detected type {} (extension: {})",
            mime.as_deref().unwrap_or("unknown"),
            if extension.is_empty() { "none" } else { extension.as_str() }
        ),
    );

    // Sniffed type decides the suffix when no name or header supplied one.
    let suffix = if extension.is_empty() {
        mime.as_deref().and_then(extension_for_mime).unwrap_or_default()
    } else {
        extension.as_str()
    };
    let path = ctx.arena.allocate("in", suffix)?;
    tokio::fs::write(&path, &bytes)
        .await
        .map_err(|e| PrepError::io("writing ingested document", &path, e))?;

    let size = bytes.len() as u64;
    Ok(Ingested {
        document: WorkingDocument {
            path,
            extension,
            mime,
            size_bytes: size,
            page_count: None,
            page_sizes: Vec::new(),
            encrypted: false,
        },
        original_size: size,
    })
}

/// File name → URL path → declared content type → unknown (empty).
pub fn resolve_extension(filename: Option<&str>, url: Option<&str>, declared: Option<&str>) -> String {
    filename
        .and_then(extension_of)
        .or_else(|| url.and_then(url_extension))
        .or_else(|| declared.and_then(extension_for_mime).map(str::to_string))
        .unwrap_or_default()
}

fn extension_of(name: &str) -> Option<String> {
    let ext = Path::new(name).extension()?.to_str()?.trim().to_ascii_lowercase();
    (!ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric())).then_some(ext)
}

fn url_extension(url: &str) -> Option<String> {
    let parsed = reqwest::Url::parse(url).ok()?;
    let last = parsed.path_segments()?.filter(|s| !s.is_empty()).last()?;
    extension_of(last)
}

/// Preferred extension for a declared media type.
pub fn extension_for_mime(mime: &str) -> Option<&'static str> {
    let ext = match mime {
        "application/pdf" => "pdf",
        "image/jpeg" | "image/jpg" => "jpg",
        "image/png" => "png",
        "image/gif" => "gif",
        "image/bmp" | "image/x-ms-bmp" => "bmp",
        "image/tiff" => "tiff",
        "application/msword" => "doc",
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document" => "docx",
        "application/vnd.oasis.opendocument.text" => "odt",
        "application/rtf" | "text/rtf" => "rtf",
        "text/plain" => "txt",
        "text/csv" => "csv",
        "application/vnd.ms-excel" => "xls",
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet" => "xlsx",
        "application/vnd.oasis.opendocument.spreadsheet" => "ods",
        "application/vnd.ms-powerpoint" => "ppt",
        "application/vnd.openxmlformats-officedocument.presentationml.presentation" => "pptx",
        "application/vnd.oasis.opendocument.presentation" => "odp",
        _ => return None,
    };
    Some(ext)
}
