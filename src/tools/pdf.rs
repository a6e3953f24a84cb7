//! In-process PDF inspection and password decryption with lopdf.
//!
//! lopdf is synchronous and CPU-bound on large files, so both backends run
//! their work under `tokio::task::spawn_blocking`. Documents locked with a
//! user password are beyond lopdf's loader and go to an external decryptor.

use super::{Decryptor, PdfInfo, PdfInspector};
use crate::config::PageSize;
use crate::error::ToolError;
use async_trait::async_trait;
use lopdf::{Document, Object, ObjectId};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Page-tree depth after which inheritance lookups give up (cyclic trees).
const MAX_TREE_DEPTH: usize = 64;

// ── Inspection ───────────────────────────────────────────────────────────

/// [`PdfInspector`] backed by lopdf.
pub struct LopdfInspector;

#[async_trait]
impl PdfInspector for LopdfInspector {
    async fn inspect(&self, path: &Path) -> Result<PdfInfo, ToolError> {
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || inspect_blocking(&path))
            .await
            .map_err(|e| ToolError::engine("lopdf", format!("inspection task panicked: {}", e)))?
    }
}

/// Blocking implementation of [`LopdfInspector::inspect`].
pub fn inspect_blocking(path: &Path) -> Result<PdfInfo, ToolError> {
    let raw = std::fs::read(path).map_err(|e| ToolError::Io {
        program: "lopdf".into(),
        detail: format!("{}: {}", path.display(), e),
    })?;
    inspect_bytes(&raw)
}

/// Inspect an in-memory PDF.
///
/// An `/Encrypt` entry in the active trailer marks it encrypted even when
/// lopdf refuses to parse it; page geometry is then unknown.
pub fn inspect_bytes(raw: &[u8]) -> Result<PdfInfo, ToolError> {
    let declares_encrypt = declares_encryption(raw);
    match Document::load_mem(raw) {
        Ok(doc) => {
            let pages = page_sizes(&doc);
            let encrypted = doc.is_encrypted() || declares_encrypt;
            debug!("Inspected PDF: {} pages, encrypted={}", pages.len(), encrypted);
            Ok(PdfInfo { encrypted, pages })
        }
        Err(e) if declares_encrypt => {
            debug!("Encrypted PDF could not be parsed: {}", e);
            Ok(PdfInfo {
                encrypted: true,
                pages: Vec::new(),
            })
        }
        Err(e) => Err(ToolError::engine("lopdf", e)),
    }
}

/// True when the active trailer carries an `/Encrypt` entry.
///
/// The active trailer is the one `startxref` points at: the `trailer`
/// dictionary after a classic xref table, or the dictionary of an xref
/// stream. Earlier trailers of incremental updates and page content are
/// never consulted. When the offset is unusable the last `trailer` keyword
/// in the file stands in.
fn declares_encryption(raw: &[u8]) -> bool {
    active_trailer(raw).is_some_and(has_encrypt_key)
}

fn active_trailer(raw: &[u8]) -> Option<&[u8]> {
    let base = find(&raw[..raw.len().min(1024)], b"%PDF-").unwrap_or(0);
    let pointed = startxref_offset(raw)
        .and_then(|offset| base.checked_add(offset))
        .and_then(|at| raw.get(at..))
        .and_then(|section| {
            if section.starts_with(b"xref") {
                let at = find(section, b"trailer")?;
                dictionary_at(&section[at..])
            } else if section.first().is_some_and(u8::is_ascii_digit) {
                dictionary_at(section)
            } else {
                None
            }
        });
    pointed.or_else(|| {
        let at = rfind(raw, b"trailer")?;
        dictionary_at(&raw[at..])
    })
}

fn startxref_offset(raw: &[u8]) -> Option<usize> {
    let at = rfind(raw, b"startxref")? + b"startxref".len();
    let digits: Vec<u8> = raw[at..]
        .iter()
        .skip_while(|b| b.is_ascii_whitespace())
        .take_while(|b| b.is_ascii_digit())
        .copied()
        .collect();
    std::str::from_utf8(&digits).ok()?.parse().ok()
}

/// The first balanced `<< … >>` in `bytes`.
fn dictionary_at(bytes: &[u8]) -> Option<&[u8]> {
    let start = find(bytes, b"<<")?;
    let mut depth = 0usize;
    let mut i = start;
    while i + 1 < bytes.len() {
        match &bytes[i..i + 2] {
            b"<<" => {
                depth += 1;
                i += 2;
            }
            b">>" => {
                depth -= 1;
                i += 2;
                if depth == 0 {
                    return Some(&bytes[start..i]);
                }
            }
            _ => i += 1,
        }
    }
    None
}

fn has_encrypt_key(dict: &[u8]) -> bool {
    const KEY: &[u8] = b"/Encrypt";
    dict.windows(KEY.len() + 1).any(|w| {
        &w[..KEY.len()] == KEY && matches!(w[KEY.len()], b' ' | b'\r' | b'\n' | b'\t' | b'<' | b'0'..=b'9')
    })
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn rfind(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).rposition(|w| w == needle)
}

/// Effective size of every page, in page order.
fn page_sizes(doc: &Document) -> Vec<PageSize> {
    doc.get_pages()
        .values()
        .map(|&id| {
            effective_page_size(doc, id).unwrap_or_else(|| {
                debug!("Page {:?} has no readable MediaBox; assuming letter", id);
                PageSize::LETTER
            })
        })
        .collect()
}

/// MediaBox extent with `/Rotate` applied, both possibly inherited from an
/// ancestor `Pages` node.
fn effective_page_size(doc: &Document, page_id: ObjectId) -> Option<PageSize> {
    let media_box = resolve(doc, inherited(doc, page_id, b"MediaBox")?).as_array().ok()?;
    if media_box.len() != 4 {
        return None;
    }
    let coords = media_box
        .iter()
        .map(|o| resolve(doc, o).as_float().ok().map(f64::from))
        .collect::<Option<Vec<f64>>>()?;
    let size = PageSize {
        width_pt: (coords[2] - coords[0]).abs(),
        height_pt: (coords[3] - coords[1]).abs(),
    };
    let rotate = inherited(doc, page_id, b"Rotate")
        .and_then(|o| resolve(doc, o).as_i64().ok())
        .unwrap_or(0);
    if rotate.rem_euclid(180) == 90 {
        Some(size.rotated())
    } else {
        Some(size)
    }
}

fn inherited<'a>(doc: &'a Document, page_id: ObjectId, key: &[u8]) -> Option<&'a Object> {
    let mut node = doc.get_object(page_id).ok()?.as_dict().ok()?;
    for _ in 0..MAX_TREE_DEPTH {
        if let Ok(value) = node.get(key) {
            return Some(value);
        }
        let parent = node.get(b"Parent").ok()?.as_reference().ok()?;
        node = doc.get_object(parent).ok()?.as_dict().ok()?;
    }
    None
}

fn resolve<'a>(doc: &'a Document, obj: &'a Object) -> &'a Object {
    match obj {
        Object::Reference(id) => doc.get_object(*id).unwrap_or(obj),
        other => other,
    }
}

// ── Decryption ───────────────────────────────────────────────────────────

/// [`Decryptor`] backed by lopdf's standard security handler.
///
/// lopdf opens documents whose user password is empty (owner restrictions
/// only) and decrypts every object while loading; those are rewritten here
/// by dropping the security handler. A document that needs a real user
/// password is only authenticated in process: lopdf leaves its objects
/// unparsed, so a matching password is handed to the `external` decryptor.
#[derive(Default)]
pub struct LopdfDecryptor {
    external: Option<Arc<dyn Decryptor>>,
}

impl LopdfDecryptor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delegate user-password documents to `external`.
    pub fn with_external(external: Arc<dyn Decryptor>) -> Self {
        Self {
            external: Some(external),
        }
    }
}

/// What the in-process attempt managed.
#[derive(Debug, PartialEq)]
enum Attempt {
    Written,
    WrongPassword,
    /// The password authenticates but lopdf cannot apply it.
    NeedsExternal,
    Unreadable(String),
}

#[async_trait]
impl Decryptor for LopdfDecryptor {
    async fn try_decrypt(&self, input: &Path, password: &str, output: &Path) -> Result<bool, ToolError> {
        let (owned_input, owned_output, owned_password): (PathBuf, PathBuf, String) =
            (input.to_path_buf(), output.to_path_buf(), password.to_string());
        let attempt = tokio::task::spawn_blocking(move || {
            decrypt_blocking(&owned_input, &owned_password, &owned_output)
        })
        .await
        .map_err(|e| ToolError::engine("lopdf", format!("decryption task panicked: {}", e)))??;

        let detail = match attempt {
            Attempt::Written => return Ok(true),
            Attempt::WrongPassword => return Ok(false),
            Attempt::NeedsExternal => "document requires a user password".to_string(),
            Attempt::Unreadable(reason) => reason,
        };
        match &self.external {
            Some(external) => {
                debug!("Handing decryption to the external decryptor: {}", detail);
                external.try_decrypt(input, password, output).await
            }
            None => Err(ToolError::engine("lopdf", detail)),
        }
    }
}

fn decrypt_blocking(input: &Path, password: &str, output: &Path) -> Result<Attempt, ToolError> {
    let mut doc = match Document::load(input) {
        Ok(doc) => doc,
        Err(e) => return Ok(Attempt::Unreadable(e.to_string())),
    };

    if doc.is_encrypted() {
        if doc.authenticate_password(password).is_err() {
            return Ok(Attempt::WrongPassword);
        }
        // Without a decoded state only the /Encrypt dictionary was parsed.
        if doc.encryption_state.is_none() {
            return Ok(Attempt::NeedsExternal);
        }
        // Objects are already plaintext.
        if let Ok(id) = doc.trailer.get(b"Encrypt").and_then(Object::as_reference) {
            doc.objects.remove(&id);
        }
        doc.trailer.remove(b"Encrypt");
        doc.encryption_state = None;
    }

    let expected_pages = doc.get_pages().len();
    doc.save(output).map_err(|e| ToolError::Io {
        program: "lopdf".into(),
        detail: format!("{}: {}", output.display(), e),
    })?;

    let reread = std::fs::read(output).map_err(|e| ToolError::Io {
        program: "lopdf".into(),
        detail: e.to_string(),
    })?;
    let info = inspect_bytes(&reread)?;
    if info.encrypted {
        return Err(ToolError::engine("lopdf", "rewritten copy still declares encryption"));
    }
    if info.page_count() != expected_pages {
        return Err(ToolError::engine(
            "lopdf",
            format!(
                "rewritten copy has {} pages, expected {}",
                info.page_count(),
                expected_pages
            ),
        ));
    }
    Ok(Attempt::Written)
}
