//! Magic-number MIME detection.

use super::MimeSniffer;

/// Bytes read from the start of a file before sniffing.
pub const SNIFF_HEAD_LEN: usize = 8192;

/// Container formats `infer` reports for many unrelated document types.
/// A bare zip could be a DOCX or an EPUB; an OLE compound file could be a
/// DOC or an MSI. These are treated as inconclusive so the extension decides.
const AMBIGUOUS: &[&str] = &[
    "application/zip",
    "application/x-ole-storage",
    "application/octet-stream",
];

/// [`MimeSniffer`] backed by the `infer` crate.
pub struct MagicSniffer;

impl MimeSniffer for MagicSniffer {
    fn sniff(&self, head: &[u8]) -> Option<String> {
        let head = &head[..head.len().min(SNIFF_HEAD_LEN)];
        // PDF writers may emit junk before the header; readers accept up to 1 KiB of it.
        if head.len() >= 5 && head[..head.len().min(1024)].windows(5).any(|w| w == b"%PDF-") {
            return Some("application/pdf".to_string());
        }
        let kind = infer::get(head)?;
        let mime = kind.mime_type();
        if AMBIGUOUS.contains(&mime) {
            None
        } else {
            Some(mime.to_string())
        }
    }
}
