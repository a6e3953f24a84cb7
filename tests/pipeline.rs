//! Pipeline integration tests.
//!
//! These drive `DocumentPreparer` end to end with a mock toolkit: the
//! external programs (gs, qpdf, soffice) are replaced by deterministic fakes
//! that rewrite real lopdf-built PDFs, while sniffing, image layout, HTTP
//! fetching and PDF inspection use the production backends.
//!
//! Encryption is mostly simulated: a page carrying a `/Locked` key counts as
//! encrypted, and the fake decryptor/stripper remove that key. The lopdf
//! decryptor is also driven with real RC4-encrypted documents.
//!
//! Run with:
//!   cargo test --test pipeline

use async_trait::async_trait;
use lopdf::{
    dictionary, Document, EncryptionState, EncryptionVersion, Object, ObjectId, Permissions, Stream,
    StringFormat,
};
use pdfprep::tools::pdf::inspect_bytes;
use pdfprep::tools::{
    Compressor, Decryptor, HttpFetcher, LopdfDecryptor, LopdfInspector, MagicSniffer, OfficeConverter, PageFitter,
    PdfInfo, PdfInspector, PrintpdfRasterizer, ProtectionStripper,
};
use pdfprep::{
    CompressionPreset, Delivery, DocumentPreparer, ErrorKind, PageSize, PipelineConfig,
    PipelineProgressCallback, PipelineResult, PipelineStatus, PrepError, PrepareOptions,
    ProtectionState, ReturnMode, Source, Stage, StageReport, StageStatus, ToolError, Toolkit,
};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

const MB: usize = 1024 * 1024;
const LOCK_KEY: &[u8] = b"/Locked";
const LETTER: (i64, i64) = (612, 792);
const LETTER_LANDSCAPE: (i64, i64) = (792, 612);
const A4: (i64, i64) = (595, 842);

// ── PDF helpers ──────────────────────────────────────────────────────────────

/// A PDF with one page per entry in `pages`, an unreferenced padding stream
/// of `padding` bytes, and the lock marker on every page when `locked`.
fn build_pdf(pages: &[(i64, i64)], padding: usize, locked: bool) -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id: ObjectId = doc.new_object_id();
    let mut kids: Vec<Object> = Vec::new();
    for &(w, h) in pages {
        let content = doc.add_object(Stream::new(dictionary! {}, b"BT ET".to_vec()));
        let media_box: Vec<Object> = vec![0.into(), 0.into(), w.into(), h.into()];
        let mut page = dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => media_box,
            "Contents" => content,
        };
        if locked {
            page.set("Locked", true);
        }
        kids.push(doc.add_object(page).into());
    }
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => pages.len() as i64,
        }),
    );
    if padding > 0 {
        doc.add_object(Stream::new(dictionary! {}, vec![b'%'; padding]));
    }
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    let mut buf = Vec::new();
    doc.save_to(&mut buf).unwrap();
    buf
}

/// A PDF of roughly `target` bytes.
fn pdf_of_size(pages: &[(i64, i64)], locked: bool, target: usize) -> Vec<u8> {
    let base = build_pdf(pages, 0, locked).len();
    build_pdf(pages, target.saturating_sub(base + 64), locked)
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

fn page_dims(info: &PdfInfo) -> Vec<(i64, i64)> {
    info.pages
        .iter()
        .map(|p| (p.width_pt.round() as i64, p.height_pt.round() as i64))
        .collect()
}

/// Copy `input` to `output` with the lock marker removed from every page.
fn unlock(input: &Path, output: &Path) {
    let mut doc = Document::load(input).unwrap();
    let ids: Vec<ObjectId> = doc.get_pages().values().copied().collect();
    for id in ids {
        doc.get_object_mut(id)
            .unwrap()
            .as_dict_mut()
            .unwrap()
            .remove(b"Locked");
    }
    doc.save(output).unwrap();
}

/// Re-save `pdf` under RC4-128 standard security.
fn encrypt(pdf: &[u8], user: &str, owner: &str) -> Vec<u8> {
    let mut doc = Document::load_mem(pdf).unwrap();
    doc.trailer.set(
        "ID",
        Object::Array(vec![
            Object::String(b"0123456789abcdef".to_vec(), StringFormat::Literal),
            Object::String(b"fedcba9876543210".to_vec(), StringFormat::Literal),
        ]),
    );
    let state = EncryptionState::try_from(EncryptionVersion::V2 {
        document: &doc,
        owner_password: owner,
        user_password: user,
        key_length: 128,
        permissions: Permissions::all(),
    })
    .unwrap();
    doc.encrypt(&state).unwrap();
    let mut buf = Vec::new();
    doc.save_to(&mut buf).unwrap();
    buf
}

fn page_contents(pdf: &[u8]) -> Vec<Vec<u8>> {
    let doc = Document::load_mem(pdf).unwrap();
    doc.get_pages()
        .values()
        .map(|&id| doc.get_page_content(id).unwrap())
        .collect()
}

/// Deterministic noise, so image encoders cannot shrink it away.
fn noisy_image(width: u32, height: u32, format: image::ImageFormat) -> Vec<u8> {
    let mut state: u32 = 0x2545_F491;
    let img = image::RgbImage::from_fn(width, height, |_, _| {
        state ^= state << 13;
        state ^= state >> 17;
        state ^= state << 5;
        let b = state.to_le_bytes();
        image::Rgb([b[0], b[1], b[2]])
    });
    let mut buf = std::io::Cursor::new(Vec::new());
    image::DynamicImage::ImageRgb8(img)
        .write_to(&mut buf, format)
        .unwrap();
    buf.into_inner()
}

// ── Fake capabilities ────────────────────────────────────────────────────────

/// Production inspection plus the simulated lock.
struct MarkerInspector;

#[async_trait]
impl PdfInspector for MarkerInspector {
    async fn inspect(&self, path: &Path) -> Result<PdfInfo, ToolError> {
        let mut info = LopdfInspector.inspect(path).await?;
        let raw = std::fs::read(path).map_err(|e| ToolError::Io {
            program: "test".into(),
            detail: e.to_string(),
        })?;
        if contains(&raw, LOCK_KEY) {
            info.encrypted = true;
        }
        Ok(info)
    }
}

/// Opens locked files with one known password.
struct FakeDecryptor {
    password: Option<&'static str>,
    tried: Mutex<Vec<String>>,
}

impl FakeDecryptor {
    fn new(password: Option<&'static str>) -> Self {
        Self {
            password,
            tried: Mutex::new(Vec::new()),
        }
    }

    fn tried(&self) -> Vec<String> {
        self.tried.lock().unwrap().clone()
    }
}

#[async_trait]
impl Decryptor for FakeDecryptor {
    async fn try_decrypt(&self, input: &Path, password: &str, output: &Path) -> Result<bool, ToolError> {
        self.tried.lock().unwrap().push(password.to_string());
        if self.password == Some(password) {
            unlock(input, output);
            return Ok(true);
        }
        Ok(false)
    }
}

/// Claims success for every password but writes a PDF with no pages.
struct HollowDecryptor;

#[async_trait]
impl Decryptor for HollowDecryptor {
    async fn try_decrypt(&self, _input: &Path, _password: &str, output: &Path) -> Result<bool, ToolError> {
        std::fs::write(output, build_pdf(&[], 4096, false)).unwrap();
        Ok(true)
    }
}

/// Stands in for qpdf behind the lopdf decryptor.
struct ExternalDecryptor {
    pages: usize,
    passwords: Mutex<Vec<String>>,
}

#[async_trait]
impl Decryptor for ExternalDecryptor {
    async fn try_decrypt(&self, _input: &Path, password: &str, output: &Path) -> Result<bool, ToolError> {
        self.passwords.lock().unwrap().push(password.to_string());
        std::fs::write(output, build_pdf(&vec![LETTER; self.pages], 8 * 1024, false)).unwrap();
        Ok(true)
    }
}

#[derive(Clone, Copy)]
enum StripMode {
    Unlocks,
    Missing,
    LeavesLocked,
}

struct FakeStripper {
    mode: StripMode,
    calls: AtomicUsize,
}

impl FakeStripper {
    fn new(mode: StripMode) -> Self {
        Self {
            mode,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ProtectionStripper for FakeStripper {
    async fn strip(&self, input: &Path, output: &Path, _timeout: Duration) -> Result<(), ToolError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.mode {
            StripMode::Unlocks => unlock(input, output),
            StripMode::Missing => {
                return Err(ToolError::NotInstalled {
                    program: "qpdf".into(),
                })
            }
            StripMode::LeavesLocked => {
                std::fs::copy(input, output).unwrap();
            }
        }
        Ok(())
    }
}

/// Sets every page's MediaBox to the target.
struct FakeFitter {
    fail: bool,
    calls: AtomicUsize,
}

impl FakeFitter {
    fn new(fail: bool) -> Self {
        Self {
            fail,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl PageFitter for FakeFitter {
    async fn fit(&self, input: &Path, output: &Path, page: PageSize, _timeout: Duration) -> Result<(), ToolError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(ToolError::Failed {
                program: "gs".into(),
                code: Some(1),
                stderr: "Unrecoverable error".into(),
            });
        }
        let mut doc = Document::load(input).unwrap();
        let ids: Vec<ObjectId> = doc.get_pages().values().copied().collect();
        for id in ids {
            let dict = doc.get_object_mut(id).unwrap().as_dict_mut().unwrap();
            let media_box: Vec<Object> = vec![
                0.into(),
                0.into(),
                (page.width_pt as i64).into(),
                (page.height_pt as i64).into(),
            ];
            dict.set("MediaBox", media_box);
            dict.remove(b"Rotate");
        }
        doc.save(output).unwrap();
        Ok(())
    }
}

#[derive(Clone, Copy)]
enum Behavior {
    /// Output is the input's size capped at this many bytes.
    Cap(usize),
    /// Output is this many bytes regardless of the input.
    Exact(usize),
    /// Output below the validity threshold.
    Tiny,
    Fail,
}

/// Rebuilds the input's pages at a size chosen per preset.
struct FakeCompressor {
    behaviors: HashMap<CompressionPreset, Behavior>,
    calls: Mutex<Vec<CompressionPreset>>,
}

impl FakeCompressor {
    fn new(behaviors: &[(CompressionPreset, Behavior)]) -> Self {
        Self {
            behaviors: behaviors.iter().copied().collect(),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Every preset passes the document through at its current size.
    fn identity() -> Self {
        Self::new(&[])
    }

    fn calls(&self) -> Vec<CompressionPreset> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Compressor for FakeCompressor {
    async fn compress(
        &self,
        input: &Path,
        output: &Path,
        preset: CompressionPreset,
        _timeout: Duration,
    ) -> Result<(), ToolError> {
        self.calls.lock().unwrap().push(preset);
        let behavior = self
            .behaviors
            .get(&preset)
            .copied()
            .unwrap_or(Behavior::Cap(usize::MAX));
        let raw = std::fs::read(input).unwrap();
        let pages = page_dims(&inspect_bytes(&raw).unwrap());
        let locked = contains(&raw, LOCK_KEY);
        let bytes = match behavior {
            Behavior::Fail => {
                return Err(ToolError::Failed {
                    program: "gs".into(),
                    code: Some(1),
                    stderr: "Error: /undefined".into(),
                })
            }
            Behavior::Tiny => b"%PDF-1.4\n%%EOF\n".to_vec(),
            Behavior::Cap(cap) => pdf_of_size(&pages, locked, raw.len().min(cap)),
            Behavior::Exact(size) => pdf_of_size(&pages, locked, size),
        };
        std::fs::write(output, bytes).unwrap();
        Ok(())
    }
}

#[derive(Clone, Copy)]
enum OfficeMode {
    Works,
    Fails,
    TimesOut,
    NoOutput,
}

struct FakeOffice {
    mode: OfficeMode,
    calls: AtomicUsize,
    inputs: Mutex<Vec<PathBuf>>,
}

impl FakeOffice {
    fn new(mode: OfficeMode) -> Self {
        Self {
            mode,
            calls: AtomicUsize::new(0),
            inputs: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl OfficeConverter for FakeOffice {
    async fn convert(&self, input: &Path, output: &Path, timeout: Duration) -> Result<(), ToolError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inputs.lock().unwrap().push(input.to_path_buf());
        match self.mode {
            OfficeMode::Works => {
                std::fs::write(output, build_pdf(&[LETTER], 4096, false)).unwrap();
                Ok(())
            }
            OfficeMode::Fails => Err(ToolError::Failed {
                program: "soffice".into(),
                code: Some(77),
                stderr: "source file could not be loaded".into(),
            }),
            OfficeMode::TimesOut => Err(ToolError::TimedOut {
                program: "soffice".into(),
                secs: timeout.as_secs(),
            }),
            OfficeMode::NoOutput => Ok(()),
        }
    }
}

/// Records every progress event as a short string.
#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<String>>,
}

impl Recorder {
    fn push(&self, event: String) {
        self.events.lock().unwrap().push(event);
    }

    fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }
}

impl PipelineProgressCallback for Recorder {
    fn on_run_start(&self, _source: &str) {
        self.push("start".into());
    }

    fn on_stage_start(&self, stage: Stage) {
        self.push(format!("begin:{stage}"));
    }

    fn on_stage_complete(&self, stage: Stage, _report: &StageReport) {
        self.push(format!("end:{stage}"));
    }

    fn on_compression_attempt(&self, attempt: &pdfprep::CompressionAttempt) {
        self.push(format!("attempt:{}", attempt.preset));
    }

    fn on_run_complete(&self, _result: &PipelineResult) {
        self.push("complete".into());
    }

    fn on_run_failed(&self, _error: &PrepError) {
        self.push("failed".into());
    }
}

// ── Fixture ──────────────────────────────────────────────────────────────────

struct Fixture {
    dir: TempDir,
    decryptor: Arc<FakeDecryptor>,
    stripper: Arc<FakeStripper>,
    fitter: Arc<FakeFitter>,
    compressor: Arc<FakeCompressor>,
    office: Arc<FakeOffice>,
}

impl Fixture {
    fn new() -> Self {
        Self {
            dir: tempfile::tempdir().unwrap(),
            decryptor: Arc::new(FakeDecryptor::new(None)),
            stripper: Arc::new(FakeStripper::new(StripMode::LeavesLocked)),
            fitter: Arc::new(FakeFitter::new(false)),
            compressor: Arc::new(FakeCompressor::identity()),
            office: Arc::new(FakeOffice::new(OfficeMode::Works)),
        }
    }

    fn cache_dir(&self) -> PathBuf {
        self.dir.path().join("cache")
    }

    fn config(&self) -> PipelineConfig {
        PipelineConfig::builder()
            .temp_dir(self.cache_dir())
            .build()
            .unwrap()
    }

    fn toolkit(&self) -> Toolkit {
        Toolkit {
            fetcher: Arc::new(HttpFetcher::new(Duration::from_secs(5)).unwrap()),
            sniffer: Arc::new(MagicSniffer),
            rasterizer: Arc::new(PrintpdfRasterizer),
            office: self.office.clone(),
            decryptor: self.decryptor.clone(),
            stripper: self.stripper.clone(),
            fitter: self.fitter.clone(),
            compressor: self.compressor.clone(),
            inspector: Arc::new(MarkerInspector),
        }
    }

    fn preparer(&self) -> DocumentPreparer {
        DocumentPreparer::new(self.config(), self.toolkit())
    }

    /// Files left in the shared directory.
    fn leftovers(&self) -> Vec<String> {
        match std::fs::read_dir(self.cache_dir()) {
            Ok(entries) => entries
                .flatten()
                .map(|e| e.file_name().to_string_lossy().into_owned())
                .collect(),
            Err(_) => Vec::new(),
        }
    }
}

fn upload(bytes: Vec<u8>, name: &str) -> Source {
    Source::Upload {
        bytes,
        filename: Some(name.to_string()),
    }
}

fn delivered_info(result: &PipelineResult) -> PdfInfo {
    inspect_bytes(result.delivery.bytes().expect("inline delivery")).unwrap()
}

/// A one-shot HTTP server answering the first request with `status_line`.
async fn serve_once(status_line: &'static str, content_type: &'static str, body: Vec<u8>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut request = [0u8; 4096];
        let _ = socket.read(&mut request).await;
        let head = format!(
            "HTTP/1.1 {status_line}\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
            body.len()
        );
        socket.write_all(head.as_bytes()).await.unwrap();
        socket.write_all(&body).await.unwrap();
        let _ = socket.shutdown().await;
    });
    format!("http://{addr}")
}

// ── Normalization ────────────────────────────────────────────────────────────

#[tokio::test]
async fn pdf_passthrough_keeps_page_count_and_logs_skip() {
    let fx = Fixture::new();
    let pdf = build_pdf(&[LETTER, LETTER, LETTER], 300 * 1024, false);

    let result = fx
        .preparer()
        .prepare(upload(pdf, "report.pdf"), &PrepareOptions::default())
        .await
        .unwrap();

    assert_eq!(result.page_count, Some(3));
    assert!(result.log.contains("skipped conversion"));
    assert_eq!(
        result.report(Stage::Normalization).unwrap().status,
        StageStatus::Skipped
    );
    assert_eq!(result.status, PipelineStatus::Success);
    assert_eq!(result.protection, ProtectionState::NotEncrypted);
    assert_eq!(delivered_info(&result).page_count(), 3);
    assert!(fx.leftovers().is_empty(), "leaked: {:?}", fx.leftovers());
}

#[tokio::test]
async fn wide_image_becomes_single_landscape_page() {
    let fx = Fixture::new();
    let png = noisy_image(400, 200, image::ImageFormat::Png);

    let result = fx
        .preparer()
        .prepare(upload(png, "wide.png"), &PrepareOptions::default())
        .await
        .unwrap();

    assert_eq!(result.page_count, Some(1));
    let page = delivered_info(&result).pages[0];
    assert!(page.width_pt > page.height_pt, "expected landscape, got {page:?}");
    assert_eq!(
        result.report(Stage::Normalization).unwrap().status,
        StageStatus::Completed
    );
    assert_eq!(fx.fitter.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn tall_image_becomes_single_portrait_page() {
    let fx = Fixture::new();
    let png = noisy_image(200, 400, image::ImageFormat::Png);

    let result = fx
        .preparer()
        .prepare(upload(png, "tall.png"), &PrepareOptions::default())
        .await
        .unwrap();

    assert_eq!(result.page_count, Some(1));
    let page = delivered_info(&result).pages[0];
    assert!(page.height_pt > page.width_pt, "expected portrait, got {page:?}");
}

#[tokio::test]
async fn office_documents_go_through_the_converter() {
    let fx = Fixture::new();

    let result = fx
        .preparer()
        .prepare(
            upload(b"Quarterly notes\nline two\n".to_vec(), "notes.txt"),
            &PrepareOptions::default(),
        )
        .await
        .unwrap();

    assert_eq!(fx.office.calls.load(Ordering::SeqCst), 1);
    assert_eq!(result.page_count, Some(1));
    assert!(result.log.contains("Converted .txt document to PDF"));
}

#[tokio::test]
async fn unnamed_upload_takes_its_suffix_from_the_sniffed_type() {
    let fx = Fixture::new();
    let rtf = b"{\\rtf1\\ansi Quarterly notes\\par}".to_vec();

    fx.preparer()
        .prepare(
            Source::Upload {
                bytes: rtf,
                filename: None,
            },
            &PrepareOptions::default(),
        )
        .await
        .unwrap();

    let inputs = fx.office.inputs.lock().unwrap().clone();
    assert_eq!(inputs.len(), 1);
    assert_eq!(inputs[0].extension().and_then(|e| e.to_str()), Some("rtf"));
}

#[tokio::test]
async fn office_failures_are_hard_and_leave_nothing_behind() {
    for (mode, expect_timeout) in [
        (OfficeMode::Fails, false),
        (OfficeMode::TimesOut, true),
        (OfficeMode::NoOutput, false),
    ] {
        let mut fx = Fixture::new();
        fx.office = Arc::new(FakeOffice::new(mode));

        let err = fx
            .preparer()
            .prepare(upload(b"PK\x03\x04 not really".to_vec(), "contract.docx"), &PrepareOptions::default())
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Conversion);
        assert_eq!(
            matches!(err, PrepError::ConversionTimeout { .. }),
            expect_timeout,
            "{err}"
        );
        assert!(fx.leftovers().is_empty(), "leaked: {:?}", fx.leftovers());
    }
}

#[tokio::test]
async fn unknown_types_are_unsupported() {
    let fx = Fixture::new();
    let mut elf = b"\x7fELF\x02\x01\x01\x00".to_vec();
    elf.resize(128, 0);

    for source in [
        upload(elf, "tool.pdf"),
        upload(b"opaque payload".to_vec(), "blob.xyz"),
    ] {
        let err = fx
            .preparer()
            .prepare(source, &PrepareOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, PrepError::UnsupportedType { .. }), "{err}");
    }
    assert!(fx.leftovers().is_empty());
}

// ── Protection ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn common_password_unlocks_the_document() {
    let mut fx = Fixture::new();
    fx.decryptor = Arc::new(FakeDecryptor::new(Some("123456")));
    let pdf = build_pdf(&[LETTER], 8 * 1024, true);

    let result = fx
        .preparer()
        .prepare(upload(pdf, "statement.pdf"), &PrepareOptions::default())
        .await
        .unwrap();

    assert!(result.log.contains("Successfully decrypted with common password"));
    assert!(!result.is_password_protected);
    assert_eq!(result.status, PipelineStatus::Success);
    assert_eq!(result.protection, ProtectionState::RecoveredViaDictionary);
    assert_eq!(fx.decryptor.tried(), vec!["".to_string(), "123456".to_string()]);
    assert_eq!(fx.stripper.calls.load(Ordering::SeqCst), 0);
    assert!(!contains(result.delivery.bytes().unwrap(), LOCK_KEY));
}

#[tokio::test]
async fn forced_strip_recovers_when_no_password_matches() {
    let mut fx = Fixture::new();
    fx.stripper = Arc::new(FakeStripper::new(StripMode::Unlocks));
    let pdf = build_pdf(&[LETTER], 8 * 1024, true);

    let result = fx
        .preparer()
        .prepare(upload(pdf, "statement.pdf"), &PrepareOptions::default())
        .await
        .unwrap();

    assert_eq!(fx.decryptor.tried().len(), pdfprep::config::DEFAULT_PASSWORDS.len());
    assert!(result.log.contains("Removed protection with forced strip"));
    assert_eq!(result.protection, ProtectionState::RecoveredViaForcedStrip);
    assert!(!result.is_password_protected);
}

#[tokio::test]
async fn unrecoverable_protection_still_delivers_a_pdf() {
    let fx = Fixture::new();
    let pdf = build_pdf(&[LETTER, LETTER], 8 * 1024, true);

    let result = fx
        .preparer()
        .prepare(upload(pdf, "locked.pdf"), &PrepareOptions::default())
        .await
        .unwrap();

    assert!(result.is_password_protected);
    assert_eq!(result.status, PipelineStatus::SuccessWithProtection);
    assert_eq!(result.protection, ProtectionState::Irrecoverable);
    assert_eq!(
        result.report(Stage::ProtectionRemoval).unwrap().status,
        StageStatus::SoftFailure
    );
    let bytes = result.delivery.bytes().unwrap();
    assert!(bytes.starts_with(b"%PDF-"));
    assert_eq!(result.page_count, Some(2));
    assert!(fx.leftovers().is_empty(), "leaked: {:?}", fx.leftovers());
}

#[tokio::test]
async fn missing_strip_tool_counts_as_irrecoverable() {
    let mut fx = Fixture::new();
    fx.stripper = Arc::new(FakeStripper::new(StripMode::Missing));
    let pdf = build_pdf(&[LETTER], 8 * 1024, true);

    let result = fx
        .preparer()
        .prepare(upload(pdf, "locked.pdf"), &PrepareOptions::default())
        .await
        .unwrap();

    assert_eq!(result.protection, ProtectionState::Irrecoverable);
    assert!(result.log.contains("unavailable"));
    assert!(result.is_password_protected);
}

#[tokio::test]
async fn owner_restricted_pdf_is_unlocked_in_process() {
    let fx = Fixture::new();
    let pdf = encrypt(&build_pdf(&[LETTER, LETTER, LETTER], 8 * 1024, false), "", "owner-secret");
    let mut toolkit = fx.toolkit();
    toolkit.decryptor = Arc::new(LopdfDecryptor::new());

    let result = DocumentPreparer::new(fx.config(), toolkit)
        .prepare(upload(pdf, "restricted.pdf"), &PrepareOptions::default())
        .await
        .unwrap();

    assert_eq!(result.protection, ProtectionState::RecoveredViaDictionary);
    assert!(!result.is_password_protected);
    assert_eq!(result.page_count, Some(3));
    let contents = page_contents(result.delivery.bytes().unwrap());
    assert_eq!(contents.len(), 3);
    for content in contents {
        assert_eq!(content, b"BT ET".to_vec());
    }
    assert!(fx.leftovers().is_empty(), "leaked: {:?}", fx.leftovers());
}

#[tokio::test]
async fn user_password_from_dictionary_unlocks_real_encryption() {
    let fx = Fixture::new();
    let pdf = encrypt(&build_pdf(&[LETTER, LETTER, LETTER], 8 * 1024, false), "123456", "owner-secret");
    let external = Arc::new(ExternalDecryptor {
        pages: 3,
        passwords: Mutex::new(Vec::new()),
    });
    let mut toolkit = fx.toolkit();
    toolkit.decryptor = Arc::new(LopdfDecryptor::with_external(external.clone()));

    let result = DocumentPreparer::new(fx.config(), toolkit)
        .prepare(upload(pdf, "statement.pdf"), &PrepareOptions::default())
        .await
        .unwrap();

    assert_eq!(result.protection, ProtectionState::RecoveredViaDictionary);
    assert!(!result.is_password_protected);
    assert_eq!(result.status, PipelineStatus::Success);
    assert_eq!(result.page_count, Some(3));
    // Wrong dictionary entries are rejected in process.
    assert_eq!(*external.passwords.lock().unwrap(), vec!["123456".to_string()]);
    assert_eq!(fx.stripper.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn decrypted_copy_without_pages_is_discarded() {
    let fx = Fixture::new();
    let pdf = build_pdf(&[LETTER, LETTER], 8 * 1024, true);
    let mut toolkit = fx.toolkit();
    toolkit.decryptor = Arc::new(HollowDecryptor);

    let result = DocumentPreparer::new(fx.config(), toolkit)
        .prepare(upload(pdf, "locked.pdf"), &PrepareOptions::default())
        .await
        .expect("a hollow decryption must not sink the run");

    assert!(result.log.contains("Discarding unlocked copy"));
    assert_eq!(fx.stripper.calls.load(Ordering::SeqCst), 1);
    assert_eq!(result.protection, ProtectionState::Irrecoverable);
    assert_eq!(result.page_count, Some(2));
    assert_eq!(delivered_info(&result).page_count(), 2);
    assert!(fx.leftovers().is_empty(), "leaked: {:?}", fx.leftovers());
}

#[tokio::test]
async fn disabled_password_removal_leaves_protection_alone() {
    let mut fx = Fixture::new();
    fx.decryptor = Arc::new(FakeDecryptor::new(Some("")));
    let pdf = build_pdf(&[LETTER], 8 * 1024, true);
    let options = PrepareOptions::builder()
        .force_password_removal(false)
        .build()
        .unwrap();

    let result = fx
        .preparer()
        .prepare(upload(pdf, "locked.pdf"), &options)
        .await
        .unwrap();

    assert!(fx.decryptor.tried().is_empty());
    assert_eq!(result.protection, ProtectionState::Skipped);
    assert!(result.is_password_protected);
    assert_eq!(result.status, PipelineStatus::SuccessWithProtection);
}

// ── Geometry ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn conforming_pages_skip_geometry_in_either_orientation() {
    let fx = Fixture::new();
    // 600x800 is within 5% of letter in both dimensions.
    let pdf = build_pdf(&[LETTER, LETTER_LANDSCAPE, (600, 800)], 8 * 1024, false);

    let result = fx
        .preparer()
        .prepare(upload(pdf, "mixed.pdf"), &PrepareOptions::default())
        .await
        .unwrap();

    assert_eq!(fx.fitter.calls.load(Ordering::SeqCst), 0);
    assert!(result.log.contains("skipping geometry standardization"));
    assert_eq!(result.report(Stage::Geometry).unwrap().status, StageStatus::Skipped);
    assert_eq!(
        page_dims(&delivered_info(&result)),
        vec![LETTER, LETTER_LANDSCAPE, (600, 800)]
    );
}

#[tokio::test]
async fn off_size_pages_are_fitted_to_letter() {
    let fx = Fixture::new();
    let pdf = build_pdf(&[A4, A4], 8 * 1024, false);

    let result = fx
        .preparer()
        .prepare(upload(pdf, "a4.pdf"), &PrepareOptions::default())
        .await
        .unwrap();

    assert_eq!(fx.fitter.calls.load(Ordering::SeqCst), 1);
    assert_eq!(result.report(Stage::Geometry).unwrap().status, StageStatus::Completed);
    assert_eq!(page_dims(&delivered_info(&result)), vec![LETTER, LETTER]);
}

#[tokio::test]
async fn fitter_failure_keeps_the_previous_document() {
    let mut fx = Fixture::new();
    fx.fitter = Arc::new(FakeFitter::new(true));
    let pdf = build_pdf(&[A4], 8 * 1024, false);

    let result = fx
        .preparer()
        .prepare(upload(pdf, "a4.pdf"), &PrepareOptions::default())
        .await
        .unwrap();

    assert_eq!(result.report(Stage::Geometry).unwrap().status, StageStatus::SoftFailure);
    assert!(result.log.contains("keeping previous document"));
    assert_eq!(page_dims(&delivered_info(&result)), vec![A4]);
    assert!(fx.leftovers().is_empty());
}

#[tokio::test]
async fn undersized_intermediate_document_aborts() {
    let fx = Fixture::new();
    // Below the 1000-byte validity threshold once passed through.
    let pdf = build_pdf(&[LETTER], 0, false);
    assert!(pdf.len() < 1000);

    let err = fx
        .preparer()
        .prepare(upload(pdf, "tiny.pdf"), &PrepareOptions::default())
        .await
        .unwrap_err();

    assert!(matches!(err, PrepError::CorruptedIntermediateDocument { .. }), "{err}");
    assert_eq!(err.kind(), ErrorKind::CorruptedIntermediate);
    assert!(fx.leftovers().is_empty());
}

// ── Compression ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn first_preset_within_budget_is_accepted() {
    let mut fx = Fixture::new();
    fx.compressor = Arc::new(FakeCompressor::new(&[
        (CompressionPreset::Ebook, Behavior::Exact(3 * MB)),
        (CompressionPreset::Printer, Behavior::Exact(MB / 2)),
        (CompressionPreset::Prepress, Behavior::Exact(MB / 4)),
    ]));
    let pdf = build_pdf(&[LETTER], 4 * MB, false);
    let options = PrepareOptions::builder().max_file_size_mb(1.0).build().unwrap();

    let result = fx
        .preparer()
        .prepare(upload(pdf, "big.pdf"), &options)
        .await
        .unwrap();

    assert_eq!(
        fx.compressor.calls(),
        vec![CompressionPreset::Ebook, CompressionPreset::Printer]
    );
    assert_eq!(result.final_preset, Some(CompressionPreset::Printer));
    assert_eq!(result.compression_trace.len(), 2);
    assert!(!result.compression_trace[0].within_budget);
    assert!(result.compression_trace[1].within_budget);
    assert!(result.size.processed_size_bytes <= MB as u64);
    assert!(result.size_reduction_percent() > 80.0);
}

#[tokio::test]
async fn strongest_preset_is_accepted_when_budget_is_unreachable() {
    let mut fx = Fixture::new();
    fx.compressor = Arc::new(FakeCompressor::new(&[
        (CompressionPreset::Ebook, Behavior::Exact(3 * MB)),
        (CompressionPreset::Printer, Behavior::Exact(5 * MB / 2)),
        (CompressionPreset::Prepress, Behavior::Exact(2 * MB)),
    ]));
    let pdf = build_pdf(&[LETTER], 4 * MB, false);
    let options = PrepareOptions::builder().max_file_size_mb(1.0).build().unwrap();

    let result = fx
        .preparer()
        .prepare(upload(pdf, "big.pdf"), &options)
        .await
        .unwrap();

    assert_eq!(result.final_preset, Some(CompressionPreset::Prepress));
    assert!(result.log.contains("Size budget unreachable"));
    assert_eq!(result.status, PipelineStatus::Success);
    assert!(fx.leftovers().is_empty(), "leaked: {:?}", fx.leftovers());
}

#[tokio::test]
async fn invalid_outputs_move_down_the_ladder() {
    let mut fx = Fixture::new();
    fx.compressor = Arc::new(FakeCompressor::new(&[
        (CompressionPreset::Ebook, Behavior::Tiny),
        (CompressionPreset::Printer, Behavior::Fail),
        (CompressionPreset::Prepress, Behavior::Exact(200 * 1024)),
    ]));
    let pdf = build_pdf(&[LETTER], 600 * 1024, false);

    let result = fx
        .preparer()
        .prepare(upload(pdf, "doc.pdf"), &PrepareOptions::default())
        .await
        .unwrap();

    let validity: Vec<bool> = result.compression_trace.iter().map(|a| a.valid).collect();
    assert_eq!(validity, vec![false, false, true]);
    assert!(result.compression_trace[1].error.is_some());
    assert_eq!(result.final_preset, Some(CompressionPreset::Prepress));
}

#[tokio::test]
async fn smallest_valid_output_wins_when_strongest_preset_fails() {
    let mut fx = Fixture::new();
    fx.compressor = Arc::new(FakeCompressor::new(&[
        (CompressionPreset::Ebook, Behavior::Exact(3 * MB)),
        (CompressionPreset::Printer, Behavior::Exact(2 * MB)),
        (CompressionPreset::Prepress, Behavior::Fail),
    ]));
    let pdf = build_pdf(&[LETTER], 4 * MB, false);
    let options = PrepareOptions::builder().max_file_size_mb(1.0).build().unwrap();

    let result = fx
        .preparer()
        .prepare(upload(pdf, "big.pdf"), &options)
        .await
        .unwrap();

    assert_eq!(result.final_preset, Some(CompressionPreset::Printer));
    assert!(fx.leftovers().is_empty(), "leaked: {:?}", fx.leftovers());
}

#[tokio::test]
async fn all_presets_failing_delivers_the_uncompressed_document() {
    let mut fx = Fixture::new();
    fx.compressor = Arc::new(FakeCompressor::new(&[
        (CompressionPreset::Ebook, Behavior::Fail),
        (CompressionPreset::Printer, Behavior::Fail),
        (CompressionPreset::Prepress, Behavior::Tiny),
    ]));
    let pdf = build_pdf(&[LETTER], 64 * 1024, false);

    let result = fx
        .preparer()
        .prepare(upload(pdf.clone(), "doc.pdf"), &PrepareOptions::default())
        .await
        .unwrap();

    assert_eq!(result.final_preset, None);
    assert_eq!(
        result.report(Stage::Compression).unwrap().status,
        StageStatus::SoftFailure
    );
    assert_eq!(result.delivery.bytes(), Some(&pdf[..]));
    assert_eq!(result.size_reduction_percent(), 0.0);
}

#[tokio::test]
async fn large_jpeg_scan_fits_a_two_megabyte_budget() {
    let mut fx = Fixture::new();
    fx.compressor = Arc::new(FakeCompressor::new(&[
        (CompressionPreset::Screen, Behavior::Exact(3 * MB)),
        (CompressionPreset::Ebook, Behavior::Exact(5 * MB / 2)),
        (CompressionPreset::Printer, Behavior::Exact(3 * MB / 2)),
    ]));
    let jpeg = noisy_image(900, 600, image::ImageFormat::Jpeg);
    let options = PrepareOptions::builder()
        .target_compression(CompressionPreset::Screen)
        .max_file_size_mb(2.0)
        .build()
        .unwrap();

    let result = fx
        .preparer()
        .prepare(upload(jpeg, "scan.jpg"), &options)
        .await
        .unwrap();

    assert_eq!(
        fx.compressor.calls(),
        vec![
            CompressionPreset::Screen,
            CompressionPreset::Ebook,
            CompressionPreset::Printer
        ]
    );
    assert_eq!(result.final_preset, Some(CompressionPreset::Printer));
    assert!(result.size.processed_size_bytes <= 2 * MB as u64);
    assert_eq!(result.page_count, Some(1));
    assert_eq!(result.status, PipelineStatus::Success);
    assert!(!result.is_password_protected);
}

// ── Whole runs ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn rerunning_on_prepared_output_is_a_no_op() {
    let mut fx = Fixture::new();
    fx.compressor = Arc::new(FakeCompressor::new(&[(
        CompressionPreset::Ebook,
        Behavior::Cap(200 * 1024),
    )]));
    let pdf = build_pdf(&[A4, A4, A4], 500 * 1024, false);
    let options = PrepareOptions::default();
    let preparer = fx.preparer();

    let first = preparer
        .prepare(upload(pdf, "a4.pdf"), &options)
        .await
        .unwrap();
    let prepared = first.delivery.bytes().unwrap().to_vec();

    let second = preparer
        .prepare(upload(prepared, "prepared.pdf"), &options)
        .await
        .unwrap();

    assert!(second.size_reduction_percent().abs() < 1.0, "{:?}", second.size);
    assert!(second.log.contains("skipping geometry standardization"));
    assert!(second.log.contains("Document is not password protected"));
    assert_eq!(second.page_count, Some(3));
    assert_eq!(fx.fitter.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn progress_events_follow_stage_order() {
    let fx = Fixture::new();
    let recorder = Arc::new(Recorder::default());
    let config = PipelineConfig::builder()
        .temp_dir(fx.cache_dir())
        .progress_callback(recorder.clone())
        .build()
        .unwrap();
    let preparer = DocumentPreparer::new(config, fx.toolkit());

    preparer
        .prepare(
            upload(build_pdf(&[LETTER], 8 * 1024, false), "a.pdf"),
            &PrepareOptions::default(),
        )
        .await
        .unwrap();

    let mut expected = vec!["start".to_string()];
    for stage in Stage::ALL {
        expected.push(format!("begin:{stage}"));
        if stage == Stage::Compression {
            expected.push("attempt:ebook".to_string());
        }
        expected.push(format!("end:{stage}"));
    }
    expected.push("complete".to_string());
    assert_eq!(recorder.events(), expected);
}

#[tokio::test]
async fn hard_failures_report_run_failed() {
    let fx = Fixture::new();
    let recorder = Arc::new(Recorder::default());
    let config = PipelineConfig::builder()
        .temp_dir(fx.cache_dir())
        .progress_callback(recorder.clone())
        .build()
        .unwrap();
    let preparer = DocumentPreparer::new(config, fx.toolkit());

    let err = preparer
        .prepare(upload(Vec::new(), "empty.pdf"), &PrepareOptions::default())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Input);
    assert_eq!(recorder.events().last().map(String::as_str), Some("failed"));
}

#[tokio::test]
async fn bad_options_are_rejected_before_processing() {
    let fx = Fixture::new();
    let options = PrepareOptions {
        max_file_size_mb: 0.0,
        ..PrepareOptions::default()
    };

    let err = fx
        .preparer()
        .prepare(upload(build_pdf(&[LETTER], 8 * 1024, false), "a.pdf"), &options)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Input);
    assert!(fx.compressor.calls().is_empty());
}

#[tokio::test]
async fn link_delivery_leaves_only_the_published_file() {
    let fx = Fixture::new();
    let options = PrepareOptions::builder()
        .return_mode(ReturnMode::Link)
        .output_filename("Q3 statement")
        .build()
        .unwrap();

    let result = fx
        .preparer()
        .prepare(upload(build_pdf(&[LETTER], 8 * 1024, false), "a.pdf"), &options)
        .await
        .unwrap();

    let Delivery::Link { url, expires_at, path } = &result.delivery else {
        panic!("expected a link delivery");
    };
    assert!(url.starts_with("http://localhost:8000/temp/"), "{url}");
    assert!(url.ends_with("_Q3_statement.pdf"), "{url}");
    assert!(*expires_at > chrono::Utc::now());
    assert!(path.exists());
    let name = path.file_name().unwrap().to_string_lossy().into_owned();
    assert_eq!(fx.leftovers(), vec![name]);
    assert_eq!(result.size.processed_size_bytes, std::fs::metadata(path).unwrap().len());
}

#[tokio::test]
async fn concurrent_runs_do_not_interfere() {
    let fx = Fixture::new();
    let preparer = fx.preparer();
    let options = PrepareOptions::default();

    let (a, b) = tokio::join!(
        preparer.prepare(upload(build_pdf(&[LETTER], 16 * 1024, false), "a.pdf"), &options),
        preparer.prepare(upload(build_pdf(&[A4, A4], 16 * 1024, false), "b.pdf"), &options),
    );

    assert_eq!(a.unwrap().page_count, Some(1));
    assert_eq!(b.unwrap().page_count, Some(2));
    assert!(fx.leftovers().is_empty(), "leaked: {:?}", fx.leftovers());
}

#[tokio::test]
async fn written_delivery_replaces_target_atomically() {
    let fx = Fixture::new();
    let result = fx
        .preparer()
        .prepare(
            upload(build_pdf(&[LETTER], 8 * 1024, false), "a.pdf"),
            &PrepareOptions::default(),
        )
        .await
        .unwrap();

    let out = fx.dir.path().join("out/prepared.pdf");
    pdfprep::write_delivery(&result, &out).await.unwrap();

    assert_eq!(std::fs::read(&out).unwrap(), result.delivery.bytes().unwrap());
    assert!(!out.with_extension("pdf.tmp").exists());
}

// ── Remote sources ───────────────────────────────────────────────────────────

#[tokio::test]
async fn fetch_404_is_a_fetch_error_and_leaves_no_temp_files() {
    let fx = Fixture::new();
    let base = serve_once("404 Not Found", "text/plain", Vec::new()).await;

    let err = fx
        .preparer()
        .prepare(Source::Url(format!("{base}/missing.pdf")), &PrepareOptions::default())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Fetch);
    assert!(err.to_string().contains("404"), "{err}");
    assert!(fx.leftovers().is_empty(), "leaked: {:?}", fx.leftovers());
}

#[tokio::test]
async fn fetched_pdf_is_prepared() {
    let fx = Fixture::new();
    let pdf = build_pdf(&[LETTER, LETTER], 8 * 1024, false);
    let base = serve_once("200 OK", "application/pdf", pdf).await;

    let result = fx
        .preparer()
        .prepare(Source::Url(format!("{base}/download")), &PrepareOptions::default())
        .await
        .unwrap();

    assert_eq!(result.page_count, Some(2));
    assert!(result.log.contains("Downloaded"));
}

#[tokio::test]
async fn non_http_urls_are_input_errors() {
    let fx = Fixture::new();
    let err = fx
        .preparer()
        .prepare(Source::Url("ftp://example.com/a.pdf".into()), &PrepareOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Input);
}
