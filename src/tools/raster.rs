//! Image → single-page PDF layout.
//!
//! The decoded raster is normalised to RGB8, the page is turned to match the
//! image's aspect ratio, and the image is scaled to fit inside the page
//! margins and centred. Decoding and PDF serialisation are CPU-bound, so the
//! backend runs them under `spawn_blocking`.

use super::ImageRasterizer;
use crate::config::PageSize;
use crate::error::ToolError;
use async_trait::async_trait;
use printpdf::{
    Mm, Op, PdfDocument, PdfPage, PdfSaveOptions, PdfWarnMsg, Pt, RawImage, RawImageData,
    RawImageFormat, XObjectTransform,
};
use serde::Serialize;
use tracing::debug;

/// Page orientation for a laid-out image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Orientation {
    Portrait,
    Landscape,
    /// Landscape for wider-than-tall images, portrait otherwise.
    MatchImage,
}

impl Orientation {
    /// Concrete orientation for an image of `width` × `height` pixels.
    pub fn resolve(self, width: u32, height: u32) -> Orientation {
        match self {
            Orientation::MatchImage if width > height => Orientation::Landscape,
            Orientation::MatchImage => Orientation::Portrait,
            other => other,
        }
    }

    /// `page` turned to this orientation. `MatchImage` leaves it as given.
    pub fn apply(self, page: PageSize) -> PageSize {
        match self {
            Orientation::Portrait => page.portrait(),
            Orientation::Landscape => page.landscape(),
            Orientation::MatchImage => page,
        }
    }
}

/// Where an image lands on its page, in points from the bottom-left corner.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Placement {
    pub page: PageSize,
    pub x_pt: f64,
    pub y_pt: f64,
    pub scale: f64,
    pub width_pt: f64,
    pub height_pt: f64,
}

/// Fit a `width_px` × `height_px` image inside `page` minus `margin_pt` on
/// every side, preserving aspect ratio, centred. One pixel maps to one point
/// before scaling.
pub fn place(width_px: u32, height_px: u32, page: PageSize, margin_pt: f64) -> Placement {
    let w = f64::from(width_px.max(1));
    let h = f64::from(height_px.max(1));
    // Margins larger than the page collapse to zero rather than inverting the box.
    let margin = margin_pt.min(page.width_pt / 2.0).min(page.height_pt / 2.0).max(0.0);
    let box_w = (page.width_pt - 2.0 * margin).max(1.0);
    let box_h = (page.height_pt - 2.0 * margin).max(1.0);
    let scale = (box_w / w).min(box_h / h);
    let width_pt = w * scale;
    let height_pt = h * scale;
    Placement {
        page,
        x_pt: (page.width_pt - width_pt) / 2.0,
        y_pt: (page.height_pt - height_pt) / 2.0,
        scale,
        width_pt,
        height_pt,
    }
}

fn pt_to_mm(pt: f64) -> Mm {
    Mm((pt * 25.4 / 72.0) as f32)
}

/// Decode `image_bytes` and render them onto a single page.
pub fn image_to_pdf(
    image_bytes: &[u8],
    page: PageSize,
    orientation: Orientation,
    margin_pt: f64,
) -> Result<Vec<u8>, ToolError> {
    let decoded = image::load_from_memory(image_bytes)
        .map_err(|e| ToolError::engine("image decoder", e))?;
    let (width, height) = (decoded.width(), decoded.height());
    let page = orientation.resolve(width, height).apply(page);
    let placement = place(width, height, page, margin_pt);

    let rgb = decoded.to_rgb8();
    let raw = RawImage {
        pixels: RawImageData::U8(rgb.into_raw()),
        width: width as usize,
        height: height as usize,
        data_format: RawImageFormat::RGB8,
        tag: Vec::new(),
    };

    let mut doc = PdfDocument::new("Prepared image");
    let xobject_id = doc.add_image(&raw);
    let ops = vec![Op::UseXobject {
        id: xobject_id,
        transform: XObjectTransform {
            translate_x: Some(Pt(placement.x_pt as f32)),
            translate_y: Some(Pt(placement.y_pt as f32)),
            scale_x: Some(placement.scale as f32),
            scale_y: Some(placement.scale as f32),
            dpi: Some(72.0),
            rotate: None,
        },
    }];
    doc.with_pages(vec![PdfPage::new(
        pt_to_mm(page.width_pt),
        pt_to_mm(page.height_pt),
        ops,
    )]);

    let mut warnings: Vec<PdfWarnMsg> = Vec::new();
    let bytes = doc.save(&PdfSaveOptions::default(), &mut warnings);
    debug!(
        width,
        height,
        scale = placement.scale,
        page_w = page.width_pt,
        page_h = page.height_pt,
        warnings = warnings.len(),
        "Image laid out on page"
    );
    Ok(bytes)
}

/// [`ImageRasterizer`] backed by `image` + `printpdf`.
pub struct PrintpdfRasterizer;

#[async_trait]
impl ImageRasterizer for PrintpdfRasterizer {
    async fn rasterize(
        &self,
        image: &[u8],
        page: PageSize,
        orientation: Orientation,
        margin_pt: f64,
    ) -> Result<Vec<u8>, ToolError> {
        let image = image.to_vec();
        tokio::task::spawn_blocking(move || image_to_pdf(&image, page, orientation, margin_pt))
            .await
            .map_err(|e| ToolError::engine("image layout", format!("task panicked: {}", e)))?
    }
}
