//! Geometry standardization.
//!
//! A page conforms when both dimensions are within the relative tolerance
//! of the target, in either portrait or landscape orientation. If every page
//! conforms the stage is skipped. Otherwise the page fitter rewrites the
//! whole document onto the target media; a failed or implausibly small
//! result is discarded and the previous document carries on.

use super::{file_size, is_plausible, StageContext, StageOutcome, WorkingDocument};
use crate::config::PageSize;
use crate::output::Stage;
use serde::Serialize;

/// One page's dimensions measured against the target.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PageGeometry {
    pub width_pt: f64,
    pub height_pt: f64,
    pub is_landscape: bool,
    pub matches_target_portrait: bool,
    pub matches_target_landscape: bool,
    pub needs_resize: bool,
}

impl PageGeometry {
    pub fn analyze(page: PageSize, target: PageSize, tolerance: f64) -> Self {
        let portrait = target.portrait();
        let landscape = target.landscape();
        let matches = |t: PageSize| {
            within(page.width_pt, t.width_pt, tolerance) && within(page.height_pt, t.height_pt, tolerance)
        };
        let matches_target_portrait = matches(portrait);
        let matches_target_landscape = matches(landscape);
        Self {
            width_pt: page.width_pt,
            height_pt: page.height_pt,
            is_landscape: page.width_pt > page.height_pt,
            matches_target_portrait,
            matches_target_landscape,
            needs_resize: !(matches_target_portrait || matches_target_landscape),
        }
    }
}

fn within(actual: f64, expected: f64, tolerance: f64) -> bool {
    expected > 0.0 && ((actual - expected).abs() / expected) <= tolerance
}

/// Analyse every page of `pages`.
pub fn analyze_pages(pages: &[PageSize], target: PageSize, tolerance: f64) -> Vec<PageGeometry> {
    pages
        .iter()
        .map(|p| PageGeometry::analyze(*p, target, tolerance))
        .collect()
}

pub async fn run(ctx: &mut StageContext<'_>, document: WorkingDocument) -> StageOutcome {
    let target = ctx.config.target_page;

    if document.page_sizes.is_empty() {
        ctx.log.warn(
            Stage::Geometry,
            "Page geometry unavailable; skipping geometry standardization",
        );
        return StageOutcome::unchanged(document, "page geometry unavailable");
    }

    let analysis = analyze_pages(&document.page_sizes, target, ctx.config.geometry_tolerance);
    let off_size = analysis.iter().filter(|g| g.needs_resize).count();
    if off_size == 0 {
        ctx.log.push(
            Stage::Geometry,
            format!(
                "All {} pages already match {}x{}pt; skipping geometry standardization",
                analysis.len(),
                target.width_pt,
                target.height_pt
            ),
        );
        return StageOutcome::unchanged(document, "all pages conform");
    }

    ctx.log.push(
        Stage::Geometry,
        format!(
            "{} of {} pages need resizing to {}x{}pt",
            off_size,
            analysis.len(),
            target.width_pt,
            target.height_pt
        ),
    );

    let out = match ctx.arena.allocate("fitted", "pdf") {
        Ok(path) => path,
        Err(e) => {
            let reason = format!("Page fitting could not start: {}", e);
            ctx.log
                .warn(Stage::Geometry, format!("{}; keeping previous document", reason));
            return StageOutcome::soft(document, reason);
        }
    };
    if let Err(e) = ctx
        .toolkit
        .fitter
        .fit(&document.path, &out, target, ctx.config.fit_timeout())
        .await
    {
        ctx.arena.release(&out);
        let reason = format!("Page fitting failed: {}", e);
        ctx.log
            .warn(Stage::Geometry, format!("{}; keeping previous document", reason));
        return StageOutcome::soft(document, reason);
    }

    if !is_plausible(&out, ctx.config).await {
        let size = file_size(&out).await.unwrap_or(0);
        ctx.arena.release(&out);
        let reason = format!("Page fitting produced an implausibly small file ({} bytes)", size);
        ctx.log
            .warn(Stage::Geometry, format!("{}; keeping previous document", reason));
        return StageOutcome::soft(document, reason);
    }

    let size = file_size(&out).await.unwrap_or(0);
    let info = ctx.inspect_quietly(Stage::Geometry, &out).await;
    let mut next = document.successor(out, size, info.as_ref());
    if info.is_none() {
        next.page_count = document.page_count;
        next.page_sizes = vec![target; document.page_sizes.len()];
    }
    ctx.log.push(
        Stage::Geometry,
        format!("Resized pages to {}x{}pt ({} bytes)", target.width_pt, target.height_pt, size),
    );
    StageOutcome::advanced(next, format!("fitted {} pages", off_size))
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOL: f64 = 0.05;

    fn page(w: f64, h: f64) -> PageSize {
        PageSize {
            width_pt: w,
            height_pt: h,
        }
    }

    #[test]
    fn exact_letter_conforms_both_ways() {
        let g = PageGeometry::analyze(PageSize::LETTER, PageSize::LETTER, TOL);
        assert!(g.matches_target_portrait && !g.needs_resize && !g.is_landscape);
        let g = PageGeometry::analyze(page(792.0, 612.0), PageSize::LETTER, TOL);
        assert!(g.matches_target_landscape && !g.needs_resize && g.is_landscape);
    }

    #[test]
    fn a4_is_off_size_at_five_percent() {
        // 595/612 = 2.8% narrower, 842/792 = 6.3% taller
        let g = PageGeometry::analyze(PageSize::A4, PageSize::LETTER, TOL);
        assert!(g.needs_resize);
        let g = PageGeometry::analyze(PageSize::A4, PageSize::LETTER, 0.07);
        assert!(!g.needs_resize);
    }

    #[test]
    fn pages_just_inside_tolerance_conform() {
        let g = PageGeometry::analyze(page(612.0 * 1.049, 792.0 * 0.951), PageSize::LETTER, TOL);
        assert!(!g.needs_resize);
        let g = PageGeometry::analyze(page(612.0 * 1.06, 792.0), PageSize::LETTER, TOL);
        assert!(g.needs_resize);
    }

    #[test]
    fn mixed_document_flags_only_offenders() {
        let pages = [PageSize::LETTER, page(1224.0, 792.0), page(792.0, 612.0)];
        let analysis = analyze_pages(&pages, PageSize::LETTER, TOL);
        let flags: Vec<bool> = analysis.iter().map(|g| g.needs_resize).collect();
        assert_eq!(flags, vec![false, true, false]);
    }

    #[test]
    fn degenerate_page_needs_resize() {
        let g = PageGeometry::analyze(page(0.0, 0.0), PageSize::LETTER, TOL);
        assert!(g.needs_resize);
    }
}
