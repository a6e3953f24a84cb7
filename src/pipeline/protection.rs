//! Protection removal.
//!
//! ```text
//! Unknown ──► NotEncrypted
//!    │
//!    └──► Encrypted ──► RecoveredViaDictionary   (a dictionary password opened it)
//!                  ├──► RecoveredViaForcedStrip  (the strip tool rewrote it)
//!                  └──► Irrecoverable            (continue with the protected file)
//! ```
//!
//! This stage never hard-fails: an irrecoverable document is a soft failure
//! that surfaces as `is_password_protected` on the result.

use super::{is_plausible, StageContext, StageOutcome, WorkingDocument};
use crate::error::ToolError;
use crate::output::{ProtectionState, Stage};
use tracing::debug;

pub async fn run(ctx: &mut StageContext<'_>, document: WorkingDocument) -> StageOutcome {
    if !ctx.options.force_password_removal {
        ctx.protection = ProtectionState::Skipped;
        ctx.log
            .push(Stage::ProtectionRemoval, "Password removal disabled; skipping");
        return StageOutcome::unchanged(document, "password removal disabled");
    }

    if !document.encrypted {
        ctx.protection = ProtectionState::NotEncrypted;
        ctx.log
            .push(Stage::ProtectionRemoval, "Document is not password protected");
        return StageOutcome::unchanged(document, "not protected");
    }

    ctx.log.push(
        Stage::ProtectionRemoval,
        "Document is encrypted; trying common passwords",
    );

    if let Some(decrypted) = try_dictionary(ctx, &document).await {
        ctx.protection = ProtectionState::RecoveredViaDictionary;
        ctx.log.push(
            Stage::ProtectionRemoval,
            "Successfully decrypted with common password",
        );
        return StageOutcome::advanced(decrypted, "decrypted with a dictionary password");
    }

    match force_strip(ctx, &document).await {
        Ok(stripped) => {
            ctx.protection = ProtectionState::RecoveredViaForcedStrip;
            ctx.log.push(
                Stage::ProtectionRemoval,
                "Removed protection with forced strip",
            );
            StageOutcome::advanced(stripped, "protection stripped without password")
        }
        Err(reason) => {
            ctx.protection = ProtectionState::Irrecoverable;
            ctx.log.warn(
                Stage::ProtectionRemoval,
                format!("Could not remove protection ({}); continuing with protected document", reason),
            );
            StageOutcome::soft(document, reason)
        }
    }
}

/// First dictionary password that yields an unencrypted copy.
async fn try_dictionary(ctx: &mut StageContext<'_>, document: &WorkingDocument) -> Option<WorkingDocument> {
    let passwords = ctx.config.password_dictionary.clone();
    for (attempt, password) in passwords.iter().enumerate() {
        let out = match ctx.arena.allocate("decrypted", "pdf") {
            Ok(path) => path,
            Err(e) => {
                ctx.log.warn(
                    Stage::ProtectionRemoval,
                    format!("Password attempts unavailable: {}", e),
                );
                return None;
            }
        };
        match ctx
            .toolkit
            .decryptor
            .try_decrypt(&document.path, password, &out)
            .await
        {
            Ok(true) => {
                if let Some(next) = accept_unencrypted(ctx, document, out.clone()).await {
                    debug!("Dictionary entry #{} opened the document", attempt + 1);
                    return Some(next);
                }
                ctx.arena.release(&out);
            }
            Ok(false) => ctx.arena.release(&out),
            Err(e) => {
                // The engine cannot open the file at all; other passwords fare no better.
                ctx.arena.release(&out);
                ctx.log.warn(
                    Stage::ProtectionRemoval,
                    format!("Password attempts unavailable: {}", e),
                );
                return None;
            }
        }
    }
    ctx.log.push(
        Stage::ProtectionRemoval,
        format!("None of {} common passwords worked", passwords.len()),
    );
    None
}

async fn force_strip(ctx: &mut StageContext<'_>, document: &WorkingDocument) -> Result<WorkingDocument, String> {
    let out = ctx
        .arena
        .allocate("stripped", "pdf")
        .map_err(|e| format!("forced strip could not start: {}", e))?;
    match ctx
        .toolkit
        .stripper
        .strip(&document.path, &out, ctx.config.strip_timeout())
        .await
    {
        Ok(()) => {}
        Err(ToolError::NotInstalled { program }) => {
            ctx.arena.release(&out);
            return Err(format!("forced-strip tool {} is unavailable", program));
        }
        Err(e) => {
            ctx.arena.release(&out);
            return Err(format!("forced strip failed: {}", e));
        }
    }

    if !is_plausible(&out, ctx.config).await {
        ctx.arena.release(&out);
        return Err("forced strip produced no usable output".to_string());
    }
    match accept_unencrypted(ctx, document, out.clone()).await {
        Some(next) => Ok(next),
        None => {
            ctx.arena.release(&out);
            Err("forced strip output is still encrypted".to_string())
        }
    }
}

/// Wrap `out` as the successor document if it is readable-or-unknown, no
/// longer encrypted, and still has the pages of `document`.
async fn accept_unencrypted(
    ctx: &mut StageContext<'_>,
    document: &WorkingDocument,
    out: std::path::PathBuf,
) -> Option<WorkingDocument> {
    let size = super::file_size(&out).await.filter(|s| *s > 0)?;
    let info = ctx.inspect_quietly(Stage::ProtectionRemoval, &out).await;
    if let Some(info) = &info {
        if info.encrypted {
            return None;
        }
        if let Some(reason) = lost_pages(document.page_count, info.page_count()) {
            ctx.log.warn(
                Stage::ProtectionRemoval,
                format!("Discarding unlocked copy: {}", reason),
            );
            return None;
        }
    }
    let mut next = document.successor(out, size, info.as_ref());
    next.encrypted = false;
    if info.is_none() {
        // Geometry is unknown; keep what the encrypted original told us.
        next.page_count = document.page_count;
        next.page_sizes = document.page_sizes.clone();
    }
    Some(next)
}

/// Why an unlocked copy with `unlocked` pages cannot replace a document
/// known to have `original` (zero when the encryption hid the page tree).
fn lost_pages(original: Option<usize>, unlocked: usize) -> Option<String> {
    match original {
        _ if unlocked == 0 => Some("it has no pages".to_string()),
        Some(expected) if expected > 0 && expected != unlocked => Some(format!(
            "it has {} pages, the original has {}",
            unlocked, expected
        )),
        _ => None,
    }
}
