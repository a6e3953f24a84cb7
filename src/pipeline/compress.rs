//! Progressive compression.
//!
//! Walks the preset ladder from the requested preset towards the strongest:
//!
//! 1. compress at the current preset;
//! 2. an invalid output (missing, or at/below the validity threshold) or a
//!    compressor error moves on to the next preset;
//! 3. a valid output is accepted when it fits the budget, or when the preset
//!    is the last one on the ladder.
//!
//! When the last preset yields nothing valid, the smallest valid output seen
//! on the way is delivered instead; when no preset produced anything valid,
//! the last-known-good document is delivered unchanged.

use super::{file_size, StageContext, StageOutcome, WorkingDocument};
use crate::config::CompressionPreset;
use crate::output::{CompressionAttempt, Stage};
use std::path::PathBuf;

const MB: f64 = 1024.0 * 1024.0;

struct Candidate {
    preset: CompressionPreset,
    path: PathBuf,
    size: u64,
}

pub async fn run(ctx: &mut StageContext<'_>, document: WorkingDocument) -> StageOutcome {
    let budget = ctx.options.max_file_size_bytes();
    let ladder = ctx.options.target_compression.ladder_from();
    ctx.log.push(
        Stage::Compression,
        format!(
            "Compressing from preset {} with a {:.2} MB budget ({} bytes before)",
            ctx.options.target_compression,
            budget as f64 / MB,
            document.size_bytes
        ),
    );

    let mut smallest_valid: Option<Candidate> = None;

    for (index, &preset) in ladder.iter().enumerate() {
        let is_last = index + 1 == ladder.len();
        let out = match ctx.arena.allocate(&format!("compressed_{}", preset), "pdf") {
            Ok(path) => path,
            Err(e) => {
                ctx.log.warn(
                    Stage::Compression,
                    format!("Preset {} could not start: {}; trying next preset", preset, e),
                );
                continue;
            }
        };

        let attempt = match ctx
            .toolkit
            .compressor
            .compress(&document.path, &out, preset, ctx.config.compress_timeout())
            .await
        {
            Ok(()) => {
                let size = file_size(&out).await;
                let valid = size.is_some_and(|s| s > ctx.config.min_valid_file_bytes);
                CompressionAttempt {
                    preset,
                    size_bytes: size,
                    valid,
                    within_budget: valid && size.is_some_and(|s| s <= budget),
                    error: None,
                }
            }
            Err(e) => CompressionAttempt {
                preset,
                size_bytes: None,
                valid: false,
                within_budget: false,
                error: Some(e.to_string()),
            },
        };
        record(ctx, attempt.clone());

        if !attempt.valid {
            ctx.arena.release(&out);
            let why = match &attempt.error {
                Some(e) => format!("failed: {}", e),
                None => format!(
                    "produced an invalid file ({} bytes)",
                    attempt.size_bytes.unwrap_or(0)
                ),
            };
            ctx.log.warn(
                Stage::Compression,
                format!("Preset {} {}; trying next preset", preset, why),
            );
            continue;
        }

        let size = attempt.size_bytes.unwrap_or(0);
        if attempt.within_budget || is_last {
            if attempt.within_budget {
                ctx.log.push(
                    Stage::Compression,
                    format!(
                        "Accepted preset {}: {:.2} MB is within the budget",
                        preset,
                        size as f64 / MB
                    ),
                );
            } else {
                ctx.log.warn(
                    Stage::Compression,
                    format!(
                        "Size budget unreachable; accepting strongest preset {} at {:.2} MB",
                        preset,
                        size as f64 / MB
                    ),
                );
            }
            if let Some(previous) = smallest_valid.take() {
                ctx.arena.release(&previous.path);
            }
            return accept(ctx, &document, preset, out, size).await;
        }

        ctx.log.push(
            Stage::Compression,
            format!(
                "Preset {} gave {:.2} MB, above the {:.2} MB budget",
                preset,
                size as f64 / MB,
                budget as f64 / MB
            ),
        );
        let smaller = smallest_valid.as_ref().map_or(true, |best| size < best.size);
        if smaller {
            let candidate = Candidate {
                preset,
                path: out,
                size,
            };
            if let Some(previous) = smallest_valid.replace(candidate) {
                ctx.arena.release(&previous.path);
            }
        } else {
            ctx.arena.release(&out);
        }
    }

    if let Some(best) = smallest_valid {
        ctx.log.warn(
            Stage::Compression,
            format!(
                "Strongest preset gave no valid output; using smallest valid output from preset {}",
                best.preset
            ),
        );
        return accept(ctx, &document, best.preset, best.path, best.size).await;
    }

    ctx.final_preset = None;
    let reason = "All compression presets failed; delivering the uncompressed document";
    ctx.log.warn(Stage::Compression, reason);
    StageOutcome::soft(document, reason)
}

fn record(ctx: &mut StageContext<'_>, attempt: CompressionAttempt) {
    if let Some(cb) = ctx.progress {
        cb.on_compression_attempt(&attempt);
    }
    ctx.compression_trace.push(attempt);
}

async fn accept(
    ctx: &mut StageContext<'_>,
    document: &WorkingDocument,
    preset: CompressionPreset,
    path: PathBuf,
    size: u64,
) -> StageOutcome {
    ctx.final_preset = Some(preset);
    let info = ctx.inspect_quietly(Stage::Compression, &path).await;
    let next = document.successor(path, size, info.as_ref());
    StageOutcome::advanced(next, format!("compressed with preset {}", preset))
}
