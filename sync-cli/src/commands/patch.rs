//! Patch command - apply a JSON Patch file to a document.

use std::path::Path;

use anyhow::{Context, Result};
use livesync_core::{apply, apply_validated};
use livesync_types::parse_operations;

use super::{read_json, render};

/// Run the patch command.
///
/// With `validate` the whole sequence is checked against a copy first and
/// nothing is applied on failure. Without it operations apply one by one and
/// a failed `test` stops the sequence with a warning.
pub async fn run(document: &Path, patch: &Path, validate: bool, pretty: bool) -> Result<()> {
    let mut doc = read_json(document).await?;
    let body = read_json(patch).await?;
    let ops = parse_operations(&body)
        .with_context(|| format!("Invalid patch in {}", patch.display()))?;

    if validate {
        apply_validated(&mut doc, &ops).context("Patch rejected")?;
    } else if !apply(&mut doc, &ops, false).context("Patch failed")? {
        tracing::warn!("test operation failed, remaining operations skipped");
    }

    tracing::debug!(operations = ops.len(), "patch applied");
    println!("{}", render(&doc, pretty)?);
    Ok(())
}
