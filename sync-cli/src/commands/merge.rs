//! Merge command - merge a full snapshot into a document.

use std::path::Path;

use anyhow::Result;
use livesync_core::{merge_with, MergeOptions};

use super::{read_json, render};

/// Run the merge command.
pub async fn run(document: &Path, snapshot: &Path, strict: bool, pretty: bool) -> Result<()> {
    let mut doc = read_json(document).await?;
    let src = read_json(snapshot).await?;

    let options = if strict {
        MergeOptions::strict()
    } else {
        MergeOptions::default()
    };
    merge_with(&mut doc, &src, &options);

    println!("{}", render(&doc, pretty)?);
    Ok(())
}
