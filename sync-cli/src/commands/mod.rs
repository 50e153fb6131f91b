//! CLI command implementations.

pub mod merge;
pub mod patch;
pub mod watch;

use std::path::Path;

use anyhow::{Context, Result};
use serde_json::Value;

/// Read and parse a JSON file.
pub async fn read_json(path: &Path) -> Result<Value> {
    let text = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("Invalid JSON in {}", path.display()))
}

/// Render a document for stdout.
pub fn render(value: &Value, pretty: bool) -> Result<String> {
    let text = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn render_compact_and_pretty() {
        let value = json!({"a": [1, 2]});
        assert_eq!(render(&value, false).unwrap(), r#"{"a":[1,2]}"#);
        assert!(render(&value, true).unwrap().contains('\n'));
    }

    #[tokio::test]
    async fn read_json_reports_bad_input() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.json");
        tokio::fs::write(&path, "{not json").await.unwrap();

        let err = read_json(&path).await.unwrap_err();
        assert!(err.to_string().contains("Invalid JSON"));
    }
}
