//! Output protocol parsing.
//!
//! Runners return plain captured text. Two text conventions let a program
//! hand back more than text without an RPC layer:
//!
//! - **Image markers**: a line containing `[IMAGE:<file>]` refers to an image
//!   written into the workspace. Markers are always stripped; the reference
//!   is recorded only if the file exists.
//! - **Structured handoff**: if the whole output is a single JSON object
//!   `{"__is_table__": true, "path": "<string>"}`, the text is discarded and
//!   the path becomes the cell's structured-data reference. A handoff is
//!   never scanned for image markers.
//!
//! Both passes fail open to plain text. Neither convention is versioned or
//! escaped, so ordinary output that happens to match them is misclassified.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Discriminator key of the structured handoff envelope.
pub const HANDOFF_KEY: &str = "__is_table__";

static IMAGE_MARKER: OnceLock<Regex> = OnceLock::new();

fn image_marker() -> &'static Regex {
    IMAGE_MARKER.get_or_init(|| Regex::new(r"\[IMAGE:(.+?)\]").expect("Invalid image marker regex"))
}

/// Classified result of a run, written once into a cell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ClassifiedOutput {
    /// Plain text.
    Text { text: String },
    /// Text plus images that exist in the workspace.
    TextWithImages { text: String, images: Vec<PathBuf> },
    /// Reference to externally stored structured data.
    StructuredHandoff { path: PathBuf },
}

impl ClassifiedOutput {
    /// Plain text output.
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// Text to surface (empty for a structured handoff).
    pub fn as_text(&self) -> &str {
        match self {
            Self::Text { text } | Self::TextWithImages { text, .. } => text,
            Self::StructuredHandoff { .. } => "",
        }
    }

    /// Image references.
    pub fn images(&self) -> &[PathBuf] {
        match self {
            Self::TextWithImages { images, .. } => images,
            _ => &[],
        }
    }

    /// Structured-data reference.
    pub fn structured(&self) -> Option<&Path> {
        match self {
            Self::StructuredHandoff { path } => Some(path),
            _ => None,
        }
    }
}

/// Classify captured output. Relative image names resolve against
/// `workspace`.
pub fn classify(raw: &str, workspace: &Path) -> ClassifiedOutput {
    if let Some(path) = parse_handoff(raw) {
        return ClassifiedOutput::StructuredHandoff { path };
    }

    let (text, images) = extract_images(raw, workspace);
    if images.is_empty() {
        ClassifiedOutput::Text { text }
    } else {
        ClassifiedOutput::TextWithImages { text, images }
    }
}

/// Parse the structured handoff envelope. The whole text must be one JSON
/// object with the discriminator set to `true` and a string `path`.
pub fn parse_handoff(raw: &str) -> Option<PathBuf> {
    let trimmed = raw.trim();
    if !trimmed.starts_with('{') {
        return None;
    }

    let object: serde_json::Map<String, Value> = serde_json::from_str(trimmed).ok()?;
    if object.get(HANDOFF_KEY) != Some(&Value::Bool(true)) {
        return None;
    }
    match object.get("path") {
        Some(Value::String(path)) => Some(PathBuf::from(path)),
        _ => None,
    }
}

/// Strip image markers, returning the remaining text and the references
/// whose files exist.
fn extract_images(raw: &str, workspace: &Path) -> (String, Vec<PathBuf>) {
    let marker = image_marker();
    if !marker.is_match(raw) {
        return (raw.trim_end_matches(['\n', '\r']).to_string(), Vec::new());
    }

    let mut images = Vec::new();
    let mut lines = Vec::new();

    for line in raw.lines() {
        if !marker.is_match(line) {
            lines.push(line.to_string());
            continue;
        }

        for capture in marker.captures_iter(line) {
            let name = capture[1].trim();
            let path = resolve(name, workspace);
            if path.is_file() {
                images.push(path);
            } else {
                tracing::debug!("Image marker refers to missing file {}", path.display());
            }
        }

        let rest = marker.replace_all(line, "");
        if !rest.trim().is_empty() {
            lines.push(rest.into_owned());
        }
    }

    let text = lines.join("\n").trim_end_matches(['\n', '\r']).to_string();
    (text, images)
}

fn resolve(name: &str, workspace: &Path) -> PathBuf {
    let path = Path::new(name);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        workspace.join(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_plain_text() {
        let out = classify("hello\nworld\n", Path::new("/nonexistent"));
        assert_eq!(out, ClassifiedOutput::text("hello\nworld"));
    }

    #[test]
    fn test_existing_image_marker() {
        let temp = TempDir::new().unwrap();
        let image = temp.path().join("output_0.png");
        fs::write(&image, b"png").unwrap();

        let out = classify("done\n[IMAGE:output_0.png]\n", temp.path());
        assert_eq!(out.as_text(), "done");
        assert_eq!(out.images(), &[image]);
    }

    #[test]
    fn test_missing_image_marker_is_stripped() {
        let temp = TempDir::new().unwrap();

        let out = classify("done\n[IMAGE:output_0.png]\n", temp.path());
        assert_eq!(out, ClassifiedOutput::text("done"));
        assert!(out.images().is_empty());
    }

    #[test]
    fn test_marker_inside_line() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("a.png"), b"png").unwrap();
        fs::write(temp.path().join("b.png"), b"png").unwrap();

        let out = classify("plots: [IMAGE:a.png] and [IMAGE:b.png]\nend", temp.path());
        assert_eq!(out.as_text(), "plots:  and \nend");
        assert_eq!(out.images().len(), 2);
    }

    #[test]
    fn test_structured_handoff() {
        let out = classify(r#"{"__is_table__":true,"path":"/tmp/x.parquet"}"#, Path::new("/ws"));
        assert_eq!(out.as_text(), "");
        assert_eq!(out.structured(), Some(Path::new("/tmp/x.parquet")));
    }

    #[test]
    fn test_handoff_with_trailing_newline() {
        let out = classify("{\"__is_table__\": true, \"path\": \"t.csv\"}\n", Path::new("/ws"));
        assert_eq!(out.structured(), Some(Path::new("t.csv")));
    }

    #[test]
    fn test_handoff_not_scanned_for_markers() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("p.png"), b"png").unwrap();

        let raw = r#"{"__is_table__":true,"path":"[IMAGE:p.png]"}"#;
        let out = classify(raw, temp.path());
        assert_eq!(out.structured(), Some(Path::new("[IMAGE:p.png]")));
        assert!(out.images().is_empty());
    }

    #[test]
    fn test_near_miss_envelopes_stay_text() {
        let cases = [
            r#"{"__is_table__":false,"path":"/tmp/x"}"#,
            r#"{"__is_table__":true,"path":42}"#,
            r#"{"__is_table__":true}"#,
            r#"[true, "/tmp/x"]"#,
            "result: {\"__is_table__\":true,\"path\":\"/tmp/x\"}",
            r#"{"__is_table__":true,"path":"/tmp/x"} trailing"#,
        ];
        for raw in cases {
            let out = classify(raw, Path::new("/ws"));
            assert!(out.structured().is_none(), "misclassified {raw}");
            assert_eq!(out.as_text(), raw);
        }
    }
}
