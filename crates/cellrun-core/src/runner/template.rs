//! Source composition.

use std::path::Path;

use uuid::Uuid;

use crate::language::{LanguageSpec, RunnerKind};

/// Supplies a setup snippet that connects a program to the host's shared
/// data bridge. Spliced into the preamble of the primary language only.
pub trait BridgeProvider: Send + Sync {
    /// Snippet for `language`, if the bridge supports it.
    fn snippet(&self, language: &str) -> Option<String>;
}

/// Wrap `source` with the language's preamble and epilogue.
///
/// The user's source is inserted verbatim; placeholders are expanded only in
/// the templates.
pub fn compose_source(
    spec: &LanguageSpec,
    source: &str,
    workspace: &Path,
    run_id: Uuid,
    bridge: Option<&str>,
) -> String {
    let RunnerKind::Interpreted(config) = &spec.runner else {
        return source.to_string();
    };
    if config.preamble.is_none() && config.epilogue.is_none() {
        return source.to_string();
    }

    let run_id = run_id.simple().to_string();
    let workspace = quote(workspace);
    let expand = |template: &str| {
        template
            .replace("@workspace@", &workspace)
            .replace("@run_id@", &run_id)
            .replace("@bridge@", bridge.unwrap_or(""))
    };

    let mut composed = String::with_capacity(source.len() + 512);
    if let Some(preamble) = config.preamble {
        composed.push_str(&expand(preamble));
        composed.push('\n');
    }
    composed.push_str(source);
    composed.push('\n');
    if let Some(epilogue) = config.epilogue {
        composed.push_str(&expand(epilogue));
    }
    composed
}

/// Double-quoted string literal for a path, valid in Python and R.
fn quote(path: &Path) -> String {
    let raw = path.to_string_lossy();
    serde_json::to_string(raw.as_ref()).unwrap_or_else(|_| format!("\"{raw}\""))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::language;

    #[test]
    fn test_plain_language_untouched() {
        let spec = language::lookup("ruby").unwrap();
        let composed = compose_source(spec, "puts 1", Path::new("/ws"), Uuid::nil(), None);
        assert_eq!(composed, "puts 1");
    }

    #[test]
    fn test_python_wrapping() {
        let spec = language::lookup("python").unwrap();
        let run_id = Uuid::new_v4();
        let composed = compose_source(
            spec,
            "print('@run_id@')",
            Path::new("/tmp/my ws"),
            run_id,
            Some("import bridge"),
        );

        assert!(composed.contains("chdir(\"/tmp/my ws\")"));
        assert!(composed.contains("import bridge"));
        assert!(composed.contains(&format!("plot_{}_", run_id.simple())));
        // The cell source is not expanded
        assert!(composed.contains("print('@run_id@')"));
        assert!(!composed.contains("@workspace@"));
        assert!(!composed.contains("@bridge@"));
    }

    #[test]
    fn test_compiled_untouched() {
        let spec = language::lookup("c").unwrap();
        let composed = compose_source(spec, "int main(){}", Path::new("/ws"), Uuid::nil(), None);
        assert_eq!(composed, "int main(){}");
    }
}
