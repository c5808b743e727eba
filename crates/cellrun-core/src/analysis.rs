//! Lightweight static analysis of cell source.
//!
//! Runs before an auto-run is dispatched. It only looks at import lines, so
//! it is cheap enough to run on every settled edit:
//! - which third-party packages a cell pulls in
//! - whether it uses a GUI framework (such programs block waiting for a
//!   window and are not auto-run)

use std::sync::OnceLock;

use regex::Regex;
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};

use crate::language;

/// Result of analysing one cell.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Analysis {
    /// Canonical language tag, if the language is known.
    pub language: Option<String>,
    /// Imported top-level packages, in first-seen order.
    pub packages: Vec<String>,
    /// GUI framework in use, if any.
    pub gui_framework: Option<String>,
}

impl Analysis {
    /// True if the cell opens a GUI and must not be auto-run.
    pub fn blocks_auto_run(&self) -> bool {
        self.gui_framework.is_some()
    }
}

/// GUI frameworks by language: (package prefix, display name).
const PYTHON_GUI: &[(&str, &str)] = &[
    ("tkinter", "tkinter"),
    ("Tkinter", "tkinter"),
    ("PyQt5", "PyQt"),
    ("PyQt6", "PyQt"),
    ("PySide2", "PySide"),
    ("PySide6", "PySide"),
    ("wx", "wxPython"),
    ("kivy", "kivy"),
    ("pygame", "pygame"),
    ("turtle", "turtle"),
];
const JS_GUI: &[(&str, &str)] = &[("electron", "electron")];
const RUST_GUI: &[(&str, &str)] = &[("fltk", "fltk"), ("egui", "egui"), ("eframe", "egui"), ("iced", "iced")];
const GO_GUI: &[(&str, &str)] = &[("fyne.io/fyne", "fyne")];

/// Analyse `source` written in `language`.
///
/// Unknown languages yield an empty analysis.
pub fn analyze(language: &str, source: &str) -> Analysis {
    let Some(spec) = language::lookup(language) else {
        return Analysis::default();
    };

    let (packages, gui_table): (Vec<String>, &[(&str, &str)]) = match spec.name {
        "python" => (python_imports(source), PYTHON_GUI),
        "javascript" | "typescript" => (js_imports(source), JS_GUI),
        "rust" => (rust_imports(source), RUST_GUI),
        "go" => (go_imports(source), GO_GUI),
        "r" => (r_imports(source), &[]),
        _ => (Vec::new(), &[]),
    };

    let gui_framework = packages.iter().find_map(|pkg| {
        gui_table
            .iter()
            .find(|(prefix, _)| pkg == prefix || pkg.starts_with(&format!("{prefix}/")))
            .map(|(_, name)| name.to_string())
    });

    if let Some(gui) = &gui_framework {
        tracing::debug!("Detected {} GUI framework in {} cell", gui, spec.name);
    }

    Analysis {
        language: Some(spec.name.to_string()),
        packages,
        gui_framework,
    }
}

/// Collects names in first-seen order without duplicates.
#[derive(Default)]
struct PackageSet {
    seen: FxHashSet<String>,
    ordered: Vec<String>,
}

impl PackageSet {
    fn insert(&mut self, name: &str) {
        let name = name.trim();
        if !name.is_empty() && self.seen.insert(name.to_string()) {
            self.ordered.push(name.to_string());
        }
    }

    fn into_vec(self) -> Vec<String> {
        self.ordered
    }
}

fn python_imports(source: &str) -> Vec<String> {
    let mut set = PackageSet::default();
    for line in source.lines() {
        let line = line.trim();
        if let Some(rest) = line.strip_prefix("import ") {
            for item in rest.split(',') {
                // `import a.b as c` -> `a`
                let module = item.split_whitespace().next().unwrap_or("");
                set.insert(module.split('.').next().unwrap_or(""));
            }
        } else if let Some(rest) = line.strip_prefix("from ") {
            let module = rest.split_whitespace().next().unwrap_or("");
            // Relative imports are local modules.
            if !module.starts_with('.') {
                set.insert(module.split('.').next().unwrap_or(""));
            }
        }
    }
    set.into_vec()
}

static JS_IMPORT: OnceLock<Regex> = OnceLock::new();

fn js_imports(source: &str) -> Vec<String> {
    let re = JS_IMPORT.get_or_init(|| {
        Regex::new(r#"(?:import\s+(?:[^'"]*?\s+from\s+)?|require\s*\(\s*)['"]([^'"]+)['"]"#)
            .expect("Invalid import regex")
    });

    let mut set = PackageSet::default();
    for capture in re.captures_iter(source) {
        let spec = &capture[1];
        if spec.starts_with('.') || spec.starts_with('/') || spec.starts_with("node:") {
            continue;
        }
        // Scoped packages keep their scope: `@scope/pkg/sub` -> `@scope/pkg`
        let name = if spec.starts_with('@') {
            spec.splitn(3, '/').take(2).collect::<Vec<_>>().join("/")
        } else {
            spec.split('/').next().unwrap_or(spec).to_string()
        };
        set.insert(&name);
    }
    set.into_vec()
}

fn rust_imports(source: &str) -> Vec<String> {
    const LOCAL: &[&str] = &["std", "core", "alloc", "crate", "self", "super"];

    let mut set = PackageSet::default();
    for line in source.lines() {
        let line = line.trim();
        let rest = line
            .strip_prefix("use ")
            .or_else(|| line.strip_prefix("pub use "))
            .or_else(|| line.strip_prefix("extern crate "));
        let Some(rest) = rest else { continue };

        let root = rest
            .trim_start_matches("::")
            .split(|c: char| c == ':' || c == ';' || c == ' ' || c == '{')
            .next()
            .unwrap_or("");
        if !LOCAL.contains(&root) {
            set.insert(root);
        }
    }
    set.into_vec()
}

fn go_imports(source: &str) -> Vec<String> {
    let mut set = PackageSet::default();
    let mut in_block = false;

    for line in source.lines() {
        let line = line.trim();
        if in_block {
            if line.starts_with(')') {
                in_block = false;
            } else if let Some(path) = quoted(line) {
                set.insert(path);
            }
        } else if let Some(rest) = line.strip_prefix("import") {
            let rest = rest.trim();
            if rest.starts_with('(') {
                in_block = true;
            } else if let Some(path) = quoted(rest) {
                set.insert(path);
            }
        }
    }
    set.into_vec()
}

/// First double-quoted string on a line.
fn quoted(line: &str) -> Option<&str> {
    let start = line.find('"')? + 1;
    let len = line[start..].find('"')?;
    Some(&line[start..start + len])
}

static R_LIBRARY: OnceLock<Regex> = OnceLock::new();

fn r_imports(source: &str) -> Vec<String> {
    let re = R_LIBRARY.get_or_init(|| {
        Regex::new(r#"(?:library|require|requireNamespace)\s*\(\s*['"]?([A-Za-z][A-Za-z0-9._]*)['"]?"#)
            .expect("Invalid library regex")
    });

    let mut set = PackageSet::default();
    for capture in re.captures_iter(source) {
        set.insert(&capture[1]);
    }
    set.into_vec()
}
