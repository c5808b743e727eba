//! Language registry.
//!
//! Each supported language is one [`LanguageSpec`] entry: how to find its
//! toolchain, what suffix its source file needs, and which runner variant
//! drives it. Dispatch is a match on [`RunnerKind`], never on the language
//! name.
//!
//! Argument templates use whole-argument placeholders:
//! - `{file}` - the composed source file (interpreted languages)
//! - `{src}` / `{bin}` - source file and output binary (compiled languages)
//!
//! Source templates (preamble/epilogue) use `@workspace@`, `@run_id@` and
//! `@bridge@`, expanded by [`crate::runner::compose_source`].

/// Where to look for a language's executable.
#[derive(Debug)]
pub struct ToolchainSpec {
    /// Executable names, in order of preference.
    pub executables: &'static [&'static str],
    /// Absolute candidates checked after the conventional install
    /// directories. `{home}` expands to the user's home directory.
    pub extra_paths: &'static [&'static str],
    /// Shown when nothing is found.
    pub install_hint: &'static str,
}

/// Configuration of an interpreted language.
#[derive(Debug)]
pub struct InterpretedConfig {
    /// Interpreter arguments; `{file}` is replaced by the source path.
    pub args: &'static [&'static str],
    /// Extra environment. `{home}` expands to the user's home directory.
    pub env: &'static [(&'static str, &'static str)],
    /// Injected before the cell source.
    pub preamble: Option<&'static str>,
    /// Injected after the cell source.
    pub epilogue: Option<&'static str>,
}

/// Configuration of a compiled language.
#[derive(Debug)]
pub struct CompiledConfig {
    /// Compiler arguments; `{src}` and `{bin}` are substituted.
    pub compile_args: &'static [&'static str],
}

/// The runner variant for a language.
#[derive(Debug)]
pub enum RunnerKind {
    Interpreted(InterpretedConfig),
    Compiled(CompiledConfig),
}

/// One supported language.
#[derive(Debug)]
pub struct LanguageSpec {
    /// Canonical tag.
    pub name: &'static str,
    /// Alternate tags accepted by [`lookup`].
    pub aliases: &'static [&'static str],
    /// Suffix of the per-run source file.
    pub suffix: &'static str,
    /// Lower bound on the run timeout, for toolchains with slow startup.
    pub min_timeout_secs: Option<u64>,
    pub toolchain: ToolchainSpec,
    pub runner: RunnerKind,
}

impl LanguageSpec {
    /// True for the two-phase compile/run variant.
    pub fn is_compiled(&self) -> bool {
        matches!(self.runner, RunnerKind::Compiled(_))
    }
}

/// Find the spec for a language tag (case-insensitive, aliases accepted).
pub fn lookup(tag: &str) -> Option<&'static LanguageSpec> {
    let tag = tag.trim().to_ascii_lowercase();
    LANGUAGES
        .iter()
        .find(|spec| spec.name == tag || spec.aliases.contains(&tag.as_str()))
}

/// All registered languages.
pub fn all() -> &'static [LanguageSpec] {
    LANGUAGES
}

const PYTHON_PREAMBLE: &str = r#"import os as __cellrun_os
__cellrun_os.chdir(@workspace@)
@bridge@
try:
    import matplotlib as __cellrun_mpl
    __cellrun_mpl.use("Agg")
except Exception:
    __cellrun_mpl = None
"#;

const PYTHON_EPILOGUE: &str = r#"
if __cellrun_mpl is not None:
    try:
        import matplotlib.pyplot as __cellrun_plt
        for __cellrun_i, __cellrun_num in enumerate(__cellrun_plt.get_fignums()):
            __cellrun_name = "plot_@run_id@_%d.png" % __cellrun_i
            __cellrun_plt.figure(__cellrun_num).savefig(__cellrun_name, dpi=150, bbox_inches="tight")
            print("[IMAGE:%s]" % __cellrun_name, flush=True)
        __cellrun_plt.close("all")
    except Exception:
        pass
"#;

const R_PREAMBLE: &str = r#"setwd(@workspace@)
.cellrun_prefix <- "plot_@run_id@_"
png(filename = paste0(.cellrun_prefix, "%d.png"))
"#;

const R_EPILOGUE: &str = r#"
invisible(dev.off())
for (.cellrun_f in sort(list.files(pattern = paste0("^", .cellrun_prefix)))) cat(sprintf("[IMAGE:%s]\n", .cellrun_f))
"#;

const R_LIBS: &str = "{home}/Library/R/arm64/4.4/library:{home}/Library/R/x86_64/4.4/library:{home}/R/lib:/opt/homebrew/lib/R/4.4/site-library:/usr/local/lib/R/site-library:/Library/Frameworks/R.framework/Resources/library";

static LANGUAGES: &[LanguageSpec] = &[
    LanguageSpec {
        name: "python",
        aliases: &["py", "python3"],
        suffix: "py",
        min_timeout_secs: None,
        toolchain: ToolchainSpec {
            executables: &["python3", "python"],
            extra_paths: &["/Library/Frameworks/Python.framework/Versions/Current/bin/python3"],
            install_hint: "Install Python 3 (https://www.python.org) or activate a virtual environment.",
        },
        runner: RunnerKind::Interpreted(InterpretedConfig {
            args: &["-u", "{file}"],
            env: &[("PYTHONUNBUFFERED", "1"), ("MPLBACKEND", "Agg")],
            preamble: Some(PYTHON_PREAMBLE),
            epilogue: Some(PYTHON_EPILOGUE),
        }),
    },
    LanguageSpec {
        name: "javascript",
        aliases: &["js", "node"],
        suffix: "js",
        min_timeout_secs: None,
        toolchain: ToolchainSpec {
            executables: &["node"],
            extra_paths: &[],
            install_hint: "Install Node.js (https://nodejs.org).",
        },
        runner: RunnerKind::Interpreted(InterpretedConfig {
            args: &["{file}"],
            env: &[],
            preamble: None,
            epilogue: None,
        }),
    },
    LanguageSpec {
        name: "typescript",
        aliases: &["ts"],
        suffix: "ts",
        min_timeout_secs: None,
        toolchain: ToolchainSpec {
            executables: &["ts-node", "tsx"],
            extra_paths: &[],
            install_hint: "Install ts-node with `npm install -g ts-node typescript`.",
        },
        runner: RunnerKind::Interpreted(InterpretedConfig {
            args: &["{file}"],
            env: &[],
            preamble: None,
            epilogue: None,
        }),
    },
    LanguageSpec {
        name: "ruby",
        aliases: &["rb"],
        suffix: "rb",
        min_timeout_secs: None,
        toolchain: ToolchainSpec {
            executables: &["ruby"],
            extra_paths: &[],
            install_hint: "Install Ruby (https://www.ruby-lang.org).",
        },
        runner: RunnerKind::Interpreted(InterpretedConfig {
            args: &["{file}"],
            env: &[],
            preamble: None,
            epilogue: None,
        }),
    },
    LanguageSpec {
        name: "lua",
        aliases: &[],
        suffix: "lua",
        min_timeout_secs: None,
        toolchain: ToolchainSpec {
            executables: &["lua", "luajit"],
            extra_paths: &[],
            install_hint: "Install Lua (https://www.lua.org).",
        },
        runner: RunnerKind::Interpreted(InterpretedConfig {
            args: &["{file}"],
            env: &[],
            preamble: None,
            epilogue: None,
        }),
    },
    LanguageSpec {
        name: "perl",
        aliases: &["pl"],
        suffix: "pl",
        min_timeout_secs: None,
        toolchain: ToolchainSpec {
            executables: &["perl"],
            extra_paths: &[],
            install_hint: "Install Perl (https://www.perl.org).",
        },
        runner: RunnerKind::Interpreted(InterpretedConfig {
            args: &["{file}"],
            env: &[],
            preamble: None,
            epilogue: None,
        }),
    },
    LanguageSpec {
        name: "php",
        aliases: &[],
        suffix: "php",
        min_timeout_secs: None,
        toolchain: ToolchainSpec {
            executables: &["php"],
            extra_paths: &[],
            install_hint: "Install PHP (https://www.php.net).",
        },
        runner: RunnerKind::Interpreted(InterpretedConfig {
            args: &["{file}"],
            env: &[],
            preamble: None,
            epilogue: None,
        }),
    },
    LanguageSpec {
        name: "shell",
        aliases: &["sh", "bash", "zsh"],
        suffix: "sh",
        min_timeout_secs: None,
        toolchain: ToolchainSpec {
            executables: &["bash", "sh"],
            extra_paths: &[],
            install_hint: "Install bash.",
        },
        runner: RunnerKind::Interpreted(InterpretedConfig {
            args: &["{file}"],
            env: &[],
            preamble: None,
            epilogue: None,
        }),
    },
    LanguageSpec {
        name: "r",
        aliases: &["rscript"],
        suffix: "R",
        min_timeout_secs: Some(60),
        toolchain: ToolchainSpec {
            executables: &["Rscript"],
            extra_paths: &["/Library/Frameworks/R.framework/Resources/bin/Rscript"],
            install_hint: "Install R (https://cran.r-project.org).",
        },
        runner: RunnerKind::Interpreted(InterpretedConfig {
            args: &["--vanilla", "{file}"],
            env: &[("R_LIBS_USER", R_LIBS), ("R_LIBS", R_LIBS)],
            preamble: Some(R_PREAMBLE),
            epilogue: Some(R_EPILOGUE),
        }),
    },
    LanguageSpec {
        name: "d",
        aliases: &["dlang"],
        suffix: "d",
        min_timeout_secs: None,
        toolchain: ToolchainSpec {
            executables: &["rdmd"],
            extra_paths: &[],
            install_hint: "Install a D toolchain providing rdmd (https://dlang.org).",
        },
        runner: RunnerKind::Interpreted(InterpretedConfig {
            args: &["{file}"],
            env: &[],
            preamble: None,
            epilogue: None,
        }),
    },
    LanguageSpec {
        name: "java",
        aliases: &[],
        suffix: "java",
        min_timeout_secs: None,
        toolchain: ToolchainSpec {
            executables: &["java"],
            extra_paths: &["/opt/homebrew/opt/openjdk/bin/java"],
            install_hint: "Install a JDK 11 or newer (https://adoptium.net).",
        },
        runner: RunnerKind::Interpreted(InterpretedConfig {
            args: &["{file}"],
            env: &[],
            preamble: None,
            epilogue: None,
        }),
    },
    LanguageSpec {
        name: "kotlin",
        aliases: &["kt", "kts"],
        suffix: "kts",
        min_timeout_secs: None,
        toolchain: ToolchainSpec {
            executables: &["kotlinc", "kotlin"],
            extra_paths: &[],
            install_hint: "Install the Kotlin compiler (https://kotlinlang.org).",
        },
        runner: RunnerKind::Interpreted(InterpretedConfig {
            args: &["-script", "{file}"],
            env: &[],
            preamble: None,
            epilogue: None,
        }),
    },
    LanguageSpec {
        name: "sql",
        aliases: &["sqlite"],
        suffix: "sql",
        min_timeout_secs: None,
        toolchain: ToolchainSpec {
            executables: &["sqlite3"],
            extra_paths: &[],
            install_hint: "Install sqlite3 (https://sqlite.org).",
        },
        runner: RunnerKind::Interpreted(InterpretedConfig {
            args: &[":memory:", "-init", "{file}", ".quit"],
            env: &[],
            preamble: None,
            epilogue: None,
        }),
    },
    LanguageSpec {
        name: "c",
        aliases: &[],
        suffix: "c",
        min_timeout_secs: None,
        toolchain: ToolchainSpec {
            executables: &["clang", "gcc", "cc"],
            extra_paths: &[],
            install_hint: "Install a C compiler (Xcode command line tools, gcc or clang).",
        },
        runner: RunnerKind::Compiled(CompiledConfig {
            compile_args: &["{src}", "-o", "{bin}"],
        }),
    },
    LanguageSpec {
        name: "cpp",
        aliases: &["c++", "cxx"],
        suffix: "cpp",
        min_timeout_secs: None,
        toolchain: ToolchainSpec {
            executables: &["clang++", "g++", "c++"],
            extra_paths: &[],
            install_hint: "Install a C++ compiler (Xcode command line tools, g++ or clang++).",
        },
        runner: RunnerKind::Compiled(CompiledConfig {
            compile_args: &["-std=c++17", "{src}", "-o", "{bin}"],
        }),
    },
    LanguageSpec {
        name: "rust",
        aliases: &["rs"],
        suffix: "rs",
        min_timeout_secs: None,
        toolchain: ToolchainSpec {
            executables: &["rustc"],
            extra_paths: &[],
            install_hint: "Install Rust with rustup (https://rustup.rs).",
        },
        runner: RunnerKind::Compiled(CompiledConfig {
            compile_args: &["--edition", "2021", "{src}", "-o", "{bin}"],
        }),
    },
    LanguageSpec {
        name: "go",
        aliases: &["golang"],
        suffix: "go",
        min_timeout_secs: None,
        toolchain: ToolchainSpec {
            executables: &["go"],
            extra_paths: &[],
            install_hint: "Install Go (https://go.dev/dl).",
        },
        runner: RunnerKind::Compiled(CompiledConfig {
            compile_args: &["build", "-o", "{bin}", "{src}"],
        }),
    },
    LanguageSpec {
        name: "swift",
        aliases: &[],
        suffix: "swift",
        min_timeout_secs: None,
        toolchain: ToolchainSpec {
            executables: &["swiftc"],
            extra_paths: &[],
            install_hint: "Install Swift (https://swift.org/download).",
        },
        runner: RunnerKind::Compiled(CompiledConfig {
            compile_args: &["{src}", "-o", "{bin}"],
        }),
    },
    LanguageSpec {
        name: "objective-c",
        aliases: &["objc"],
        suffix: "m",
        min_timeout_secs: None,
        toolchain: ToolchainSpec {
            executables: &["clang"],
            extra_paths: &[],
            install_hint: "Install the Xcode command line tools.",
        },
        runner: RunnerKind::Compiled(CompiledConfig {
            compile_args: &["-framework", "Foundation", "{src}", "-o", "{bin}"],
        }),
    },
    LanguageSpec {
        name: "objective-cpp",
        aliases: &["objcpp", "objective-c++"],
        suffix: "mm",
        min_timeout_secs: None,
        toolchain: ToolchainSpec {
            executables: &["clang++", "clang"],
            extra_paths: &[],
            install_hint: "Install the Xcode command line tools.",
        },
        runner: RunnerKind::Compiled(CompiledConfig {
            compile_args: &["-framework", "Foundation", "-lc++", "{src}", "-o", "{bin}"],
        }),
    },
];
