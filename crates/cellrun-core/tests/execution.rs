//! Integration tests for local execution.
//!
//! Most tests use shell cells since `sh` is available on every unix host.
//! Tests that need another toolchain skip when it cannot be resolved.

#![cfg(unix)]

use std::path::Path;
use std::time::Duration;

use cellrun_core::{
    AbortHandle, ClassifiedOutput, Engine, EngineConfig, RunStatus, ToolchainResolver, language,
};
use tempfile::TempDir;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn engine(temp: &TempDir) -> Engine {
    init_tracing();
    Engine::new(EngineConfig::for_workspace(temp.path().join("ws")))
}

fn have(tag: &str) -> bool {
    let spec = language::lookup(tag).expect("Unknown language");
    ToolchainResolver::new().resolve(spec, None).is_ok()
}

/// Per-run artifacts left in the workspace.
fn residual_artifacts(root: &Path) -> Vec<String> {
    let Ok(entries) = std::fs::read_dir(root) else {
        return Vec::new();
    };
    entries
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|name| name.starts_with("cell_"))
        .collect()
}

#[tokio::test]
async fn test_shell_hello() -> anyhow::Result<()> {
    let temp = TempDir::new()?;
    let engine = engine(&temp);

    let result = engine.execute("sh", "echo hello", &AbortHandle::new()).await;
    assert_eq!(result.status, RunStatus::Success, "output: {}", result.output);
    assert_eq!(result.output, "hello\n");
    assert_eq!(result.exit_code, Some(0));
    assert_eq!(engine.classify(&result), ClassifiedOutput::text("hello"));
    assert!(residual_artifacts(engine.workspace().root()).is_empty());
    Ok(())
}

#[tokio::test]
async fn test_runtime_failure_keeps_output() -> anyhow::Result<()> {
    let temp = TempDir::new()?;
    let engine = engine(&temp);

    let result = engine
        .execute("bash", "echo before\necho oops >&2\nexit 3", &AbortHandle::new())
        .await;
    assert_eq!(result.status, RunStatus::RuntimeFailure);
    assert_eq!(result.exit_code, Some(3));
    assert!(result.output.contains("before"));
    assert!(result.output.contains("oops"));
    assert!(residual_artifacts(engine.workspace().root()).is_empty());
    Ok(())
}

#[tokio::test]
async fn test_cancel_kills_and_cleans_up() -> anyhow::Result<()> {
    let temp = TempDir::new()?;
    let engine = engine(&temp);

    let cancel = AbortHandle::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        trigger.abort();
    });

    let result = engine.execute("sh", "echo started\nexec sleep 30", &cancel).await;
    assert_eq!(result.status, RunStatus::Cancelled);
    assert!(result.elapsed < Duration::from_secs(10));
    assert!(residual_artifacts(engine.workspace().root()).is_empty());
    Ok(())
}

#[tokio::test]
async fn test_timeout_is_runtime_failure() -> anyhow::Result<()> {
    let temp = TempDir::new()?;
    init_tracing();
    let config = EngineConfig {
        run_timeout_secs: Some(1),
        ..EngineConfig::for_workspace(temp.path().join("ws"))
    };
    let engine = Engine::new(config);

    let result = engine.execute("sh", "exec sleep 30", &AbortHandle::new()).await;
    assert_eq!(result.status, RunStatus::RuntimeFailure);
    assert!(result.output.contains("timed out"), "output: {}", result.output);
    assert!(residual_artifacts(engine.workspace().root()).is_empty());
    Ok(())
}

#[tokio::test]
async fn test_missing_toolchain() -> anyhow::Result<()> {
    let temp = TempDir::new()?;
    let engine = engine(&temp).with_resolver(ToolchainResolver::with_search_dirs(vec![]));

    let result = engine.execute("lua", "print(1)", &AbortHandle::new()).await;
    assert_eq!(result.status, RunStatus::ToolchainNotFound);
    assert!(result.output.contains("lua.org"));
    Ok(())
}

#[tokio::test]
async fn test_image_marker_resolves_in_workspace() -> anyhow::Result<()> {
    let temp = TempDir::new()?;
    let engine = engine(&temp);

    let source = "printf 'png' > figure.png\necho 'plotted'\necho '[IMAGE:figure.png]'\necho '[IMAGE:missing.png]'";
    let result = engine.execute("sh", source, &AbortHandle::new()).await;
    assert!(result.is_success(), "output: {}", result.output);

    let classified = engine.classify(&result);
    assert_eq!(classified.as_text(), "plotted");
    assert_eq!(classified.images(), &[engine.workspace().root().join("figure.png")]);
    Ok(())
}

#[tokio::test]
async fn test_structured_handoff() -> anyhow::Result<()> {
    let temp = TempDir::new()?;
    let engine = engine(&temp);

    let source = r#"echo '{"__is_table__": true, "path": "/tmp/frame.parquet"}'"#;
    let result = engine.execute("sh", source, &AbortHandle::new()).await;

    let classified = engine.classify(&result);
    assert_eq!(classified.structured(), Some(Path::new("/tmp/frame.parquet")));
    assert_eq!(classified.as_text(), "");
    Ok(())
}

#[tokio::test]
async fn test_streaming_reports_partial_output() -> anyhow::Result<()> {
    let temp = TempDir::new()?;
    let engine = engine(&temp);

    let mut flushes: Vec<String> = Vec::new();
    let source = "for i in 1 2 3; do echo $i; sleep 0.3; done";
    let result = engine
        .execute_streaming("sh", source, &AbortHandle::new(), |text| flushes.push(text.to_string()))
        .await;

    assert!(result.is_success());
    assert_eq!(result.output, "1\n2\n3\n");
    assert!(flushes.len() >= 2, "flushes: {flushes:?}");
    assert!(flushes[0].len() < result.output.len());
    assert_eq!(flushes.last(), Some(&result.output));
    Ok(())
}

#[tokio::test]
async fn test_concurrent_runs_do_not_collide() -> anyhow::Result<()> {
    let temp = TempDir::new()?;
    let engine = engine(&temp);
    let cancel = AbortHandle::new();

    let sources: Vec<String> = (0..4).map(|i| format!("sleep 0.2\necho run-{i}")).collect();
    let results =
        futures::future::join_all(sources.iter().map(|s| engine.execute("sh", s, &cancel))).await;

    for (i, result) in results.iter().enumerate() {
        assert!(result.is_success());
        assert_eq!(result.output, format!("run-{i}\n"));
    }
    assert!(residual_artifacts(engine.workspace().root()).is_empty());
    Ok(())
}

#[tokio::test]
async fn test_c_compile_failure() -> anyhow::Result<()> {
    if !have("c") {
        eprintln!("Skipping: no C compiler");
        return Ok(());
    }
    let temp = TempDir::new()?;
    let engine = engine(&temp);

    let result = engine
        .execute("c", "int main(void) { return undefined_symbol; }", &AbortHandle::new())
        .await;
    assert_eq!(result.status, RunStatus::CompileFailure);
    assert!(result.output.contains("undefined_symbol"));
    assert!(residual_artifacts(engine.workspace().root()).is_empty());
    Ok(())
}

#[tokio::test]
async fn test_c_compile_and_run() -> anyhow::Result<()> {
    if !have("c") {
        eprintln!("Skipping: no C compiler");
        return Ok(());
    }
    let temp = TempDir::new()?;
    let engine = engine(&temp);

    let source = "#include <stdio.h>\nint main(void) { printf(\"compiled\\n\"); return 0; }\n";
    let result = engine.execute("c", source, &AbortHandle::new()).await;
    assert_eq!(result.status, RunStatus::Success, "output: {}", result.output);
    assert_eq!(result.output, "compiled\n");
    assert!(residual_artifacts(engine.workspace().root()).is_empty());
    Ok(())
}

#[tokio::test]
async fn test_c_runtime_failure_cleans_up() -> anyhow::Result<()> {
    if !have("c") {
        eprintln!("Skipping: no C compiler");
        return Ok(());
    }
    let temp = TempDir::new()?;
    let engine = engine(&temp);

    let source = "#include <stdio.h>\nint main(void) { fprintf(stderr, \"bad input\\n\"); return 4; }\n";
    let result = engine.execute("c", source, &AbortHandle::new()).await;
    assert_eq!(result.status, RunStatus::RuntimeFailure, "output: {}", result.output);
    assert_eq!(result.exit_code, Some(4));
    assert!(result.output.contains("bad input"));
    assert!(residual_artifacts(engine.workspace().root()).is_empty());
    Ok(())
}

#[tokio::test]
async fn test_c_cancel_during_run_cleans_up() -> anyhow::Result<()> {
    if !have("c") {
        eprintln!("Skipping: no C compiler");
        return Ok(());
    }
    let temp = TempDir::new()?;
    let engine = engine(&temp);

    // Abort once the binary is running, so compilation has already finished.
    let cancel = AbortHandle::new();
    let trigger = cancel.clone();
    let source = "#include <stdio.h>\n#include <unistd.h>\n\
                  int main(void) { printf(\"running\\n\"); fflush(stdout); sleep(30); return 0; }\n";
    let result = engine
        .execute_streaming("c", source, &cancel, |text| {
            if text.contains("running") {
                trigger.abort();
            }
        })
        .await;

    assert_eq!(result.status, RunStatus::Cancelled, "output: {}", result.output);
    assert!(result.output.contains("running"));
    assert!(result.elapsed < Duration::from_secs(20));
    assert!(residual_artifacts(engine.workspace().root()).is_empty());
    Ok(())
}

#[tokio::test]
async fn test_python_hello() -> anyhow::Result<()> {
    if !have("python") {
        eprintln!("Skipping: no python");
        return Ok(());
    }
    let temp = TempDir::new()?;
    let engine = engine(&temp);

    let result = engine.execute("python", "print('hi from python')", &AbortHandle::new()).await;
    assert!(result.is_success(), "output: {}", result.output);
    assert_eq!(engine.classify(&result).as_text(), "hi from python");
    Ok(())
}
