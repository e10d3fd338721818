//! Package-manager command normalization and streaming child execution.

use std::collections::HashMap;
use std::future::Future;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::warn;

const COMMAND_TIMEOUT: Duration = Duration::from_secs(5 * 60);

#[derive(Debug)]
pub struct CommandResult {
    pub exit_code: i32,
}

/// Rewrite npm/yarn/pnpm invocations to their bun equivalents, one
/// `&&`-delimited segment at a time. Idempotent: bun commands pass through.
pub fn normalize_build_command(command: &str) -> String {
    let converted: Vec<String> = command
        .split("&&")
        .map(|part| normalize_segment(part.trim()))
        .collect();

    converted.join(" && ")
}

fn normalize_segment(part: &str) -> String {
    if let Some(rest) = part.strip_prefix("npm install") {
        return format!("bun install{rest}");
    }
    if let Some(rest) = part.strip_prefix("npm i ") {
        return format!("bun install {}", rest.trim_start());
    }
    if let Some(rest) = part.strip_prefix("npm run") {
        return format!("bun run{rest}");
    }
    if let Some(rest) = part.strip_prefix("npm ci") {
        return format!("bun install{rest}");
    }
    if part == "yarn" || part == "yarn install" {
        return "bun install".to_string();
    }
    if let Some(rest) = part.strip_prefix("yarn ") {
        if !rest.starts_with("add") && !rest.starts_with("remove") {
            return format!("bun run {rest}");
        }
    }
    if let Some(rest) = part.strip_prefix("pnpm install") {
        return format!("bun install{rest}");
    }
    if let Some(rest) = part.strip_prefix("pnpm i ") {
        return format!("bun install {}", rest.trim_start());
    }
    if let Some(rest) = part.strip_prefix("pnpm run") {
        return format!("bun run{rest}");
    }

    part.to_string()
}

/// Whether a build command actually compiles anything, as opposed to only
/// installing dependencies.
pub fn needs_compilation(build_command: &str) -> bool {
    let cmd = build_command.trim().to_lowercase();

    let skip = [
        "npm install",
        "yarn install",
        "bun install",
        "pnpm install",
        "npm ci",
        "",
    ];
    if skip.contains(&cmd.as_str()) {
        return false;
    }

    let compilers = [
        "tsc", "esbuild", "swc", "rollup", "webpack", "parcel", "vite build", "next build",
        "tsup", "unbuild", "ncc",
    ];
    if compilers.iter().any(|p| cmd.contains(p)) {
        return true;
    }

    cmd.contains(" run build")
}

/// Whether `package.json` in `project_dir` declares the named script.
///
/// Parses the manifest and checks `scripts` directly; a raw substring probe
/// is only the fallback for manifests that fail to parse.
pub fn has_script(project_dir: &Path, script_name: &str) -> bool {
    let manifest = project_dir.join("package.json");
    let Ok(data) = std::fs::read_to_string(&manifest) else {
        return false;
    };

    match serde_json::from_str::<serde_json::Value>(&data) {
        Ok(pkg) => pkg
            .get("scripts")
            .and_then(|s| s.get(script_name))
            .is_some(),
        Err(_) => data.contains(&format!("\"{script_name}\"")),
    }
}

/// Run one command line, streaming every output line to `on_line`.
///
/// The command is normalized first and `&&`-delimited segments run
/// sequentially; the first non-zero exit stops the chain and becomes the
/// result. Each segment gets a 5-minute timeout. `env_vars` override the
/// inherited environment on key collision.
pub async fn run_command<F, Fut>(
    command: &str,
    cwd: &Path,
    env_vars: &HashMap<String, String>,
    bun_path: &str,
    on_line: F,
) -> CommandResult
where
    F: Fn(String) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send,
{
    let normalized = normalize_build_command(command);

    for segment in normalized.split("&&") {
        let result = run_segment(segment.trim(), cwd, env_vars, bun_path, on_line.clone()).await;
        if result.exit_code != 0 {
            return result;
        }
    }

    CommandResult { exit_code: 0 }
}

async fn run_segment<F, Fut>(
    segment: &str,
    cwd: &Path,
    env_vars: &HashMap<String, String>,
    bun_path: &str,
    on_line: F,
) -> CommandResult
where
    F: Fn(String) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send,
{
    let mut parts = segment.split_whitespace();
    let Some(program) = parts.next() else {
        return CommandResult { exit_code: 1 };
    };
    let program = if program == "bun" { bun_path } else { program };

    let mut cmd = Command::new(program);
    cmd.args(parts)
        .current_dir(cwd)
        .envs(env_vars)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => {
            on_line(format!("Failed to start command: {e}\n")).await;
            return CommandResult { exit_code: 1 };
        }
    };

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let stdout_drainer = stdout.map(|pipe| {
        let on_line = on_line.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(pipe).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                on_line(format!("{line}\n")).await;
            }
        })
    });

    let stderr_drainer = stderr.map(|pipe| {
        let on_line = on_line.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(pipe).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                on_line(format!("{line}\n")).await;
            }
        })
    });

    let exit_code = match tokio::time::timeout(COMMAND_TIMEOUT, child.wait()).await {
        Ok(Ok(status)) => status.code().unwrap_or(1),
        Ok(Err(e)) => {
            warn!("Failed to wait for command: {}", e);
            1
        }
        Err(_) => {
            warn!("Command timed out after {:?}: {}", COMMAND_TIMEOUT, segment);
            let _ = child.kill().await;
            1
        }
    };

    if let Some(handle) = stdout_drainer {
        let _ = handle.await;
    }
    if let Some(handle) = stderr_drainer {
        let _ = handle.await;
    }

    CommandResult { exit_code }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_npm_commands() {
        assert_eq!(normalize_build_command("npm install"), "bun install");
        assert_eq!(normalize_build_command("npm install X"), "bun install X");
        assert_eq!(normalize_build_command("npm i lodash"), "bun install lodash");
        assert_eq!(normalize_build_command("npm ci"), "bun install");
        assert_eq!(normalize_build_command("npm run build"), "bun run build");
    }

    #[test]
    fn normalizes_yarn_commands() {
        assert_eq!(normalize_build_command("yarn"), "bun install");
        assert_eq!(normalize_build_command("yarn install"), "bun install");
        assert_eq!(normalize_build_command("yarn build"), "bun run build");
        // add/remove mutate the dependency set and stay untouched
        assert_eq!(normalize_build_command("yarn add react"), "yarn add react");
        assert_eq!(
            normalize_build_command("yarn remove react"),
            "yarn remove react"
        );
    }

    #[test]
    fn normalizes_pnpm_commands() {
        assert_eq!(normalize_build_command("pnpm install"), "bun install");
        assert_eq!(normalize_build_command("pnpm i react"), "bun install react");
        assert_eq!(normalize_build_command("pnpm run build"), "bun run build");
    }

    #[test]
    fn normalizes_chained_segments() {
        assert_eq!(
            normalize_build_command("yarn install && yarn build"),
            "bun install && bun run build"
        );
        assert_eq!(
            normalize_build_command("npm ci && tsc"),
            "bun install && tsc"
        );
    }

    #[test]
    fn normalization_is_idempotent() {
        for cmd in [
            "npm install",
            "yarn install && yarn build",
            "pnpm run build",
            "bun run build",
            "npm ci && tsc",
        ] {
            let once = normalize_build_command(cmd);
            assert_eq!(normalize_build_command(&once), once);
        }
    }

    #[test]
    fn compilation_heuristic() {
        assert!(!needs_compilation("npm install"));
        assert!(!needs_compilation("bun install"));
        assert!(!needs_compilation(""));
        assert!(needs_compilation("npm ci && tsc"));
        assert!(needs_compilation("tsc"));
        assert!(needs_compilation("vite build"));
        assert!(needs_compilation("next build"));
        assert!(needs_compilation("npm run build"));
        assert!(needs_compilation("bun run build"));
        assert!(!needs_compilation("echo hello"));
    }

    #[test]
    fn script_probe_parses_manifest() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("package.json"),
            r#"{"name":"x","scripts":{"build":"tsc"},"description":"a \"start\" guide"}"#,
        )
        .unwrap();

        assert!(has_script(dir.path(), "build"));
        // "start" only appears inside a string value, not in scripts
        assert!(!has_script(dir.path(), "start"));
        assert!(!has_script(dir.path(), "test"));
    }

    #[test]
    fn script_probe_missing_manifest() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!has_script(dir.path(), "build"));
    }

    fn collecting_sink() -> (
        std::sync::Arc<std::sync::Mutex<Vec<String>>>,
        impl Fn(String) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>>
            + Clone
            + Send
            + Sync
            + 'static,
    ) {
        let lines = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink_lines = lines.clone();
        let sink = move |line: String| {
            let lines = sink_lines.clone();
            Box::pin(async move {
                lines.lock().unwrap().push(line);
            }) as std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>>
        };
        (lines, sink)
    }

    #[tokio::test]
    async fn runs_command_and_streams_lines() {
        let dir = tempfile::tempdir().unwrap();
        let (lines, sink) = collecting_sink();

        let result =
            run_command("echo hello", dir.path(), &HashMap::new(), "bun", sink).await;

        assert_eq!(result.exit_code, 0);
        assert_eq!(lines.lock().unwrap().as_slice(), ["hello\n"]);
    }

    #[tokio::test]
    async fn job_env_vars_reach_the_child() {
        let dir = tempfile::tempdir().unwrap();
        let (lines, sink) = collecting_sink();

        let mut env = HashMap::new();
        env.insert("PIPELINE_PROBE".to_string(), "probe-value".to_string());

        let result =
            run_command("printenv PIPELINE_PROBE", dir.path(), &env, "bun", sink).await;

        assert_eq!(result.exit_code, 0);
        assert_eq!(lines.lock().unwrap().as_slice(), ["probe-value\n"]);
    }

    #[tokio::test]
    async fn chain_stops_at_first_failure() {
        let dir = tempfile::tempdir().unwrap();
        let (lines, sink) = collecting_sink();

        let result =
            run_command("false && echo after", dir.path(), &HashMap::new(), "bun", sink).await;

        assert_ne!(result.exit_code, 0);
        assert!(lines.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_program_maps_to_exit_one() {
        let dir = tempfile::tempdir().unwrap();
        let (lines, sink) = collecting_sink();

        let result = run_command(
            "definitely-not-a-real-binary",
            dir.path(),
            &HashMap::new(),
            "bun",
            sink,
        )
        .await;

        assert_eq!(result.exit_code, 1);
        assert!(!lines.lock().unwrap().is_empty());
    }
}
