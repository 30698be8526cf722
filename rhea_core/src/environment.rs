//! # Tool Environment Manager
//!
//! Owns the lifecycle of the isolated package environment backing one tool:
//! creation with a two-phase install (exact pins first, version floors on
//! retry), command execution inside the environment, and best-effort
//! teardown. One environment belongs to exactly one worker; the scheduler
//! never shares environments between tools.

use std::{
    path::Path,
    process::Stdio,
    time::{Duration, Instant},
};
use tokio::process::Command;

use crate::descriptor::Requirement;
use crate::error::{Result, RheaError};

/// Outcome of one subprocess run. Non-zero exit codes live here, not in the
/// error channel.
#[derive(Debug, Clone)]
pub struct ExecOutcome {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
}

impl ExecOutcome {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// How commands are materialized inside the environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageBackend {
    /// Managed conda environment named after the tool id.
    Conda,
    /// Direct execution without an environment wrapper. Used by tests and
    /// availability probes.
    Plain,
}

/// An isolated package environment for a single tool.
#[derive(Debug, Clone)]
pub struct ToolEnvironment {
    env_id: String,
    backend: PackageBackend,
    /// Provider-supplied launch prefix (container args, queue wrapper).
    /// Empty for the local provider.
    wrapper: Vec<String>,
    installed: Vec<String>,
}

impl ToolEnvironment {
    /// Create the environment and install the tool's requirements.
    ///
    /// Install policy is two-phase: every requirement is first pinned to its
    /// exact declared version; if that solve fails, the floored form
    /// (`>=version`) is tried once before giving up.
    pub async fn create(
        tool_id: &str,
        requirements: &[Requirement],
        wrapper: Vec<String>,
    ) -> Result<Self> {
        let mut environment = Self {
            env_id: tool_id.to_string(),
            backend: PackageBackend::Conda,
            wrapper,
            installed: Vec::new(),
        };

        match environment.install(requirements, true).await {
            Ok(installed) => {
                environment.installed = installed;
            }
            Err(first) => {
                tracing::warn!(
                    tool_id,
                    error = %first,
                    "pinned install failed, retrying with version floors"
                );
                environment.installed = environment.install(requirements, false).await?;
            }
        }

        tracing::info!(
            tool_id,
            packages = environment.installed.len(),
            "environment ready"
        );
        Ok(environment)
    }

    /// An environment that executes directly, without conda. No install
    /// phase, no teardown.
    pub fn plain(env_id: impl Into<String>) -> Self {
        Self {
            env_id: env_id.into(),
            backend: PackageBackend::Plain,
            wrapper: Vec::new(),
            installed: Vec::new(),
        }
    }

    pub fn env_id(&self) -> &str {
        &self.env_id
    }

    /// The package set reported after a successful install.
    pub fn installed_packages(&self) -> &[String] {
        &self.installed
    }

    /// One install pass. `strict` pins `name=version`; otherwise the floor
    /// `name>=version` is requested.
    pub async fn install(&self, requirements: &[Requirement], strict: bool) -> Result<Vec<String>> {
        if self.backend == PackageBackend::Plain {
            return Ok(Vec::new());
        }

        let mut argv = self.wrapper.clone();
        argv.extend(
            ["conda", "create", "-n", self.env_id.as_str(), "-y"].map(str::to_string),
        );
        for requirement in requirements {
            let op = if strict { "=" } else { ">=" };
            argv.push(format!("{}{op}{}", requirement.name, requirement.version));
        }

        let outcome = run_argv(&argv, &[], None, INSTALL_TIMEOUT).await?;
        if !outcome.success() {
            return Err(RheaError::EnvInstallFailed {
                tool_id: self.env_id.clone(),
                detail: truncate(&outcome.stderr, 2000),
            });
        }

        self.list_installed().await
    }

    /// Query the installed package set (`name=version` entries).
    pub async fn list_installed(&self) -> Result<Vec<String>> {
        if self.backend == PackageBackend::Plain {
            return Ok(Vec::new());
        }

        let mut argv = self.wrapper.clone();
        argv.extend(["conda", "list", "-n", self.env_id.as_str(), "--json"].map(str::to_string));
        let outcome = run_argv(&argv, &[], None, LIST_TIMEOUT).await?;
        if !outcome.success() {
            return Err(RheaError::EnvInstallFailed {
                tool_id: self.env_id.clone(),
                detail: format!("listing packages failed: {}", truncate(&outcome.stderr, 500)),
            });
        }

        #[derive(serde::Deserialize)]
        struct PackageInfo {
            name: String,
            version: String,
        }
        let packages: Vec<PackageInfo> = serde_json::from_str(&outcome.stdout)
            .map_err(|e| RheaError::EnvInstallFailed {
                tool_id: self.env_id.clone(),
                detail: format!("unparseable package listing: {e}"),
            })?;
        Ok(packages
            .into_iter()
            .map(|p| format!("{}={}", p.name, p.version))
            .collect())
    }

    /// Execute a rendered script inside the environment.
    pub async fn run_script(
        &self,
        script: &Path,
        env: &[(String, String)],
        cwd: &Path,
        timeout: Duration,
    ) -> Result<ExecOutcome> {
        let mut argv = self.wrapper.clone();
        match self.backend {
            PackageBackend::Conda => {
                argv.extend(
                    [
                        "conda",
                        "run",
                        "-n",
                        self.env_id.as_str(),
                        "--no-capture-output",
                        "bash",
                    ]
                    .map(str::to_string),
                );
            }
            PackageBackend::Plain => argv.push("bash".to_string()),
        }
        argv.push(script.to_string_lossy().to_string());

        run_argv(&argv, env, Some(cwd), timeout).await
    }

    /// Remove the environment. Best-effort and idempotent: a missing
    /// environment is not an error.
    pub async fn destroy(&self) {
        if self.backend == PackageBackend::Plain {
            return;
        }

        let mut argv = self.wrapper.clone();
        argv.extend(["conda", "env", "remove", "-n", self.env_id.as_str(), "-y"].map(str::to_string));
        match run_argv(&argv, &[], None, LIST_TIMEOUT).await {
            Ok(outcome) if !outcome.success() => {
                tracing::warn!(
                    env_id = %self.env_id,
                    stderr = %truncate(&outcome.stderr, 500),
                    "environment removal reported failure"
                );
            }
            Err(e) => {
                tracing::warn!(env_id = %self.env_id, error = %e, "environment removal failed");
            }
            Ok(_) => {}
        }
    }
}

const INSTALL_TIMEOUT: Duration = Duration::from_secs(1800);
const LIST_TIMEOUT: Duration = Duration::from_secs(120);

/// Spawn an argv with a wall-clock limit. Exceeding the limit is a
/// `Timeout`; failing to spawn is `WorkerCrashed`. A missing binary is
/// reported like a shell would, with exit code 127.
pub async fn run_argv(
    argv: &[String],
    env: &[(String, String)],
    cwd: Option<&Path>,
    timeout: Duration,
) -> Result<ExecOutcome> {
    let Some((program, args)) = argv.split_first() else {
        return Err(RheaError::WorkerCrashed("empty command".to_string()));
    };

    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    for (key, value) in env {
        cmd.env(key, value);
    }
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }

    let start = Instant::now();
    let output = match tokio::time::timeout(timeout, cmd.output()).await {
        Err(_) => return Err(RheaError::Timeout(timeout)),
        Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok(ExecOutcome {
                exit_code: 127,
                stdout: String::new(),
                stderr: format!("{program}: command not found"),
                duration: start.elapsed(),
            });
        }
        Ok(Err(e)) => {
            return Err(RheaError::WorkerCrashed(format!(
                "failed to spawn '{program}': {e}"
            )));
        }
        Ok(Ok(output)) => output,
    };

    Ok(ExecOutcome {
        exit_code: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        duration: start.elapsed(),
    })
}

fn truncate(text: &str, max: usize) -> String {
    if text.len() <= max {
        text.to_string()
    } else {
        let mut cut = max;
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }
        format!("{}…", &text[..cut])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn plain_environment_runs_scripts() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("hello.sh");
        tokio::fs::write(&script, "#!/usr/bin/env bash\necho \"hi $NAME\"\n")
            .await
            .unwrap();

        let environment = ToolEnvironment::plain("test-env");
        let outcome = environment
            .run_script(
                &script,
                &[("NAME".to_string(), "rhea".to_string())],
                dir.path(),
                Duration::from_secs(10),
            )
            .await
            .unwrap();

        assert_eq!(outcome.exit_code, 0);
        assert_eq!(outcome.stdout.trim(), "hi rhea");
    }

    #[tokio::test]
    async fn nonzero_exit_is_an_outcome_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("fail.sh");
        tokio::fs::write(&script, "#!/usr/bin/env bash\necho oops >&2\nexit 3\n")
            .await
            .unwrap();

        let outcome = ToolEnvironment::plain("t")
            .run_script(&script, &[], dir.path(), Duration::from_secs(10))
            .await
            .unwrap();

        assert_eq!(outcome.exit_code, 3);
        assert!(outcome.stderr.contains("oops"));
    }

    #[tokio::test]
    async fn missing_binary_reports_like_a_shell() {
        let outcome = run_argv(
            &["definitely_not_a_real_binary_xyz".to_string()],
            &[],
            None,
            Duration::from_secs(5),
        )
        .await
        .unwrap();
        assert_eq!(outcome.exit_code, 127);
        assert!(outcome.stderr.contains("command not found"));
    }

    #[tokio::test]
    async fn exceeding_the_limit_is_a_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("slow.sh");
        tokio::fs::write(&script, "#!/usr/bin/env bash\nsleep 5\n")
            .await
            .unwrap();

        let err = ToolEnvironment::plain("t")
            .run_script(&script, &[], dir.path(), Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, RheaError::Timeout(_)));
    }

    #[tokio::test]
    async fn plain_backend_skips_install_and_destroy() {
        let environment = ToolEnvironment::plain("noop");
        let installed = environment.install(&[], true).await.unwrap();
        assert!(installed.is_empty());
        environment.destroy().await;
    }
}
