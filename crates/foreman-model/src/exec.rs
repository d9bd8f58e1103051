// Copyright (c) 2024-2026 Foreman Contributors
//
// SPDX-License-Identifier: Apache-2.0
//! CLI-subprocess drivers — external coding assistant binaries.
//!
//! Each supported binary has a static [`CliSpec`] describing its invocation
//! contract: whether the prompt travels on stdin or as a positional argument,
//! the model flag, and the fixed flags that force plain-text output and
//! non-interactive approval.  The process runner is injectable so tests never
//! spawn real binaries.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::error::ProviderError;

/// Maximum characters of an error-report file inlined into an error message.
const REPORT_EXCERPT_CHARS: usize = 2048;

/// Invocation contract for one external assistant binary.
#[derive(Debug)]
pub struct CliSpec {
    /// Driver id (`model.kind` config value).
    pub id: &'static str,
    /// Binary name resolved via PATH.
    pub binary: &'static str,
    /// `true` — prompt on stdin; `false` — prompt as the final positional arg.
    pub prompt_via_stdin: bool,
    /// Flag carrying the model name.
    pub model_flag: &'static str,
    /// Working-directory flag, for binaries that take one explicitly.
    /// The child's current directory is set either way.
    pub workdir_flag: Option<&'static str>,
    /// Fixed flags forcing plain-text output and non-interactive approval.
    pub fixed_args: &'static [&'static str],
}

pub static CLI_SPECS: &[CliSpec] = &[
    CliSpec {
        id: "claude-cli",
        binary: "claude",
        prompt_via_stdin: false,
        model_flag: "--model",
        workdir_flag: None,
        fixed_args: &["-p", "--output-format", "text", "--permission-mode", "acceptEdits"],
    },
    CliSpec {
        id: "gemini-cli",
        binary: "gemini",
        prompt_via_stdin: true,
        model_flag: "-m",
        workdir_flag: None,
        fixed_args: &["--approval-mode", "yolo"],
    },
    CliSpec {
        id: "codex-cli",
        binary: "codex",
        prompt_via_stdin: false,
        model_flag: "-m",
        workdir_flag: Some("-C"),
        fixed_args: &["exec", "--full-auto", "--color", "never"],
    },
];

/// Look up a CLI spec by driver id.
pub fn get_cli_spec(id: &str) -> Option<&'static CliSpec> {
    CLI_SPECS.iter().find(|s| s.id == id)
}

/// A fully assembled subprocess invocation.
#[derive(Debug, Clone)]
pub struct CliInvocation {
    pub binary: String,
    pub args: Vec<String>,
    /// Prompt text written to stdin, for stdin-style binaries.
    pub stdin: Option<String>,
    pub workdir: Option<PathBuf>,
    pub env: Vec<(String, String)>,
}

/// Captured result of one subprocess run.
#[derive(Debug, Clone)]
pub struct ExecOutput {
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
}

/// Process runner seam.  The default spawns the real binary; tests inject a
/// closure returning canned output.
pub type Runner =
    Arc<dyn Fn(CliInvocation) -> BoxFuture<'static, std::io::Result<ExecOutput>> + Send + Sync>;

pub struct CliProvider {
    spec: &'static CliSpec,
    model: String,
    workdir: Option<PathBuf>,
    context_window: u32,
    runner: Runner,
}

impl CliProvider {
    pub fn new(
        spec: &'static CliSpec,
        model: String,
        workdir: Option<PathBuf>,
        context_window: u32,
    ) -> Self {
        Self::with_runner(spec, model, workdir, context_window, Arc::new(default_runner))
    }

    /// Construct with an injected process runner (test seam).
    pub fn with_runner(
        spec: &'static CliSpec,
        model: String,
        workdir: Option<PathBuf>,
        context_window: u32,
        runner: Runner,
    ) -> Self {
        Self {
            spec,
            model,
            workdir,
            context_window,
            runner,
        }
    }

    /// Assemble the invocation for one prompt.
    pub fn invocation(&self, prompt: &str) -> CliInvocation {
        let mut args: Vec<String> = self.spec.fixed_args.iter().map(|s| s.to_string()).collect();
        args.push(self.spec.model_flag.to_string());
        args.push(self.model.clone());
        if let (Some(flag), Some(dir)) = (self.spec.workdir_flag, &self.workdir) {
            args.push(flag.to_string());
            args.push(dir.display().to_string());
        }
        let stdin = if self.spec.prompt_via_stdin {
            Some(prompt.to_string())
        } else {
            args.push(prompt.to_string());
            None
        };
        CliInvocation {
            binary: self.spec.binary.to_string(),
            args,
            stdin,
            workdir: self.workdir.clone(),
            // Assistant binaries must never pop a browser for auth from
            // inside a worker container.
            env: vec![
                ("NO_BROWSER".into(), "1".into()),
                ("BROWSER".into(), "echo".into()),
            ],
        }
    }
}

#[async_trait]
impl crate::ModelProvider for CliProvider {
    fn name(&self) -> &str {
        self.spec.id
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn context_window(&self) -> u32 {
        self.context_window
    }

    async fn send(&self, prompt: &str) -> Result<String, ProviderError> {
        let invocation = self.invocation(prompt);
        debug!(binary = %invocation.binary, args = ?invocation.args, "spawning assistant");

        let out = (self.runner)(invocation)
            .await
            .map_err(|e| ProviderError::Exec {
                binary: self.spec.binary.into(),
                code: -1,
                detail: e.to_string(),
            })?;

        if out.code != 0 {
            return Err(ProviderError::Exec {
                binary: self.spec.binary.into(),
                code: out.code,
                detail: exec_error_detail(&out.stderr),
            });
        }

        let text = out.stdout.trim();
        if text.is_empty() {
            return Err(ProviderError::EmptyResponse);
        }
        Ok(text.to_string())
    }
}

fn default_runner(invocation: CliInvocation) -> BoxFuture<'static, std::io::Result<ExecOutput>> {
    Box::pin(async move {
        let mut cmd = tokio::process::Command::new(&invocation.binary);
        cmd.args(&invocation.args)
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);
        for (k, v) in &invocation.env {
            cmd.env(k, v);
        }
        if let Some(dir) = &invocation.workdir {
            cmd.current_dir(dir);
        }
        cmd.stdin(if invocation.stdin.is_some() {
            std::process::Stdio::piped()
        } else {
            std::process::Stdio::null()
        });

        let mut child = cmd.spawn()?;
        if let Some(text) = &invocation.stdin {
            if let Some(mut stdin) = child.stdin.take() {
                stdin.write_all(text.as_bytes()).await?;
                // Close stdin so the child sees EOF.
                drop(stdin);
            }
        }
        let out = child.wait_with_output().await?;
        Ok(ExecOutput {
            code: out.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&out.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&out.stderr).into_owned(),
        })
    })
}

/// Build the error detail for a failed run: the stderr tail, plus a bounded
/// excerpt of any error-report file referenced there.
fn exec_error_detail(stderr: &str) -> String {
    let mut detail = crate::error::body_snippet(stderr);
    if let Some(path) = extract_report_path(stderr) {
        if let Ok(report) = std::fs::read_to_string(&path) {
            let excerpt: String = report.chars().take(REPORT_EXCERPT_CHARS).collect();
            detail.push_str(&format!(
                "\nerror report ({}):\n{excerpt}",
                path.display()
            ));
        }
    }
    detail
}

/// Find the first absolute path in `stderr` that looks like an error-report
/// file and exists on disk.
fn extract_report_path(stderr: &str) -> Option<PathBuf> {
    stderr
        .split_whitespace()
        .map(|tok| tok.trim_end_matches([',', '.', ':', ')', ']', '"', '\'']))
        .filter(|tok| tok.starts_with('/'))
        .filter(|tok| {
            ["log", "json", "txt"]
                .iter()
                .any(|ext| Path::new(tok).extension().map(|e| e == *ext).unwrap_or(false))
        })
        .map(PathBuf::from)
        .find(|p| p.is_file())
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
