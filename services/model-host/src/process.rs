//! Out-of-process models. The package command is spawned in the package directory and driven
//! with one JSON request per line on stdin, one JSON reply per line on stdout.
//!
//! Requests: `{"op":"setup"}`, `{"op":"fit",...}`, `{"op":"predict",...}`, `{"op":"shutdown"}`.
//! Replies: `{"ok":true}`, `{"ok":true,"predictions":{...}}`, `{"ok":false,"error":"..."}`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::{debug, info, warn};

use crate::analysis::DataAnalysis;
use crate::error::ModelFault;
use crate::model::{Model, PredictionFrame};
use crate::rows::{Options, Row, RowSet};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum Request<'a> {
    Setup,
    Fit { rows: &'a [Row], target: &'a str, analysis: &'a DataAnalysis, options: &'a Options },
    Predict { rows: &'a [Row], options: &'a Options },
    Shutdown,
}

#[derive(Debug, Deserialize)]
struct Reply {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    predictions: Option<PredictionFrame>,
}

struct Running {
    child: Child,
    stdin: ChildStdin,
    stdout: Lines<BufReader<ChildStdout>>,
}

pub struct ProcessModel {
    label: String,
    command: Vec<String>,
    workdir: PathBuf,
    running: Option<Running>,
    /// Set while a request awaits its reply; still set on entry means the last call was abandoned mid-exchange.
    in_flight: bool,
}

impl ProcessModel {
    pub fn new(label: &str, command: Vec<String>, workdir: PathBuf) -> Self {
        Self { label: label.to_string(), command, workdir, running: None, in_flight: false }
    }

    fn spawn(&mut self) -> Result<(), ModelFault> {
        let (prog, args) = self.command.split_first().ok_or_else(|| ModelFault::Process("empty command".into()))?;
        let mut cmd = Command::new(prog);
        cmd.args(args)
            .current_dir(&self.workdir)
            .env_clear()
            .env("HOME", &self.workdir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(path) = std::env::var_os("PATH") { cmd.env("PATH", path); }
        let mut child = cmd.spawn().map_err(|e| ModelFault::Process(format!("spawn `{prog}`: {e}")))?;
        let stdin = child.stdin.take().ok_or_else(|| ModelFault::Process("stdin not captured".into()))?;
        let stdout = child.stdout.take().ok_or_else(|| ModelFault::Process("stdout not captured".into()))?;
        if let Some(stderr) = child.stderr.take() {
            let label = self.label.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(target: "model_stderr", model = %label, "{line}");
                }
            });
        }
        info!(model = %self.label, pid = ?child.id(), workdir = %self.workdir.display(), "model process started");
        self.running = Some(Running { child, stdin, stdout: BufReader::new(stdout).lines() });
        self.in_flight = false;
        Ok(())
    }

    /// Drop a process whose stream can no longer be trusted.
    fn discard(&mut self, why: &str) {
        if let Some(mut r) = self.running.take() {
            warn!(model = %self.label, reason = why, "discarding model process");
            let _ = r.child.start_kill();
        }
        self.in_flight = false;
    }

    fn check_abandoned(&mut self) {
        if self.in_flight { self.discard("previous request abandoned"); }
    }

    async fn exchange(&mut self, req: &Request<'_>) -> Result<Reply, ModelFault> {
        let running = self.running.as_mut().ok_or_else(|| ModelFault::Process("model process is not running".into()))?;
        let mut line = serde_json::to_vec(req).map_err(|e| ModelFault::Protocol(format!("encode request: {e}")))?;
        line.push(b'\n');
        self.in_flight = true;
        let io = async {
            running.stdin.write_all(&line).await?;
            running.stdin.flush().await?;
            running.stdout.next_line().await
        };
        let reply = match io.await {
            Ok(Some(text)) => text,
            Ok(None) => {
                let status = running.child.try_wait().ok().flatten();
                self.discard("stdout closed");
                return Err(ModelFault::Process(match status {
                    Some(s) => format!("exited with {s} before replying"),
                    None => "closed stdout before replying".into(),
                }));
            }
            Err(e) => {
                self.discard("io error");
                return Err(ModelFault::Process(format!("pipe: {e}")));
            }
        };
        self.in_flight = false;
        let reply: Reply = match serde_json::from_str(&reply) {
            Ok(r) => r,
            Err(e) => {
                self.discard("unparseable reply");
                return Err(ModelFault::Protocol(format!("reply is not JSON ({e}): {}", truncate(&reply))));
            }
        };
        if !reply.ok {
            return Err(ModelFault::Raised(reply.error.clone().unwrap_or_else(|| "model reported failure without message".into())));
        }
        Ok(reply)
    }
}

fn truncate(s: &str) -> String {
    if s.len() <= 200 { return s.to_string(); }
    let mut end = 200;
    while !s.is_char_boundary(end) { end -= 1; }
    format!("{}...", &s[..end])
}

#[async_trait]
impl Model for ProcessModel {
    fn kind(&self) -> String { "process".into() }

    async fn setup(&mut self) -> Result<(), ModelFault> {
        self.check_abandoned();
        if self.running.is_none() { self.spawn()?; }
        self.exchange(&Request::Setup).await.map(|_| ())
    }

    async fn fit(&mut self, rows: &RowSet, target: &str, analysis: &DataAnalysis, options: &Options) -> Result<(), ModelFault> {
        self.check_abandoned();
        if self.running.is_none() {
            // Trained state died with the old process; a fresh one needs its setup again.
            warn!(model = %self.label, "restarting model process for fit");
            self.spawn()?;
            self.exchange(&Request::Setup).await?;
        }
        self.exchange(&Request::Fit { rows: rows.rows(), target, analysis, options }).await.map(|_| ())
    }

    async fn predict(&mut self, rows: &RowSet, options: &Options) -> Result<PredictionFrame, ModelFault> {
        self.check_abandoned();
        let reply = self.exchange(&Request::Predict { rows: rows.rows(), options }).await?;
        reply.predictions.ok_or_else(|| ModelFault::Protocol("predict reply carries no `predictions`".into()))
    }

    async fn shutdown(&mut self) {
        self.check_abandoned();
        let Some(mut r) = self.running.take() else { return };
        let mut line = serde_json::to_vec(&Request::Shutdown).unwrap_or_default();
        line.push(b'\n');
        let polite = async {
            let _ = r.stdin.write_all(&line).await;
            let _ = r.stdin.flush().await;
            r.child.wait().await
        };
        match tokio::time::timeout(SHUTDOWN_GRACE, polite).await {
            Ok(Ok(status)) => debug!(model = %self.label, %status, "model process exited"),
            _ => {
                warn!(model = %self.label, "model process ignored shutdown; killing");
                let _ = r.child.kill().await;
            }
        }
    }
}

impl Drop for ProcessModel {
    fn drop(&mut self) {
        if let Some(r) = self.running.as_mut() { let _ = r.child.start_kill(); }
    }
}
