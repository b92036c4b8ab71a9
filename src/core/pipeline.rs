use serde::Serialize;

use crate::config::ServerConfig;
use crate::error::{Error, ErrorCode, Result};
use crate::executor;
use crate::outbound::{MessageSink, Outbound};
use crate::platform::{self, Host};
use crate::presets::{Preset, Step};
use crate::programs;
use crate::protocol::ServerMessage;
use crate::variables::VariableMap;

/// Run state: `Idle -> Running(i) -> {Running(i+1) | Failed | Completed}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Running(usize),
    Failed,
    Completed,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PipelineRunStatus {
    Success,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PipelineStepResult {
    pub program: String,
    pub status: PipelineRunStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PipelineRunResult {
    pub steps: Vec<PipelineStepResult>,
    pub status: PipelineRunStatus,
}

impl PipelineRunResult {
    pub fn completed(&self) -> bool {
        self.status == PipelineRunStatus::Success
    }
}

/// Read-only inputs shared by every step of one run.
pub struct RunContext<'a> {
    pub config: &'a ServerConfig,
    pub vars: &'a VariableMap,
    pub host: Host,
}

/// Runs steps strictly in order, stopping at the first failure.
pub struct PipelineRunner<'a, S> {
    ctx: RunContext<'a>,
    outbound: &'a Outbound<S>,
    state: RunState,
}

impl<'a, S: MessageSink> PipelineRunner<'a, S> {
    pub fn new(ctx: RunContext<'a>, outbound: &'a Outbound<S>) -> Self {
        Self {
            ctx,
            outbound,
            state: RunState::Idle,
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// Step failures are reported to the peer and returned in the result.
    /// `Err` means the peer itself is gone.
    pub async fn run(&mut self, preset: &Preset) -> Result<PipelineRunResult> {
        let mut results = Vec::with_capacity(preset.steps.len());
        let mut failed = false;

        for (index, step) in preset.steps.iter().enumerate() {
            if failed {
                results.push(PipelineStepResult {
                    program: step.program.clone(),
                    status: PipelineRunStatus::Skipped,
                    exit_code: None,
                    error: None,
                });
                continue;
            }

            self.state = RunState::Running(index);

            match self.run_step(step).await {
                Ok(exit_code) => {
                    self.outbound
                        .send(ServerMessage::StepDone {
                            program: step.program.clone(),
                        })
                        .await?;
                    results.push(PipelineStepResult {
                        program: step.program.clone(),
                        status: PipelineRunStatus::Success,
                        exit_code,
                        error: None,
                    });
                }
                Err(err) if err.code == ErrorCode::ProtocolConnectionClosed => {
                    self.state = RunState::Failed;
                    return Err(err);
                }
                Err(err) => {
                    tracing::warn!(
                        preset = %preset.name,
                        program = %step.program,
                        code = err.code.as_str(),
                        error = %err.reason(),
                        "step failed"
                    );
                    self.outbound.send(ServerMessage::error(err.reason())).await?;
                    results.push(PipelineStepResult {
                        program: step.program.clone(),
                        status: PipelineRunStatus::Failed,
                        exit_code: err
                            .details
                            .get("exitCode")
                            .and_then(|v| v.as_i64())
                            .map(|c| c as i32),
                        error: Some(err.reason()),
                    });
                    failed = true;
                    self.state = RunState::Failed;
                }
            }
        }

        let status = if failed {
            PipelineRunStatus::Failed
        } else {
            self.state = RunState::Completed;
            PipelineRunStatus::Success
        };

        Ok(PipelineRunResult {
            steps: results,
            status,
        })
    }

    async fn run_step(&self, step: &Step) -> Result<Option<i32>> {
        let configured = self
            .ctx
            .config
            .program(&step.program)
            .filter(|p| !p.is_empty())
            .ok_or_else(|| Error::program_not_configured(&step.program))?;

        let resolved =
            programs::resolve_program_path(configured, self.ctx.config.base_game_path());
        let args = self.ctx.vars.expand_all(&step.args);
        let invocation = platform::plan(
            &resolved,
            args,
            self.ctx.vars.input_dir(),
            self.ctx.config.wrapper(),
            self.ctx.host,
        );

        self.outbound
            .send(ServerMessage::info(format!(
                "Running {} with args: {}",
                invocation.program,
                invocation.args_json()
            )))
            .await?;

        tracing::info!(
            program = %step.program,
            command = %invocation.program,
            wrapped = invocation.wrapped,
            "running step"
        );

        let outcome = executor::run_step(&step.program, &invocation, self.outbound).await?;

        tracing::info!(program = %step.program, lines = outcome.lines, "step finished");

        Ok(outcome.exit_code)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;
    use tokio::sync::mpsc;

    fn script(dir: &Path, name: &str, body: &str) -> String {
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.to_string_lossy().to_string()
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<String>) -> Vec<String> {
        let mut out = Vec::new();
        while let Ok(m) = rx.try_recv() {
            out.push(m);
        }
        out
    }

    fn step(program: &str, args: &[&str]) -> Step {
        Step {
            program: program.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }

    #[tokio::test]
    async fn empty_pipeline_completes_immediately() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let outbound = Outbound::new(tx);
        let config = ServerConfig::default();
        let vars = VariableMap::resolve(Path::new("/maps/a.vmf"), &config);
        let preset = Preset {
            name: "noop".to_string(),
            steps: Vec::new(),
        };

        let mut runner = PipelineRunner::new(
            RunContext {
                config: &config,
                vars: &vars,
                host: Host::Unix,
            },
            &outbound,
        );
        let result = runner.run(&preset).await.unwrap();

        assert!(result.completed());
        assert_eq!(runner.state(), RunState::Completed);
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn runs_steps_in_order_with_expanded_args() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = ServerConfig::default();
        config.programs.insert(
            "first".to_string(),
            script(dir.path(), "first", "echo \"first $1\""),
        );
        config.programs.insert(
            "second".to_string(),
            script(dir.path(), "second", "echo \"second $1\""),
        );
        let input = dir.path().join("test.vmf");
        let vars = VariableMap::resolve(&input, &config);
        let preset = Preset {
            name: "compile".to_string(),
            steps: vec![step("first", &["$file"]), step("second", &["$bsp"])],
        };
        let (tx, mut rx) = mpsc::unbounded_channel();
        let outbound = Outbound::new(tx);

        let result = PipelineRunner::new(
            RunContext {
                config: &config,
                vars: &vars,
                host: Host::Unix,
            },
            &outbound,
        )
        .run(&preset)
        .await
        .unwrap();

        assert!(result.completed());
        let frames = drain(&mut rx);
        let bsp = dir.path().join("test.bsp");
        let expected_second = format!(
            r#"{{"type":"second","message":"second {}"}}"#,
            bsp.display()
        );
        let idx = |needle: &str| frames.iter().position(|f| f == needle).unwrap();
        let first_out = idx(r#"{"type":"first","message":"first test"}"#);
        let first_done = idx(r#"{"type":"step_done","message":"first"}"#);
        let second_out = idx(&expected_second);
        let second_done = idx(r#"{"type":"step_done","message":"second"}"#);
        assert!(first_out < first_done);
        assert!(first_done < second_out);
        assert!(second_out < second_done);
    }

    #[tokio::test]
    async fn missing_executable_stops_pipeline() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("b-ran");
        let mut config = ServerConfig::default();
        config
            .programs
            .insert("a".to_string(), "/definitely/missing/a".to_string());
        config.programs.insert(
            "b".to_string(),
            script(dir.path(), "b", &format!("touch {}", marker.display())),
        );
        let vars = VariableMap::resolve(&dir.path().join("m.vmf"), &config);
        let preset = Preset {
            name: "broken".to_string(),
            steps: vec![step("a", &[]), step("b", &[])],
        };
        let (tx, mut rx) = mpsc::unbounded_channel();
        let outbound = Outbound::new(tx);

        let mut runner = PipelineRunner::new(
            RunContext {
                config: &config,
                vars: &vars,
                host: Host::Unix,
            },
            &outbound,
        );
        let result = runner.run(&preset).await.unwrap();

        assert_eq!(result.status, PipelineRunStatus::Failed);
        assert_eq!(runner.state(), RunState::Failed);
        assert_eq!(result.steps[0].status, PipelineRunStatus::Failed);
        assert_eq!(result.steps[1].status, PipelineRunStatus::Skipped);
        assert!(result.steps[0]
            .error
            .as_deref()
            .unwrap()
            .starts_with("failed to start: "));
        assert_eq!(result.steps[1].error, None);
        assert!(!marker.exists());
        let frames = drain(&mut rx);
        assert!(frames
            .last()
            .unwrap()
            .starts_with(r#"{"type":"error","message":"failed to start: "#));
        assert!(!frames.iter().any(|f| f.contains("step_done")));
    }

    #[tokio::test]
    async fn unconfigured_program_fails_without_spawning() {
        let config = ServerConfig::default();
        let vars = VariableMap::resolve(Path::new("/maps/a.vmf"), &config);
        let preset = Preset {
            name: "p".to_string(),
            steps: vec![step("vbsp", &["$vmf"])],
        };
        let (tx, mut rx) = mpsc::unbounded_channel();
        let outbound = Outbound::new(tx);

        let result = PipelineRunner::new(
            RunContext {
                config: &config,
                vars: &vars,
                host: Host::Unix,
            },
            &outbound,
        )
        .run(&preset)
        .await
        .unwrap();

        assert_eq!(result.status, PipelineRunStatus::Failed);
        assert_eq!(
            drain(&mut rx),
            vec![r#"{"type":"error","message":"program not configured: vbsp"}"#]
        );
    }
}
