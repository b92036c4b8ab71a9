// Step execution - spawn one external tool and stream its output to the peer
//
// Both output pipes are drained concurrently and every line is forwarded as
// soon as it is read. Lines keep their order within a pipe; stdout and
// stderr may interleave arbitrarily.
//
// The child is spawned with kill_on_drop, so dropping the step future (peer
// disconnected, session cancelled) terminates the process.

use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;

use crate::error::{Error, Result};
use crate::outbound::{MessageSink, Outbound};
use crate::platform::Invocation;
use crate::protocol::ServerMessage;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepOutcome {
    pub exit_code: Option<i32>,
    pub lines: usize,
}

/// Run `invocation` to completion, tagging output with `program_key`.
///
/// Returns once both pipes hit end-of-stream and the process has exited.
pub async fn run_step<S: MessageSink>(
    program_key: &str,
    invocation: &Invocation,
    outbound: &Outbound<S>,
) -> Result<StepOutcome> {
    let mut cmd = Command::new(&invocation.program);
    cmd.args(&invocation.args)
        .envs(invocation.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    if !invocation.working_dir.as_os_str().is_empty() {
        cmd.current_dir(&invocation.working_dir);
    }

    let mut child = cmd.spawn().map_err(|e| {
        Error::process_spawn_failed(program_key, &invocation.program, e.to_string())
    })?;

    tracing::debug!(
        program = program_key,
        pid = child.id().unwrap_or(0),
        command = %invocation.program,
        "spawned step process"
    );

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    // First failed write wins; the other reader is dropped with it.
    let lines = match tokio::try_join!(
        forward_lines(stdout, program_key, outbound),
        forward_lines(stderr, program_key, outbound),
    ) {
        Ok((out, err)) => out + err,
        Err(e) => {
            let _ = child.kill().await;
            return Err(e);
        }
    };

    let status = child.wait().await.map_err(|e| {
        Error::process_exit_failed(program_key, &invocation.program, e.to_string(), None)
    })?;

    if !status.success() {
        return Err(Error::process_exit_failed(
            program_key,
            &invocation.program,
            status.to_string(),
            status.code(),
        ));
    }

    Ok(StepOutcome {
        exit_code: status.code(),
        lines,
    })
}

/// Forward every line of `pipe` until end-of-stream. Only a failed write to
/// the peer is an error; a read error ends the stream like EOF does.
async fn forward_lines<R, S>(
    pipe: Option<R>,
    program_key: &str,
    outbound: &Outbound<S>,
) -> Result<usize>
where
    R: AsyncRead + Unpin,
    S: MessageSink,
{
    let Some(pipe) = pipe else {
        return Ok(0);
    };

    let mut reader = BufReader::new(pipe);
    let mut buf = Vec::new();
    let mut count = 0;

    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(program = program_key, error = %e, "output pipe read failed");
                break;
            }
        }

        // Tools built for Windows emit CRLF and non-UTF-8 code pages.
        let line = String::from_utf8_lossy(&buf);
        let line = line.trim_end_matches(['\n', '\r']).to_string();

        outbound
            .send(ServerMessage::Output {
                program: program_key.to_string(),
                line,
            })
            .await?;
        count += 1;
    }

    Ok(count)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tokio::sync::mpsc;

    fn sh(script: &str) -> Invocation {
        Invocation {
            program: "/bin/sh".to_string(),
            args: vec!["-c".to_string(), script.to_string()],
            working_dir: PathBuf::new(),
            env: Vec::new(),
            wrapped: false,
        }
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<String>) -> Vec<String> {
        let mut out = Vec::new();
        while let Ok(m) = rx.try_recv() {
            out.push(m);
        }
        out
    }

    #[tokio::test]
    async fn forwards_both_streams_tagged_by_program() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let outbound = Outbound::new(tx);

        let outcome = run_step(
            "vbsp",
            &sh("echo one; echo two; echo oops 1>&2"),
            &outbound,
        )
        .await
        .unwrap();

        assert_eq!(outcome.exit_code, Some(0));
        assert_eq!(outcome.lines, 3);

        let frames = drain(&mut rx);
        assert_eq!(frames.len(), 3);
        let one = frames.iter().position(|f| f.contains("\"one\"")).unwrap();
        let two = frames.iter().position(|f| f.contains("\"two\"")).unwrap();
        assert!(one < two);
        assert!(frames.iter().all(|f| f.starts_with(r#"{"type":"vbsp""#)));
        assert!(frames.iter().any(|f| f.contains("oops")));
    }

    #[tokio::test]
    async fn strips_carriage_returns() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let outbound = Outbound::new(tx);

        run_step("vrad", &sh("printf 'done\\r\\n'"), &outbound)
            .await
            .unwrap();

        assert_eq!(drain(&mut rx), vec![r#"{"type":"vrad","message":"done"}"#]);
    }

    #[tokio::test]
    async fn nonzero_exit_is_process_error() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let outbound = Outbound::new(tx);

        let err = run_step("vvis", &sh("exit 3"), &outbound).await.unwrap_err();

        assert_eq!(err.code.as_str(), "process.exit_failed");
        assert_eq!(err.details["exitCode"], 3);
        assert!(err.reason().starts_with("process exited with error: "));
    }

    #[tokio::test]
    async fn missing_executable_is_spawn_error() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let outbound = Outbound::new(tx);
        let inv = Invocation {
            program: "/definitely/not/here/vbsp".to_string(),
            args: Vec::new(),
            working_dir: PathBuf::new(),
            env: Vec::new(),
            wrapped: false,
        };

        let err = run_step("vbsp", &inv, &outbound).await.unwrap_err();

        assert_eq!(err.code.as_str(), "process.spawn_failed");
        assert!(err.reason().starts_with("failed to start: "));
    }

    #[tokio::test]
    async fn env_and_working_dir_are_applied() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let outbound = Outbound::new(tx);
        let mut inv = sh("echo \"$WINEDEBUG\"; pwd");
        inv.env = vec![("WINEDEBUG".to_string(), "-all".to_string())];
        inv.working_dir = dir.path().to_path_buf();

        run_step("vbsp", &inv, &outbound).await.unwrap();

        let frames = drain(&mut rx);
        assert_eq!(frames[0], r#"{"type":"vbsp","message":"-all"}"#);
        let cwd = std::fs::canonicalize(dir.path()).unwrap();
        assert!(frames[1].contains(&*cwd.file_name().unwrap().to_string_lossy()));
    }

    #[tokio::test]
    async fn closed_peer_aborts_step() {
        let (tx, rx) = mpsc::unbounded_channel::<String>();
        drop(rx);
        let outbound = Outbound::new(tx);

        let err = run_step("vbsp", &sh("echo hi; sleep 30"), &outbound)
            .await
            .unwrap_err();

        assert_eq!(err.code.as_str(), "protocol.connection_closed");
    }
}
