#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;

use maprelay::config::ServerConfig;
use maprelay::presets::{Preset, PresetStore, Step};
use maprelay::server;
use maprelay::session::SessionContext;

/// Serve `router` on an ephemeral loopback port for the rest of the test.
pub async fn spawn_server(ctx: SessionContext) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = server::router(Arc::new(ctx));
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

pub fn context(config: ServerConfig, presets_file: &Path, presets: Vec<Preset>) -> SessionContext {
    let store = PresetStore::new(presets_file);
    for preset in presets {
        store.set(preset, &config).unwrap();
    }
    SessionContext::new(config, store)
}

pub fn step(program: &str, args: &[&str]) -> Step {
    Step {
        program: program.to_string(),
        args: args.iter().map(|a| a.to_string()).collect(),
    }
}

pub fn preset(name: &str, steps: Vec<Step>) -> Preset {
    Preset {
        name: name.to_string(),
        steps,
    }
}

#[cfg(unix)]
pub fn script(dir: &Path, name: &str, body: &str) -> String {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path.to_string_lossy().to_string()
}

/// Send one raw request frame and collect every text frame until the server
/// closes the connection.
pub async fn exchange(addr: SocketAddr, request: &str) -> Vec<String> {
    let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{}", addr))
        .await
        .unwrap();
    ws.send(Message::Text(request.to_string())).await.unwrap();

    let mut frames = Vec::new();
    let collect = async {
        while let Some(Ok(frame)) = ws.next().await {
            match frame {
                Message::Text(text) => frames.push(text),
                Message::Close(_) => break,
                _ => {}
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(30), collect)
        .await
        .expect("session did not finish");

    frames
}
