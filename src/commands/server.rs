use std::path::PathBuf;
use std::sync::Arc;

use clap::Args;
use serde::Serialize;

use maprelay::defaults::{DEFAULT_CONFIG_PATH, DEFAULT_PORT, DEFAULT_PRESETS_PATH};
use maprelay::log_status;
use maprelay::presets::PresetStore;
use maprelay::session::SessionContext;
use maprelay::{config, server};

use super::CmdResult;

#[derive(Args, Debug)]
pub struct ServerArgs {
    /// Port to listen on
    #[arg(long, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Server config JSON (written with defaults when missing or invalid)
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Preset store JSON
    #[arg(long, default_value = DEFAULT_PRESETS_PATH)]
    pub presets: PathBuf,
}

#[derive(Serialize)]
pub struct ServerOutput {
    command: String,
    port: u16,
    config: String,
    presets_file: String,
    presets: Vec<String>,
    programs: Vec<String>,
    auth_required: bool,
}

pub async fn run(args: ServerArgs) -> CmdResult<ServerOutput> {
    let config = config::load_or_init(&args.config)?;
    let store = PresetStore::open(&args.presets)?;

    let programs: Vec<String> = config.programs.keys().cloned().collect();
    tracing::info!(
        config = %args.config.display(),
        programs = ?programs,
        presets = store.list().len(),
        auth = !config.password.is_empty(),
        "configuration loaded"
    );
    log_status!("server", "Listening on port {}", args.port);

    let ctx = Arc::new(SessionContext::new(config, store));
    server::serve(Arc::clone(&ctx), args.port).await?;

    Ok((
        ServerOutput {
            command: "server".to_string(),
            port: args.port,
            config: args.config.display().to_string(),
            presets_file: ctx.presets.path().display().to_string(),
            presets: ctx.presets.list().into_iter().map(|p| p.name).collect(),
            programs,
            auth_required: !ctx.config.password.is_empty(),
        },
        0,
    ))
}
