use std::path::PathBuf;

use clap::Args;
use serde::Serialize;

use maprelay::client::{self, ClientOptions, CompileSummary};
use maprelay::defaults::{DEFAULT_INPUT_PATH, DEFAULT_PRESET, DEFAULT_SERVER_ADDR};
use maprelay::presets::Preset;

use super::CmdResult;

#[derive(Args, Debug)]
pub struct ClientArgs {
    /// Server address (host:port). No scheme or trailing slash
    #[arg(long, default_value = DEFAULT_SERVER_ADDR)]
    pub server: String,

    /// Use HTTP instead of HTTPS for the preset API
    #[arg(long)]
    pub use_http: bool,

    /// Map source to compile
    #[arg(long, default_value = DEFAULT_INPUT_PATH)]
    pub vmf: PathBuf,

    /// Preset to run
    #[arg(long, default_value = DEFAULT_PRESET)]
    pub preset: String,

    /// Server password, if configured
    #[arg(long, default_value = "", hide_default_value = true)]
    pub password: String,

    /// Upload or replace a preset from a JSON file instead of compiling
    #[arg(long, value_name = "FILE")]
    pub upload_preset: Option<PathBuf>,
}

#[derive(Serialize)]
#[serde(untagged)]
pub enum ClientOutput {
    Compile(CompileSummary),
    UploadPreset { command: String, preset: Preset },
}

pub async fn run(args: ClientArgs) -> CmdResult<ClientOutput> {
    let opts = ClientOptions {
        server: args.server,
        use_http: args.use_http,
        input: args.vmf,
        preset: args.preset,
        password: args.password,
    };

    if let Some(file) = args.upload_preset {
        let preset = client::upload_preset(&opts, &file).await?;
        return Ok((
            ClientOutput::UploadPreset {
                command: "client.upload_preset".to_string(),
                preset,
            },
            0,
        ));
    }

    let summary = client::compile(&opts).await?;
    let exit_code = if summary.finished && summary.errors.is_empty() {
        0
    } else {
        1
    };

    Ok((ClientOutput::Compile(summary), exit_code))
}
