use clap::{Parser, Subcommand};

mod commands;
mod logging;

use commands::{client, server};
use maprelay::output;

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(name = "maprelay")]
#[command(version = VERSION)]
#[command(about = "Remote map compile server and client")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Accept compile sessions and preset updates
    Server(server::ServerArgs),
    /// Send a map to a server for compiling, or upload a preset
    Client(client::ClientArgs),
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    let cli = Cli::parse();

    logging::init();

    let (json_result, exit_code) = commands::run_json(cli.command).await;

    if let Err(err) = output::print_json_result(json_result) {
        tracing::error!(error = %err.reason(), "failed to print result");
    }

    std::process::ExitCode::from(exit_code_to_u8(exit_code))
}

fn exit_code_to_u8(code: i32) -> u8 {
    if code <= 0 {
        0
    } else if code >= 255 {
        255
    } else {
        code as u8
    }
}
