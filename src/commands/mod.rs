use serde::Serialize;

pub type CmdResult<T> = maprelay::Result<(T, i32)>;

pub mod client;
pub mod server;

use crate::Commands;

/// Run a command and flatten its output into the JSON envelope payload.
pub(crate) async fn run_json(command: Commands) -> (maprelay::Result<serde_json::Value>, i32) {
    match command {
        Commands::Server(args) => to_json(server::run(args).await),
        Commands::Client(args) => to_json(client::run(args).await),
    }
}

fn to_json<T: Serialize>(result: CmdResult<T>) -> (maprelay::Result<serde_json::Value>, i32) {
    maprelay::output::map_cmd_result_to_json(result)
}
