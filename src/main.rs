mod cli;
mod commands;
mod drive;
mod env_loader;
mod error;
mod logging;
mod migrate;
mod remote;
mod zoom;

use crate::error::SyncError;

fn main() {
    env_loader::load_dotenv();

    if let Err(err) = cli::run() {
        match err.downcast_ref::<SyncError>() {
            Some(sync_err) => eprintln!("error[{}]: {err:#}", sync_err.code().as_str()),
            None => eprintln!("error: {err:#}"),
        }
        std::process::exit(1);
    }
}
