pub mod assets;
pub mod builder;
pub mod handler;
pub mod listener;

pub use assets::prepare_asset_dirs;
pub use builder::ServerBuilder;
pub use handler::{AppHandler, AppState};

use std::net::SocketAddr;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("cannot bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },

    #[error("accept failed: {0}")]
    Accept(std::io::Error),

    #[error("cannot prepare asset directory {path}: {source}")]
    AssetDir {
        path: PathBuf,
        source: std::io::Error,
    },
}
