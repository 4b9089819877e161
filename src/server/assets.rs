// src/server/assets.rs
use std::path::Path;
use tracing::info;

use super::ServerError;
use crate::config::ServerConfig;

/// Create the media and static roots and prove they are writable before the
/// application needs them. Catches a read-only or mis-owned volume mount at
/// launch instead of on the first upload.
pub async fn prepare_asset_dirs(config: &ServerConfig) -> Result<(), ServerError> {
    for root in [&config.media_root, &config.static_root]
        .into_iter()
        .flatten()
    {
        prepare_dir(root).await?;
        info!("Asset directory ready: {}", root.display());
    }
    Ok(())
}

async fn prepare_dir(root: &Path) -> Result<(), ServerError> {
    let err = |source: std::io::Error| ServerError::AssetDir {
        path: root.to_path_buf(),
        source,
    };

    tokio::fs::create_dir_all(root).await.map_err(err)?;

    let probe = root.join(".writable");
    tokio::fs::write(&probe, b"").await.map_err(err)?;
    tokio::fs::remove_file(&probe).await.map_err(err)?;
    Ok(())
}
