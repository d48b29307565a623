//! SFTP file upload

use std::fmt::Display;
use std::path::Path;

use russh::client;
use russh_sftp::client::SftpSession;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::error::ExecError;

fn transfer_err(context: &str, e: impl Display) -> ExecError {
    ExecError::TransferFailed(format!("{context}: {e}"))
}

/// Open the file to upload
pub(crate) async fn open_local(path: &Path) -> Result<File, ExecError> {
    File::open(path).await.map_err(|e| {
        transfer_err("failed to open local file", format!("{}: {e}", path.display()))
    })
}

/// Stream `local` into `remote_path` over a fresh SFTP channel
///
/// No cleanup is attempted if the transfer fails partway.
pub(crate) async fn upload<H: client::Handler>(
    session: &client::Handle<H>,
    mut local: File,
    local_path: &Path,
    remote_path: &str,
) -> Result<u64, ExecError> {
    debug!(local = %local_path.display(), remote = %remote_path, "starting upload");

    let channel = session
        .channel_open_session()
        .await
        .map_err(|e| transfer_err("failed to open SFTP channel", e))?;
    channel
        .request_subsystem(true, "sftp")
        .await
        .map_err(|e| transfer_err("failed to request SFTP subsystem", e))?;

    let sftp = SftpSession::new(channel.into_stream())
        .await
        .map_err(|e| transfer_err("failed to initialize SFTP", e))?;

    let mut remote = sftp
        .create(remote_path)
        .await
        .map_err(|e| transfer_err("failed to create remote file", e))?;

    let bytes = tokio::io::copy(&mut local, &mut remote)
        .await
        .map_err(|e| transfer_err("failed to write remote file", e))?;

    remote
        .shutdown()
        .await
        .map_err(|e| transfer_err("failed to close remote file", e))?;

    if let Err(e) = sftp.close().await {
        debug!(error = %e, "failed to close SFTP session");
    }

    info!(local = %local_path.display(), remote = %remote_path, bytes, "upload complete");
    Ok(bytes)
}
