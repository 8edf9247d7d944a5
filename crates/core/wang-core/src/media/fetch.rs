//! Attachment download over HTTP

use reqwest::Client;
use std::path::Path;
use std::sync::OnceLock;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{Result, WangError};

/// Largest attachment accepted; Gemini's inline request limit
pub const MAX_ATTACHMENT_BYTES: u64 = 20 * 1024 * 1024;

static HTTP_CLIENT: OnceLock<Client> = OnceLock::new();

fn client() -> &'static Client {
    HTTP_CLIENT.get_or_init(|| {
        Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .unwrap_or_else(|_| Client::new())
    })
}

/// Stream `url` into `dest`, stopping at `max_bytes`. Returns the byte count.
///
/// A partial file may be left at `dest` on failure; callers own its cleanup.
pub async fn fetch_to_file(
    url: &str,
    dest: &Path,
    max_bytes: u64,
    cancel: &CancellationToken,
) -> Result<u64> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(WangError::Cancelled),
        fetched = fetch(url, dest, max_bytes) => fetched,
    }
}

async fn fetch(url: &str, dest: &Path, max_bytes: u64) -> Result<u64> {
    let mut response = client().get(url).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(WangError::upstream(format!(
            "attachment download failed ({})",
            status
        )));
    }
    if response.content_length().is_some_and(|len| len > max_bytes) {
        return Err(too_large(max_bytes));
    }

    if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut file = tokio::fs::File::create(dest).await?;
    let mut written = 0u64;
    while let Some(chunk) = response.chunk().await? {
        written += chunk.len() as u64;
        if written > max_bytes {
            return Err(too_large(max_bytes));
        }
        file.write_all(&chunk).await?;
    }
    file.flush().await?;

    debug!(path = %dest.display(), bytes = written, "Attachment saved");
    Ok(written)
}

fn too_large(max_bytes: u64) -> WangError {
    WangError::other(format!(
        "attachment is larger than {} MB",
        max_bytes / (1024 * 1024)
    ))
}
