//! Default Cache Store `fetch_fn`: pulls a model's files from the Hugging
//! Face Hub. Mirrors the teacher's `sources/remote.rs` download discipline —
//! a streaming GET into a `.part` file, renamed into place only once
//! complete — generalized from "one release archive" to "one file per
//! sibling in the repo tree".

use reqwest::Client;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

const HUB_BASE: &str = "https://huggingface.co";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const DOWNLOAD_RETRIES: usize = 3;
const RETRY_BACKOFF: Duration = Duration::from_millis(500);

#[derive(Debug, Deserialize)]
struct HubModelInfo {
    sha: Option<String>,
    siblings: Vec<HubSibling>,
}

#[derive(Debug, Deserialize)]
struct HubSibling {
    rfilename: String,
}

/// Fetch every file in `model_id`'s Hub repo tree into `target_dir`.
/// Returns the repo's commit sha, when the Hub reports one (§4.3: `commit_hash`
/// is optional metadata, its absence never fails population).
pub async fn huggingface_fetch(model_id: &str, target_dir: &Path) -> Result<Option<String>, String> {
    let client = Client::builder().timeout(REQUEST_TIMEOUT).build().map_err(|err| err.to_string())?;

    let info_url = format!("{HUB_BASE}/api/models/{model_id}");
    let info: HubModelInfo = client
        .get(&info_url)
        .send()
        .await
        .map_err(|err| format!("fetching model info from {info_url}: {err}"))?
        .error_for_status()
        .map_err(|err| format!("model info request failed: {err}"))?
        .json()
        .await
        .map_err(|err| format!("parsing model info: {err}"))?;

    info!(model_id, files = info.siblings.len(), "fetching model files from hub");

    for sibling in &info.siblings {
        let file_url = format!("{HUB_BASE}/{model_id}/resolve/main/{}", sibling.rfilename);
        let dest = target_dir.join(&sibling.rfilename);
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).await.map_err(|err| err.to_string())?;
        }
        download_with_retry(&client, &file_url, &dest).await?;
    }

    Ok(info.sha)
}

async fn download_with_retry(client: &Client, url: &str, dest: &Path) -> Result<(), String> {
    let mut last_error = String::new();
    for attempt in 0..=DOWNLOAD_RETRIES {
        match download_once(client, url, dest).await {
            Ok(()) => return Ok(()),
            Err(err) => {
                last_error = err;
                debug!(url, attempt, error = %last_error, "download attempt failed");
                if attempt < DOWNLOAD_RETRIES {
                    tokio::time::sleep(RETRY_BACKOFF * (attempt as u32 + 1)).await;
                }
            }
        }
    }
    Err(format!("giving up on {url} after {} attempts: {last_error}", DOWNLOAD_RETRIES + 1))
}

async fn download_once(client: &Client, url: &str, dest: &Path) -> Result<(), String> {
    let mut response = client
        .get(url)
        .send()
        .await
        .map_err(|err| err.to_string())?
        .error_for_status()
        .map_err(|err| err.to_string())?;

    let temp_path = dest.with_extension("part");
    let mut file = fs::File::create(&temp_path).await.map_err(|err| err.to_string())?;
    while let Some(chunk) = response.chunk().await.map_err(|err| err.to_string())? {
        file.write_all(&chunk).await.map_err(|err| err.to_string())?;
    }
    file.flush().await.map_err(|err| err.to_string())?;
    fs::rename(&temp_path, dest).await.map_err(|err| err.to_string())?;
    Ok(())
}
