//! Touch-sound playback: pick a random container file from a configured
//! directory, strip its header, and pace its raw frames out to the client
//! as a sequence of small binary chunks.

use std::path::Path;
use std::time::Duration;

use axum::extract::ws::Message;
use rand::seq::SliceRandom;
use tokio::sync::mpsc;

use crate::audio;
use crate::error::ProxyError;

const CHUNK_SIZE: usize = 5 * 1024;
const PACING: Duration = Duration::from_millis(50);

async fn pick_random_wav(dir: &Path) -> Result<std::path::PathBuf, ProxyError> {
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .map_err(|_| ProxyError::NoTouchFiles(dir.display().to_string()))?;

    let mut candidates = Vec::new();
    while let Ok(Some(entry)) = entries.next_entry().await {
        let path = entry.path();
        if path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case("wav"))
            .unwrap_or(false)
        {
            candidates.push(path);
        }
    }

    candidates
        .choose(&mut rand::thread_rng())
        .cloned()
        .ok_or_else(|| ProxyError::NoTouchFiles(dir.display().to_string()))
}

/// Select a random `.wav` under `dir`, amount is accepted for a future
/// pressure-sensitive sound set but does not today affect selection, and
/// stream its raw frames to `client_tx` in ~5 KiB paced chunks.
pub async fn play(
    dir: &Path,
    _amount: Option<f32>,
    client_tx: &mpsc::Sender<Message>,
) -> Result<(), ProxyError> {
    let path = pick_random_wav(dir).await?;
    tracing::info!(path = %path.display(), "playing touch sound");

    let bytes = tokio::fs::read(&path).await?;
    let raw_frames = match audio::parse(&bytes) {
        Ok(parsed) => parsed.raw_frames.to_vec(),
        Err(err) => {
            tracing::warn!(%err, path = %path.display(), "touch file is not a well-formed container, sending raw bytes");
            bytes
        }
    };

    for chunk in raw_frames.chunks(CHUNK_SIZE) {
        if client_tx
            .send(Message::Binary(chunk.to_vec()))
            .await
            .is_err()
        {
            break;
        }
        tokio::time::sleep(PACING).await;
    }

    Ok(())
}
