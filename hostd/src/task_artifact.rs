//! Artifact download and cleanup handlers
//!
//! Downloads OS images and templates from HTTP sources into the local
//! artifact store, streaming to disk with periodic progress reports and
//! optional checksum verification through the platform `digest` command.

use futures_util::StreamExt;
use serde::Deserialize;
use std::path::Path;
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

use crate::tasks::{require_params, HandlerOutcome, TaskContext};

/// How often progress is persisted while a download is streaming.
const PROGRESS_INTERVAL: Duration = Duration::from_secs(2);

/// Large images take a while even on fast links.
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(60 * 60);

/// Destination paths come from the operator; keep them absolute, traversal
/// free and shell-quiet since the verification step interpolates them.
fn validate_artifact_path(path: &str) -> Result<(), String> {
    if !path.starts_with('/') {
        return Err("Artifact path must be absolute".to_string());
    }
    if path.contains("..") {
        return Err("Artifact path cannot contain '..'".to_string());
    }
    if path.len() > 1024 {
        return Err("Artifact path too long".to_string());
    }
    if !path
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '/' | '.' | '_' | '-' | '+'))
    {
        return Err("Artifact path contains invalid characters".to_string());
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
struct DownloadParams {
    url: String,
    destination_path: String,
    /// Expected digest, hex.
    #[serde(default)]
    checksum: Option<String>,
    /// Digest algorithm understood by digest(1): sha1, sha256, sha512, md5.
    #[serde(default = "default_checksum_algorithm")]
    checksum_algorithm: String,
    #[serde(default)]
    overwrite: bool,
}

fn default_checksum_algorithm() -> String {
    "sha256".to_string()
}

pub async fn download_url(metadata: Option<&str>, ctx: &TaskContext) -> HandlerOutcome {
    let params: DownloadParams = match require_params(metadata) {
        Ok(params) => params,
        Err(outcome) => return outcome,
    };

    let source = match url::Url::parse(&params.url) {
        Ok(source) if matches!(source.scheme(), "http" | "https") => source,
        Ok(source) => {
            return HandlerOutcome::failure(format!(
                "Unsupported download scheme: {}",
                source.scheme()
            ))
        }
        Err(e) => return HandlerOutcome::failure(format!("Invalid download URL: {}", e)),
    };
    if let Err(e) = validate_artifact_path(&params.destination_path) {
        return HandlerOutcome::failure(e);
    }
    if let Some(checksum) = &params.checksum {
        if checksum.is_empty() || !checksum.chars().all(|c| c.is_ascii_hexdigit()) {
            return HandlerOutcome::failure("Checksum must be a hex digest");
        }
        if !matches!(
            params.checksum_algorithm.as_str(),
            "sha1" | "sha256" | "sha512" | "md5"
        ) {
            return HandlerOutcome::failure(format!(
                "Unsupported checksum algorithm: {}",
                params.checksum_algorithm
            ));
        }
    }

    let destination = Path::new(&params.destination_path);
    if destination.exists() && !params.overwrite {
        return HandlerOutcome::failure(format!(
            "Destination {} already exists",
            params.destination_path
        ));
    }
    if let Some(parent) = destination.parent() {
        if let Err(e) = tokio::fs::create_dir_all(parent).await {
            return HandlerOutcome::failure(format!(
                "Failed to create {}: {}",
                parent.display(),
                e
            ));
        }
    }

    // Stream to a partial file; rename only after the digest checks out so
    // a crashed download never masquerades as a finished artifact.
    let partial_path = format!("{}.partial", params.destination_path);
    let outcome = stream_download(ctx, &source, &partial_path).await;
    let (total_bytes, elapsed) = match outcome {
        Ok(stats) => stats,
        Err(e) => {
            let _ = tokio::fs::remove_file(&partial_path).await;
            return HandlerOutcome::failure(e);
        }
    };

    if let Some(expected) = &params.checksum {
        ctx.update_progress(
            95.0,
            Some(serde_json::json!({ "status": "verifying_checksum" })),
        )
        .await;
        if let Err(e) = verify_checksum(
            ctx,
            &partial_path,
            &params.checksum_algorithm,
            expected,
        )
        .await
        {
            let _ = tokio::fs::remove_file(&partial_path).await;
            return HandlerOutcome::failure(e);
        }
    }

    if let Err(e) = tokio::fs::rename(&partial_path, &params.destination_path).await {
        let _ = tokio::fs::remove_file(&partial_path).await;
        return HandlerOutcome::failure(format!(
            "Failed to move download into place: {}",
            e
        ));
    }

    let speed_mbps = if elapsed.as_secs_f64() > 0.0 {
        (total_bytes as f64 / (1024.0 * 1024.0)) / elapsed.as_secs_f64()
    } else {
        0.0
    };
    info!(
        url = %params.url,
        destination = %params.destination_path,
        bytes = total_bytes,
        "Artifact downloaded"
    );
    HandlerOutcome::success_with(
        format!(
            "Downloaded {:.1} MB to {}",
            total_bytes as f64 / (1024.0 * 1024.0),
            params.destination_path
        ),
        serde_json::json!({
            "bytes": total_bytes,
            "seconds": elapsed.as_secs_f64(),
            "speed_mbps": speed_mbps,
        }),
    )
}

/// Stream the response body to disk, reporting progress at a fixed cadence.
/// Returns (bytes written, elapsed time).
async fn stream_download(
    ctx: &TaskContext,
    source: &url::Url,
    partial_path: &str,
) -> Result<(u64, Duration), String> {
    let started = Instant::now();
    let response = ctx
        .http_client()
        .get(source.clone())
        .timeout(DOWNLOAD_TIMEOUT)
        .send()
        .await
        .map_err(|e| format!("Download request failed: {}", e))?;
    if !response.status().is_success() {
        return Err(format!("Download failed: HTTP {}", response.status()));
    }

    let total_size = response.content_length();
    let mut file = tokio::fs::File::create(partial_path)
        .await
        .map_err(|e| format!("Failed to create {}: {}", partial_path, e))?;

    let mut stream = response.bytes_stream();
    let mut downloaded: u64 = 0;
    let mut last_report = Instant::now();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| format!("Download stream error: {}", e))?;
        file.write_all(&chunk)
            .await
            .map_err(|e| format!("Failed to write {}: {}", partial_path, e))?;
        downloaded += chunk.len() as u64;

        if last_report.elapsed() >= PROGRESS_INTERVAL {
            last_report = Instant::now();
            let elapsed = started.elapsed().as_secs_f64();
            let downloaded_mb = downloaded as f64 / (1024.0 * 1024.0);
            let speed_mbps = if elapsed > 0.0 { downloaded_mb / elapsed } else { 0.0 };
            // Leave headroom for verification; an unknown total pins the
            // bar at a token value rather than guessing.
            let percent = match total_size {
                Some(total) if total > 0 => (downloaded as f64 / total as f64) * 90.0,
                _ => 10.0,
            };
            ctx.update_progress(
                percent,
                Some(serde_json::json!({
                    "status": "downloading",
                    "downloaded_mb": downloaded_mb,
                    "total_mb": total_size.map(|t| t as f64 / (1024.0 * 1024.0)),
                    "speed_mbps": speed_mbps,
                })),
            )
            .await;
        }
    }

    file.flush()
        .await
        .map_err(|e| format!("Failed to flush {}: {}", partial_path, e))?;
    Ok((downloaded, started.elapsed()))
}

/// Compare the on-disk digest against the expected value using digest(1).
async fn verify_checksum(
    ctx: &TaskContext,
    path: &str,
    algorithm: &str,
    expected: &str,
) -> Result<(), String> {
    let executor = ctx.executor();
    let result = executor
        .execute_with_timeout(
            &format!("digest -a {} {}", algorithm, path),
            Duration::from_secs(600),
        )
        .await;
    if !result.ok {
        return Err(format!(
            "Checksum computation failed: {}",
            result.error.unwrap_or_else(|| "unknown error".to_string())
        ));
    }
    let actual = result.stdout.trim();
    if actual.eq_ignore_ascii_case(expected.trim()) {
        Ok(())
    } else {
        warn!(path = %path, expected = %expected, actual = %actual, "Checksum mismatch");
        Err(format!(
            "Checksum mismatch: expected {}, got {}",
            expected, actual
        ))
    }
}

#[derive(Debug, Deserialize)]
struct DeleteParams {
    path: String,
}

pub async fn delete(metadata: Option<&str>, ctx: &TaskContext) -> HandlerOutcome {
    let params: DeleteParams = match require_params(metadata) {
        Ok(params) => params,
        Err(outcome) => return outcome,
    };
    if let Err(e) = validate_artifact_path(&params.path) {
        return HandlerOutcome::failure(e);
    }

    match tokio::fs::remove_file(&params.path).await {
        Ok(()) => {
            info!(path = %params.path, "Artifact deleted");
            HandlerOutcome::success(format!("Deleted {}", params.path))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            HandlerOutcome::failure(format!("Artifact {} does not exist", params.path))
        }
        Err(e) => {
            // Permission problems fall back to the privileged path.
            let executor = ctx.executor();
            let result = executor
                .execute(&executor.privileged(&format!("rm {}", params.path)))
                .await;
            if result.ok {
                HandlerOutcome::success(format!("Deleted {}", params.path))
            } else {
                HandlerOutcome::failure(format!("Failed to delete {}: {}", params.path, e))
            }
        }
    }
}
