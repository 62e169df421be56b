mod multipart;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use thiserror::Error;
use tokio::sync::watch;
use uuid::Uuid;

use crate::cancel;
use crate::capture::CapturedPoseFrame;
use crate::config::UploadConfig;

pub use multipart::MultipartForm;

/// Cap on how much of an error response body ends up in messages.
const ERROR_BODY_CAP: usize = 400;
/// Transport timeout on individual status polls.
const POLL_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Error, Debug)]
pub enum UploadError {
    /// Response body was absent or not the expected JSON shape.
    #[error("invalid server response: {0}")]
    InvalidResponse(String),
    /// Non-2xx status, message carries status plus truncated body.
    #[error("server error {status}: {message}")]
    Server { status: u16, message: String },
    #[error("transport error: {0}")]
    Transport(String),
    /// The request-level upload timeout fired.
    #[error("upload timed out")]
    Timeout,
    /// Server reported the scan failed during processing.
    #[error("processing failed: {0}")]
    ProcessingFailed(String),
    /// The poll deadline elapsed with the scan still processing.
    #[error("processing timed out")]
    ProcessingTimeout,
    #[error("upload cancelled")]
    Cancelled,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Upload failure paired with where the cloud was saved locally, so the
/// captured data is never silently dropped.
#[derive(Debug)]
pub struct UploadFailure {
    pub error: UploadError,
    pub fallback_path: Option<PathBuf>,
}

/// Client-observable state of one upload run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanUploadState {
    Idle,
    Uploading,
    Processing { stage: Option<String> },
    Ready { scan_id: String },
    Failed { reason: String },
}

/// Server-reported processing status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanStatus {
    Processing { stage: Option<String> },
    Ready,
    Failed { detail: String },
}

/// Blocking HTTP client for the scan service. The async state machine in
/// [`run_scan_upload`] drives it through `spawn_blocking`.
pub struct ScanClient {
    config: UploadConfig,
}

impl ScanClient {
    pub fn new(config: UploadConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &UploadConfig {
        &self.config
    }

    /// Multipart POST of the serialized cloud and optional pose images.
    /// Returns the opaque scan id the server assigned.
    pub fn upload(&self, ply: &[u8], images: &[CapturedPoseFrame]) -> Result<String, UploadError> {
        let mut form = MultipartForm::new().file_part(
            "ply",
            "scan.ply",
            "application/octet-stream",
            ply,
        );

        for image in images {
            form = form.file_part(
                &format!("image_{}", image.pose.name()),
                &format!("{}.jpg", image.pose.name()),
                "image/jpeg",
                &image.jpeg,
            );
        }

        let (content_type, body) = form.finish();
        let url = format!("{}/api/scans", self.config.base_url);

        // {:?} keeps the trailing .0 on whole scales, matching the API
        let response = ureq::post(&url)
            .query("unit_scale", &format!("{:?}", self.config.unit_scale))
            .query("units", &self.config.units)
            .set("Content-Type", &content_type)
            .timeout(self.config.upload_timeout)
            .send_bytes(&body)
            .map_err(map_ureq_error)?;

        let json: serde_json::Value = response
            .into_json()
            .map_err(|error| UploadError::InvalidResponse(error.to_string()))?;

        json.get("scanId")
            .or_else(|| json.get("scan_id"))
            .and_then(|value| value.as_str())
            .map(|scan_id| scan_id.to_string())
            .ok_or_else(|| UploadError::InvalidResponse("missing scanId".to_string()))
    }

    /// One status poll for a scan id.
    pub fn poll_status(&self, scan_id: &str) -> Result<ScanStatus, UploadError> {
        let url = format!("{}/api/scans/{scan_id}/status", self.config.base_url);

        let response = ureq::get(&url)
            .timeout(POLL_REQUEST_TIMEOUT)
            .call()
            .map_err(map_ureq_error)?;

        let json: serde_json::Value = response
            .into_json()
            .map_err(|error| UploadError::InvalidResponse(error.to_string()))?;

        let state = json
            .get("state")
            .or_else(|| json.get("status"))
            .and_then(|value| value.as_str())
            .ok_or_else(|| UploadError::InvalidResponse("missing state".to_string()))?;

        Ok(match state {
            "ready" => ScanStatus::Ready,
            "failed" => ScanStatus::Failed {
                detail: json
                    .get("detail")
                    .or_else(|| json.get("message"))
                    .and_then(|value| value.as_str())
                    .unwrap_or("no detail provided")
                    .to_string(),
            },
            other => {
                if other != "processing" {
                    debug!("unknown scan status {other:?}, treating as processing");
                }
                ScanStatus::Processing {
                    stage: json
                        .get("stage")
                        .and_then(|value| value.as_str())
                        .map(|stage| stage.to_string()),
                }
            }
        })
    }
}

fn map_ureq_error(error: ureq::Error) -> UploadError {
    match error {
        ureq::Error::Status(status, response) => {
            let body = response.into_string().unwrap_or_default();
            UploadError::Server {
                status,
                message: truncate(&body, ERROR_BODY_CAP),
            }
        }
        ureq::Error::Transport(transport) => {
            let message = transport.to_string();
            if message.contains("timed out") || message.contains("timeout") {
                UploadError::Timeout
            } else {
                UploadError::Transport(message)
            }
        }
    }
}

fn truncate(text: &str, cap: usize) -> String {
    if text.len() <= cap {
        return text.to_string();
    }

    let mut end = cap;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…", &text[..end])
}

/// Drive one scan through upload and processing.
///
/// State transitions are published on `state_tx`; the cancellation flag is
/// observed around every suspension point. On upload failure the exact
/// bytes that were being uploaded are written to the fallback directory
/// and the path is carried in the returned [`UploadFailure`].
pub async fn run_scan_upload(
    client: Arc<ScanClient>,
    ply: Vec<u8>,
    images: Vec<CapturedPoseFrame>,
    state_tx: watch::Sender<ScanUploadState>,
    mut cancel_rx: watch::Receiver<bool>,
) -> Result<String, UploadFailure> {
    let set_state = |state: ScanUploadState| {
        let _ = state_tx.send(state);
    };

    set_state(ScanUploadState::Uploading);
    info!("uploading {} point-cloud bytes", ply.len());

    let upload_timeout = client.config().upload_timeout;
    let request = {
        let client = Arc::clone(&client);
        let ply = ply.clone();
        tokio::task::spawn_blocking(move || client.upload(&ply, &images))
    };

    // the request-level timeout is independent of the transport's own and
    // is dropped as soon as the transport completes
    let uploaded = tokio::select! {
        joined = tokio::time::timeout(upload_timeout, request) => match joined {
            Ok(Ok(result)) => result,
            Ok(Err(join_error)) => Err(UploadError::Transport(join_error.to_string())),
            Err(_elapsed) => Err(UploadError::Timeout),
        },
        _ = cancel::cancelled(&mut cancel_rx) => Err(UploadError::Cancelled),
    };

    let scan_id = match uploaded {
        Ok(scan_id) => scan_id,
        Err(error) => {
            let fallback_path = if matches!(error, UploadError::Cancelled) {
                None
            } else {
                save_fallback(&client.config().fallback_dir, &ply)
            };

            set_state(ScanUploadState::Failed {
                reason: error.to_string(),
            });
            return Err(UploadFailure {
                error,
                fallback_path,
            });
        }
    };

    info!("upload accepted, scan id {scan_id}");
    set_state(ScanUploadState::Processing { stage: None });

    let outcome = poll_until_resolved(&client, &scan_id, &state_tx, &mut cancel_rx).await;

    match outcome {
        Ok(()) => {
            set_state(ScanUploadState::Ready {
                scan_id: scan_id.clone(),
            });
            Ok(scan_id)
        }
        Err(error) => {
            set_state(ScanUploadState::Failed {
                reason: error.to_string(),
            });
            Err(UploadFailure {
                error,
                // the cloud reached the server; nothing to save locally
                fallback_path: None,
            })
        }
    }
}

/// Fixed-cadence status polling. Transport errors are absorbed and retried
/// on the next tick; only `ready`, `failed`, the deadline or cancellation
/// end the loop.
async fn poll_until_resolved(
    client: &Arc<ScanClient>,
    scan_id: &str,
    state_tx: &watch::Sender<ScanUploadState>,
    cancel_rx: &mut watch::Receiver<bool>,
) -> Result<(), UploadError> {
    let deadline = tokio::time::Instant::now() + client.config().poll_deadline;
    let interval = client.config().poll_interval;

    loop {
        tokio::select! {
            _ = tokio::time::sleep_until(deadline) => return Err(UploadError::ProcessingTimeout),
            _ = cancel::cancelled(cancel_rx) => return Err(UploadError::Cancelled),
            _ = tokio::time::sleep(interval) => {}
        }

        let poll = {
            let client = Arc::clone(client);
            let scan_id = scan_id.to_string();
            tokio::task::spawn_blocking(move || client.poll_status(&scan_id))
        };

        match poll.await {
            Ok(Ok(ScanStatus::Ready)) => return Ok(()),
            Ok(Ok(ScanStatus::Failed { detail })) => {
                return Err(UploadError::ProcessingFailed(detail))
            }
            Ok(Ok(ScanStatus::Processing { stage })) => {
                if let Some(stage) = &stage {
                    debug!("processing stage: {stage}");
                }
                let _ = state_tx.send(ScanUploadState::Processing { stage });
            }
            Ok(Err(error)) => debug!("status poll failed, retrying on cadence: {error}"),
            Err(join_error) => debug!("status poll task failed: {join_error}"),
        }
    }
}

/// Write the cloud bytes to durable local storage with a unique name.
fn save_fallback(dir: &std::path::Path, ply: &[u8]) -> Option<PathBuf> {
    let path = dir.join(format!("facescan-{}.ply", Uuid::new_v4()));

    match std::fs::write(&path, ply) {
        Ok(()) => {
            warn!("upload failed, scan saved to {}", path.display());
            Some(path)
        }
        Err(error) => {
            warn!("upload failed and fallback write failed too: {error}");
            None
        }
    }
}
