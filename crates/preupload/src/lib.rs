//! Pre-upload service (§4.9): resolve local files and base64 blobs to
//! server-side paths before an action that consumes files is sent, via a
//! chunked streaming upload sub-protocol (§6).

use std::{any::Any, path::Path, sync::Arc, time::Duration};

use async_trait::async_trait;
use base64::Engine;
use ncatbot_protocol::ActionSender;
use serde_json::Value;
use tracing::{debug, warn};

/// Default chunk size, picked within the 64 KiB–1 MiB range named by §6.
pub const DEFAULT_CHUNK_SIZE: usize = 256 * 1024;
/// Default server-side retention window for an uploaded path (§6).
pub const DEFAULT_FILE_RETENTION_MS: u64 = 10 * 60 * 1000;

const STREAM_UPLOAD_BEGIN: &str = "stream_upload_begin";
const STREAM_UPLOAD_CHUNK: &str = "stream_upload_chunk";
const STREAM_UPLOAD_END: &str = "stream_upload_end";
const STREAM_UPLOAD_ABORT: &str = "stream_upload_abort";

/// Tuning for [`StreamUploadClient`] (§6 "Pre-upload sub-protocol").
#[derive(Debug, Clone, Copy)]
pub struct UploadConfig {
    pub chunk_size: usize,
    pub file_retention_ms: u64,
    pub chunk_timeout: Duration,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            file_retention_ms: DEFAULT_FILE_RETENTION_MS,
            chunk_timeout: Duration::from_secs(30),
        }
    }
}

/// Drives the `stream_upload_begin | stream_upload_chunk | stream_upload_end`
/// action sequence (§4.9, §6).
pub struct StreamUploadClient {
    sender: Arc<dyn ActionSender>,
    config: UploadConfig,
}

impl StreamUploadClient {
    #[must_use]
    pub fn new(sender: Arc<dyn ActionSender>, config: UploadConfig) -> Self {
        Self { sender, config }
    }

    /// Upload `data` under `name`, returning the server-assigned path. Aborts
    /// the stream and returns an error on the first chunk failure (§4.9).
    pub async fn upload(&self, data: &[u8], name: &str) -> ncatbot_common::Result<String> {
        let begin = self
            .sender
            .call(
                STREAM_UPLOAD_BEGIN,
                serde_json::json!({ "name": name, "size": data.len(), "retention_ms": self.config.file_retention_ms }),
            )
            .await?;
        let stream_id = begin
            .get("stream_id")
            .and_then(Value::as_str)
            .ok_or_else(|| ncatbot_common::Error::message("stream_upload_begin response missing stream_id"))?
            .to_string();

        for (seq, chunk) in data.chunks(self.config.chunk_size.max(1)).enumerate() {
            let encoded = base64::engine::general_purpose::STANDARD.encode(chunk);
            let result = self
                .sender
                .call(
                    STREAM_UPLOAD_CHUNK,
                    serde_json::json!({ "stream_id": stream_id, "seq": seq, "data": encoded }),
                )
                .await;
            if let Err(e) = result {
                warn!(stream_id = %stream_id, seq, error = %e, "chunk upload failed, aborting stream");
                let _ = self.sender.call(STREAM_UPLOAD_ABORT, serde_json::json!({ "stream_id": stream_id })).await;
                return Err(e);
            }
        }

        let end = self.sender.call(STREAM_UPLOAD_END, serde_json::json!({ "stream_id": stream_id })).await?;
        end.get("path")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| ncatbot_common::Error::message("stream_upload_end response missing path"))
    }
}

/// Message segment types whose `file` field the walker resolves (§4.9).
const FILE_BEARING_SEGMENTS: &[&str] = &["image", "record", "video", "file"];

/// The service proper (§4.9): `preupload(value, file_type)` plus the
/// message-array walker that applies it to every file-bearing segment.
pub struct PreuploadService {
    uploader: StreamUploadClient,
}

impl PreuploadService {
    #[must_use]
    pub fn new(sender: Arc<dyn ActionSender>, config: UploadConfig) -> Self {
        Self {
            uploader: StreamUploadClient::new(sender, config),
        }
    }

    /// Resolve one file reference to a server-side path (§4.9):
    /// - a remote URL is returned unchanged;
    /// - a path that exists on local disk is streamed up;
    /// - base64 (data URI or raw) is decoded and streamed up;
    /// - anything else is returned unchanged — the caller's responsibility.
    pub async fn preupload(&self, value: &str, file_type: &str) -> ncatbot_common::Result<String> {
        if value.starts_with("http://") || value.starts_with("https://") {
            return Ok(value.to_string());
        }

        if Path::new(value).is_file() {
            let bytes = tokio::fs::read(value).await?;
            let name = generated_name(file_type, value);
            return self.uploader.upload(&bytes, &name).await;
        }

        if let Some(bytes) = decode_base64(value) {
            let name = generated_name(file_type, value);
            return self.uploader.upload(&bytes, &name).await;
        }

        Ok(value.to_string())
    }

    /// Walk a serialized OneBot-style message array in place, resolving the
    /// `file` field of every `image|record|video|file` segment (§4.9).
    pub async fn process_message(&self, message: &mut Value) -> ncatbot_common::Result<()> {
        let Some(segments) = message.as_array_mut() else {
            return Ok(());
        };

        for segment in segments.iter_mut() {
            let Some(seg_type) = segment.get("type").and_then(Value::as_str).map(str::to_string) else {
                continue;
            };
            if !FILE_BEARING_SEGMENTS.contains(&seg_type.as_str()) {
                continue;
            }
            let Some(file) = segment.get("data").and_then(|d| d.get("file")).and_then(Value::as_str).map(str::to_string)
            else {
                continue;
            };

            let resolved = self.preupload(&file, &seg_type).await?;
            if let Some(data) = segment.get_mut("data") {
                data["file"] = Value::String(resolved);
            }
        }
        Ok(())
    }
}

fn generated_name(file_type: &str, original: &str) -> String {
    let ext = Path::new(original).extension().and_then(std::ffi::OsStr::to_str).unwrap_or("bin");
    format!("{file_type}-{}.{ext}", uuid::Uuid::new_v4())
}

/// Decode `value` as a base64 data URI (`data:...;base64,XXXX`) or as raw
/// base64 (§4.9). Bare strings that merely happen to be valid base64 but are
/// implausibly short are still accepted — the caller only reaches this path
/// once the value wasn't a URL and wasn't an existing local file.
fn decode_base64(value: &str) -> Option<Vec<u8>> {
    let payload = value.strip_prefix("base64://").unwrap_or_else(|| {
        value
            .find("base64,")
            .map(|idx| &value[idx + "base64,".len()..])
            .unwrap_or(value)
    });
    base64::engine::general_purpose::STANDARD.decode(payload).ok()
}

#[async_trait]
impl ncatbot_service::Service for PreuploadService {
    fn as_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}
