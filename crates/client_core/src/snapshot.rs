//! Export of the currently displayed frame.
//!
//! The session stream is `multipart/x-mixed-replace` with one JPEG per part. A snapshot reads
//! the first complete part, embeds the live parameters as a JPEG comment segment and writes
//! the image next to a JSON sidecar.

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use chrono::{DateTime, Utc};
use futures::StreamExt;
use reqwest::{header::CONTENT_TYPE, Client};
use serde::Serialize;
use shared::domain::{SessionId, SessionParameters};
use tracing::info;
use url::Url;

use crate::error::SnapshotError;

const DEFAULT_BOUNDARY: &str = "frame";
const MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;
const JPEG_SOI: [u8; 2] = [0xFF, 0xD8];
const JPEG_COM: u8 = 0xFE;
const MAX_SEGMENT_PAYLOAD: usize = u16::MAX as usize - 2;

#[derive(Debug, Clone, Serialize)]
pub struct SnapshotMetadata {
    pub session_id: SessionId,
    pub stream_url: String,
    pub parameters: SessionParameters,
    pub description: String,
    pub captured_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct Snapshot {
    pub jpeg: Vec<u8>,
    pub metadata: SnapshotMetadata,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedSnapshot {
    pub image_path: PathBuf,
    pub metadata_path: PathBuf,
}

impl Snapshot {
    pub fn file_stem(&self) -> String {
        format!(
            "snapshot-{}-{}",
            self.metadata.session_id,
            self.metadata.captured_at.format("%Y%m%dT%H%M%S%3f")
        )
    }

    pub async fn write_to(&self, dir: &Path) -> Result<SavedSnapshot, SnapshotError> {
        tokio::fs::create_dir_all(dir).await?;
        let stem = self.file_stem();
        let image_path = dir.join(format!("{stem}.jpg"));
        let metadata_path = dir.join(format!("{stem}.json"));
        tokio::fs::write(&image_path, &self.jpeg).await?;
        tokio::fs::write(&metadata_path, serde_json::to_vec_pretty(&self.metadata)?).await?;
        info!(path = %image_path.display(), "snapshot: saved");
        Ok(SavedSnapshot {
            image_path,
            metadata_path,
        })
    }
}

pub async fn capture(
    http: &Client,
    stream_url: &Url,
    session_id: SessionId,
    parameters: SessionParameters,
    timeout: Duration,
) -> Result<Snapshot, SnapshotError> {
    let response = http
        .get(stream_url.clone())
        .timeout(timeout)
        .send()
        .await?
        .error_for_status()?;
    let boundary = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .and_then(boundary_from_content_type)
        .unwrap_or_else(|| DEFAULT_BOUNDARY.to_string());

    let mut reader = MultipartFrameReader::new(&boundary);
    let mut body = response.bytes_stream();
    while let Some(chunk) = body.next().await {
        let Some(frame) = reader.push(&chunk?)? else {
            continue;
        };
        let description = parameters.describe();
        let jpeg = embed_comment(&frame, &description)?;
        return Ok(Snapshot {
            jpeg,
            metadata: SnapshotMetadata {
                session_id,
                stream_url: stream_url.to_string(),
                parameters,
                description,
                captured_at: Utc::now(),
            },
        });
    }
    Err(SnapshotError::StreamEnded)
}

fn boundary_from_content_type(content_type: &str) -> Option<String> {
    content_type.split(';').find_map(|param| {
        let (key, value) = param.split_once('=')?;
        key.trim()
            .eq_ignore_ascii_case("boundary")
            .then(|| value.trim().trim_matches('"').to_string())
    })
}

/// Incremental parser that yields the first complete part of a multipart image stream.
pub struct MultipartFrameReader {
    delimiter: Vec<u8>,
    buffer: Vec<u8>,
    max_bytes: usize,
}

impl MultipartFrameReader {
    pub fn new(boundary: &str) -> Self {
        Self::with_limit(boundary, MAX_FRAME_BYTES)
    }

    pub fn with_limit(boundary: &str, max_bytes: usize) -> Self {
        Self {
            delimiter: format!("--{boundary}").into_bytes(),
            buffer: Vec::new(),
            max_bytes,
        }
    }

    pub fn push(&mut self, chunk: &[u8]) -> Result<Option<Vec<u8>>, SnapshotError> {
        self.buffer.extend_from_slice(chunk);
        if let Some(frame) = self.first_frame() {
            return Ok(Some(frame));
        }
        if self.buffer.len() > self.max_bytes {
            return Err(SnapshotError::FrameTooLarge {
                limit: self.max_bytes,
            });
        }
        Ok(None)
    }

    fn first_frame(&self) -> Option<Vec<u8>> {
        let part_start = find(&self.buffer, &self.delimiter, 0)? + self.delimiter.len();
        let headers_end = find(&self.buffer, b"\r\n\r\n", part_start)?;
        let body_start = headers_end + 4;
        let headers = String::from_utf8_lossy(&self.buffer[part_start..headers_end]);

        if let Some(len) = content_length(&headers) {
            let body_end = body_start.checked_add(len)?;
            return self
                .buffer
                .get(body_start..body_end)
                .map(<[u8]>::to_vec);
        }

        let mut next_delimiter = b"\r\n".to_vec();
        next_delimiter.extend_from_slice(&self.delimiter);
        if let Some(end) = find(&self.buffer, &next_delimiter, body_start) {
            return Some(self.buffer[body_start..end].to_vec());
        }
        // Parts end with EOI followed by CRLF; the next delimiter only arrives with the
        // next frame.
        find(&self.buffer, b"\xFF\xD9\r\n", body_start)
            .map(|eoi| self.buffer[body_start..eoi + 2].to_vec())
    }
}

fn content_length(headers: &str) -> Option<usize> {
    headers.lines().find_map(|line| {
        let (name, value) = line.split_once(':')?;
        if name.trim().eq_ignore_ascii_case("content-length") {
            value.trim().parse().ok()
        } else {
            None
        }
    })
}

fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    haystack
        .get(from..)?
        .windows(needle.len())
        .position(|window| window == needle)
        .map(|pos| pos + from)
}

/// Inserts a COM segment carrying `text` after the JPEG's leading APPn segments.
/// Text longer than a single segment allows is truncated on a character boundary.
pub fn embed_comment(jpeg: &[u8], text: &str) -> Result<Vec<u8>, SnapshotError> {
    if !jpeg.starts_with(&JPEG_SOI) {
        return Err(SnapshotError::NotJpeg);
    }

    let mut insert_at = JPEG_SOI.len();
    while let [0xFF, 0xE0..=0xEF, len_hi, len_lo, ..] = jpeg[insert_at..] {
        let segment_len = u16::from_be_bytes([len_hi, len_lo]) as usize;
        if segment_len < 2 || insert_at + 2 + segment_len > jpeg.len() {
            return Err(SnapshotError::NotJpeg);
        }
        insert_at += 2 + segment_len;
    }

    let mut end = text.len().min(MAX_SEGMENT_PAYLOAD);
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    let payload = &text.as_bytes()[..end];
    let segment_len = (payload.len() + 2) as u16;

    let mut out = Vec::with_capacity(jpeg.len() + payload.len() + 4);
    out.extend_from_slice(&jpeg[..insert_at]);
    out.extend_from_slice(&[0xFF, JPEG_COM]);
    out.extend_from_slice(&segment_len.to_be_bytes());
    out.extend_from_slice(payload);
    out.extend_from_slice(&jpeg[insert_at..]);
    Ok(out)
}

#[cfg(test)]
#[path = "tests/snapshot_tests.rs"]
mod tests;
