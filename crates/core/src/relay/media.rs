//! Media category and MIME detection from file extensions.

use std::path::Path;

use serde::{Deserialize, Serialize};

const VIDEO_EXTENSIONS: &[&str] = &[".mp4", ".mkv", ".avi", ".mov", ".wmv", ".flv", ".webm"];
const AUDIO_EXTENSIONS: &[&str] = &[".mp3", ".wav", ".aac", ".flac", ".ogg", ".m4a", ".wma"];

const MIME_TYPES: &[(&str, &str)] = &[
    (".mp4", "video/mp4"),
    (".mkv", "video/x-matroska"),
    (".avi", "video/x-msvideo"),
    (".mov", "video/quicktime"),
    (".wmv", "video/x-ms-wmv"),
    (".flv", "video/x-flv"),
    (".webm", "video/webm"),
    (".mp3", "audio/mpeg"),
    (".wav", "audio/wav"),
    (".aac", "audio/aac"),
    (".flac", "audio/flac"),
    (".ogg", "audio/ogg"),
    (".m4a", "audio/mp4"),
    (".wma", "audio/x-ms-wma"),
    (".pdf", "application/pdf"),
    (".zip", "application/zip"),
    (".txt", "text/plain"),
    (".epub", "application/epub+zip"),
];

const DEFAULT_MIME: &str = "application/octet-stream";

/// Presentation category of a relayed file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Video,
    Audio,
    Document,
}

impl MediaKind {
    /// Classify a file by its extension (case-insensitive).
    pub fn from_path(path: &Path) -> Self {
        let ext = extension(path);
        if VIDEO_EXTENSIONS.contains(&ext.as_str()) {
            MediaKind::Video
        } else if AUDIO_EXTENSIONS.contains(&ext.as_str()) {
            MediaKind::Audio
        } else {
            MediaKind::Document
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Video => "video",
            MediaKind::Audio => "audio",
            MediaKind::Document => "document",
        }
    }
}

/// Extension with its leading dot, lowercased; empty if none.
pub fn extension(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{}", e.to_lowercase()))
        .unwrap_or_default()
}

/// MIME type for a file, falling back to `application/octet-stream`.
pub fn mime_for_path(path: &Path) -> &'static str {
    let ext = extension(path);
    MIME_TYPES
        .iter()
        .find(|(e, _)| *e == ext)
        .map(|(_, mime)| *mime)
        .unwrap_or(DEFAULT_MIME)
}
