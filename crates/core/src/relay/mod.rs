//! Relaying completed payloads to a distribution target.

mod media;
mod telegram;
mod types;

pub use media::{mime_for_path, MediaKind};
pub use telegram::TelegramUploader;
pub use types::*;
