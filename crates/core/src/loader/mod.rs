//! Payload loading.
//!
//! A [`PayloadLoader`] resolves a content locator to metadata and then
//! downloads the payload under a deadline, reporting progress on a fixed tick.
//! [`TorrentLoader`] implements the timing policy on top of a pluggable
//! [`TorrentBackend`]; [`LibrqbitBackend`] is the production backend.

mod librqbit;
mod torrent_loader;
mod types;

pub use librqbit::LibrqbitBackend;
pub use torrent_loader::TorrentLoader;
pub use types::*;
