//! Bundles recent articles from RSS/Atom feeds into a dated EPUB.
//!
//! A run fetches every configured feed concurrently, keeps the items inside
//! the recency window, embeds their images and writes one EPUB named after
//! the covered date range, followed by a "Sources" bibliography.

pub mod config;
pub mod document;
pub mod epub;
pub mod feed;
pub mod pipeline;
pub mod publish;
pub mod util;
