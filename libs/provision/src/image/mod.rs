//! Base image fetching and caching.
//!
//! This module handles:
//! - Looking up guest OS keys in the catalog
//! - Downloading (or copying) base images on first use
//! - Atomic placement into the cache so interrupted transfers never count as cached
//! - Deduplicating concurrent fetches of the same image

mod cache;
mod fetch;

pub use cache::{cache_file_name, CachedImage, DiskFormat, ImageResolver};
pub use fetch::{Fetcher, ImageFetcher, ImageSource};
