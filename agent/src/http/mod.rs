//! HTTP layer: DDI REST client and bundle downloader

pub mod client;
pub mod download;
