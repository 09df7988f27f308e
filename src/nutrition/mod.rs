//! Ingredient image synchronization.

pub mod config;
pub mod http;
pub mod models;
pub mod off;
pub mod store;
pub mod sync;

#[cfg(test)]
pub(crate) mod testing;

pub use config::{DownloadMode, SyncConfig};
pub use http::{HttpSource, ReqwestSource};
pub use models::{Image, Ingredient, NewImage, RemoteImage};
pub use store::{ImageStore, PgStore, StoreError};
pub use sync::{BatchSummary, FetchOutcome, ImageSync, SkipReason, SyncSummary};
