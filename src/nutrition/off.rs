//! Helpers for reading Open Food Facts product records.
//!
//! A product record looks roughly like
//! `{"product": {"image_front_url": "...", "images": {"front_en": {"imgid": "5"}, "5": {"uploader": "kiliweb"}}}}`
//! and is treated as an untyped document: only the keys below are read.

use anyhow::{anyhow, Result};
use serde_json::Value;

/// The `product` object of a record. Its absence means the record is not a
/// product record at all.
pub fn product(record: &Value) -> Result<&Value> {
    record
        .get("product")
        .filter(|p| p.is_object())
        .ok_or_else(|| anyhow!("product record has no \"product\" object"))
}

/// Front image URL, if the product has one. Empty strings count as missing.
pub fn front_image_url(product: &Value) -> Option<&str> {
    product
        .get("image_front_url")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// The nested `images` map holding per-image attribution.
pub fn images(product: &Value) -> Result<&Value> {
    product
        .get("images")
        .filter(|v| v.is_object())
        .ok_or_else(|| anyhow!("product record has no \"images\" object"))
}

/// Image key from a front image URL: the last path segment up to its first dot.
///
/// `https://images.openfoodfacts.org/images/products/00975957/front_en.5.400.jpg` → `front_en`
pub fn image_name(url: &str) -> &str {
    let last = url.rsplit('/').next().unwrap_or(url);
    last.split('.').next().unwrap_or(last)
}

/// Which step of the attribution lookup came up empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttributionMiss {
    /// No entry for the image name.
    ImageName(String),
    /// The image name entry has no usable `imgid`, or no entry exists for it.
    ImageId(String),
    /// The image id entry has no `uploader`.
    Uploader(String),
}

impl std::fmt::Display for AttributionMiss {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ImageName(k) => write!(f, "no image entry for {k:?}"),
            Self::ImageId(k) => write!(f, "no image entry for image id {k:?}"),
            Self::Uploader(k) => write!(f, "image {k:?} has no uploader"),
        }
    }
}

/// Resolves the uploader for `image_name`: name → `imgid` → `uploader`.
pub fn uploader_name(images: &Value, image_name: &str) -> Result<String, AttributionMiss> {
    let entry = images
        .get(image_name)
        .ok_or_else(|| AttributionMiss::ImageName(image_name.to_string()))?;

    // imgid is usually a string, but numeric ids show up in older records
    let image_id = match entry.get("imgid") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => return Err(AttributionMiss::ImageId(image_name.to_string())),
    };

    let by_id = images
        .get(&image_id)
        .ok_or_else(|| AttributionMiss::ImageId(image_id.clone()))?;

    by_id
        .get("uploader")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or(AttributionMiss::Uploader(image_id))
}
