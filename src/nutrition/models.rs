use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Source tag stored on ingredients imported from Open Food Facts.
pub const SOURCE_OPEN_FOOD_FACTS: &str = "Open Food Facts";

/// Local ingredient row. Referenced by the sync engine, never written by it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ingredient {
    pub id: i64,
    pub uuid: Uuid,
    pub name: String,
    pub source_name: Option<String>,
    pub source_url: Option<String>,
    pub has_image: bool,
}

impl Ingredient {
    pub fn is_open_food_facts(&self) -> bool {
        self.source_name.as_deref() == Some(SOURCE_OPEN_FOOD_FACTS)
    }

    /// Source URL, treating an empty string like a missing one.
    pub fn source_url(&self) -> Option<&str> {
        self.source_url
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

/// Persisted ingredient image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    pub id: i64,
    pub uuid: Uuid,
    pub ingredient_id: i64,
    pub file_name: String,
    pub size: i64,
    pub license_author: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Attribution and sizing metadata for an image, as served by the
/// `ingredient-image` endpoint of a wger deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteImage {
    pub uuid: Uuid,
    #[serde(default)]
    pub ingredient_uuid: Option<Uuid>,
    /// Absolute URL of the image file.
    pub image: String,
    #[serde(default)]
    pub size: Option<i64>,
    #[serde(default)]
    pub license: Option<i64>,
    #[serde(default)]
    pub license_title: Option<String>,
    #[serde(default)]
    pub license_object_url: Option<String>,
    #[serde(default)]
    pub license_author: Option<String>,
    #[serde(default)]
    pub license_author_url: Option<String>,
    #[serde(default)]
    pub license_derivative_source_url: Option<String>,
}

/// One page of the paginated `ingredient-image` listing.
#[derive(Debug, Clone, Deserialize)]
pub struct ImagePage {
    pub results: Vec<RemoteImage>,
    /// Cursor to the following page, absent on the last one.
    #[serde(default)]
    pub next: Option<String>,
}

/// Everything needed to insert an image row.
#[derive(Debug, Clone)]
pub struct NewImage {
    pub uuid: Uuid,
    pub ingredient_id: i64,
    pub file_name: String,
    pub data: Bytes,
    pub size: i64,
    pub license: Option<i64>,
    pub license_title: Option<String>,
    pub license_object_url: Option<String>,
    pub license_author: Option<String>,
    pub license_author_url: Option<String>,
    pub license_derivative_source_url: Option<String>,
}

impl NewImage {
    /// Builds an image from a peer listing entry, keeping its UUID.
    ///
    /// The size reported by the peer wins; the payload length is the fallback.
    pub fn from_remote(ingredient: &Ingredient, data: Bytes, meta: &RemoteImage) -> Self {
        let size = meta.size.unwrap_or(data.len() as i64);
        Self {
            uuid: meta.uuid,
            ingredient_id: ingredient.id,
            file_name: file_basename(&meta.image).to_string(),
            data,
            size,
            license: meta.license,
            license_title: meta.license_title.clone(),
            license_object_url: meta.license_object_url.clone(),
            license_author: meta.license_author.clone(),
            license_author_url: meta.license_author_url.clone(),
            license_derivative_source_url: meta.license_derivative_source_url.clone(),
        }
    }
}

/// Last path segment of a URL, ignoring any query string or fragment.
pub fn file_basename(url: &str) -> &str {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    path.rsplit('/').next().unwrap_or(path)
}
