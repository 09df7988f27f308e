//! In-memory stand-ins for the store and HTTP seams, shared by the unit tests.

use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::{anyhow, Result};
use bytes::Bytes;
use chrono::Utc;
use serde_json::Value;
use uuid::Uuid;

use super::http::{Download, HttpSource};
use super::models::{Image, Ingredient, NewImage, SOURCE_OPEN_FOOD_FACTS};
use super::store::{ImageStore, StoreError};

#[derive(Default)]
struct MemoryInner {
    ingredients: Vec<Ingredient>,
    images: Vec<Image>,
    payloads: HashMap<Uuid, Bytes>,
    concurrent_writer: bool,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_ingredient(&self, id: i64, source_name: Option<&str>, source_url: Option<&str>) -> Ingredient {
        let ingredient = Ingredient {
            id,
            uuid: Uuid::new_v4(),
            name: format!("ingredient {id}"),
            source_name: source_name.map(str::to_string),
            source_url: source_url.map(str::to_string),
            has_image: false,
        };
        self.inner.lock().unwrap().ingredients.push(ingredient.clone());
        ingredient
    }

    pub fn add_off_ingredient(&self, id: i64) -> Ingredient {
        let url = format!("https://world.openfoodfacts.org/api/v2/product/{id}.json");
        self.add_ingredient(id, Some(SOURCE_OPEN_FOOD_FACTS), Some(&url))
    }

    pub fn add_image(&self, ingredient_id: i64, uuid: Uuid) {
        let mut inner = self.inner.lock().unwrap();
        let id = inner.images.len() as i64 + 1;
        inner.images.push(Image {
            id,
            uuid,
            ingredient_id,
            file_name: "existing.jpg".into(),
            size: 0,
            license_author: None,
            created_at: Utc::now(),
        });
    }

    /// The next insert loses a race: another writer attaches an image to the
    /// same ingredient right before it.
    pub fn lose_next_insert_race(&self) {
        self.inner.lock().unwrap().concurrent_writer = true;
    }

    pub fn images(&self) -> Vec<Image> {
        self.inner.lock().unwrap().images.clone()
    }

    pub fn images_for(&self, ingredient_id: i64) -> Vec<Image> {
        self.images()
            .into_iter()
            .filter(|i| i.ingredient_id == ingredient_id)
            .collect()
    }

    pub fn payload(&self, uuid: Uuid) -> Option<Bytes> {
        self.inner.lock().unwrap().payloads.get(&uuid).cloned()
    }

    fn with_image_flag(inner: &MemoryInner, ingredient: &Ingredient) -> Ingredient {
        let mut out = ingredient.clone();
        out.has_image = inner.images.iter().any(|i| i.ingredient_id == ingredient.id);
        out
    }
}

#[async_trait::async_trait]
impl ImageStore for MemoryStore {
    async fn ingredient_by_id(&self, id: i64) -> Result<Option<Ingredient>, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .ingredients
            .iter()
            .find(|i| i.id == id)
            .map(|i| Self::with_image_flag(&inner, i)))
    }

    async fn ingredient_by_uuid(&self, uuid: Uuid) -> Result<Option<Ingredient>, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .ingredients
            .iter()
            .find(|i| i.uuid == uuid)
            .map(|i| Self::with_image_flag(&inner, i)))
    }

    async fn image_by_uuid(&self, uuid: Uuid) -> Result<Option<Image>, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.images.iter().find(|i| i.uuid == uuid).cloned())
    }

    async fn create_image(&self, image: NewImage) -> Result<Image, StoreError> {
        if std::mem::take(&mut self.inner.lock().unwrap().concurrent_writer) {
            self.add_image(image.ingredient_id, Uuid::new_v4());
        }

        let mut inner = self.inner.lock().unwrap();
        let taken = inner
            .images
            .iter()
            .any(|i| i.ingredient_id == image.ingredient_id || i.uuid == image.uuid);
        if taken {
            return Err(StoreError::ImageConflict {
                ingredient_id: image.ingredient_id,
                uuid: image.uuid,
            });
        }

        let saved = Image {
            id: inner.images.len() as i64 + 1,
            uuid: image.uuid,
            ingredient_id: image.ingredient_id,
            file_name: image.file_name,
            size: image.size,
            license_author: image.license_author,
            created_at: Utc::now(),
        };
        inner.payloads.insert(image.uuid, image.data);
        inner.images.push(saved.clone());
        Ok(saved)
    }

    async fn ingredients_missing_images(
        &self,
        source_name: &str,
        limit: i64,
    ) -> Result<Vec<i64>, StoreError> {
        let inner = self.inner.lock().unwrap();
        let mut ids: Vec<i64> = inner
            .ingredients
            .iter()
            .filter(|i| i.source_name.as_deref() == Some(source_name))
            .filter(|i| i.source_url().is_some())
            .filter(|i| !inner.images.iter().any(|m| m.ingredient_id == i.id))
            .map(|i| i.id)
            .collect();
        ids.sort_unstable();
        ids.truncate(limit.max(0) as usize);
        Ok(ids)
    }
}

/// Canned HTTP responses keyed by URL. Every request is recorded.
#[derive(Default)]
pub struct FakeHttp {
    json: HashMap<String, Value>,
    files: HashMap<String, Download>,
    requests: Mutex<Vec<String>>,
}

impl FakeHttp {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn json(mut self, url: &str, body: Value) -> Self {
        self.json.insert(url.to_string(), body);
        self
    }

    pub fn file(mut self, url: &str, body: &'static [u8]) -> Self {
        self.files.insert(
            url.to_string(),
            Download {
                status: 200,
                bytes: Bytes::from_static(body),
            },
        );
        self
    }

    pub fn missing_file(mut self, url: &str, status: u16) -> Self {
        self.files.insert(
            url.to_string(),
            Download {
                status,
                bytes: Bytes::new(),
            },
        );
        self
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self, url: &str) -> usize {
        self.requests().iter().filter(|u| *u == url).count()
    }
}

#[async_trait::async_trait]
impl HttpSource for FakeHttp {
    async fn get_json(&self, url: &str) -> Result<Value> {
        self.requests.lock().unwrap().push(url.to_string());
        self.json
            .get(url)
            .cloned()
            .ok_or_else(|| anyhow!("no canned JSON for {url}"))
    }

    async fn get_bytes(&self, url: &str) -> Result<Download> {
        self.requests.lock().unwrap().push(url.to_string());
        self.files
            .get(url)
            .cloned()
            .ok_or_else(|| anyhow!("no canned file for {url}"))
    }
}
