use std::collections::HashSet;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use rand::Rng;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::config::{normalize_base_url, DownloadMode, SyncConfig};
use super::http::HttpSource;
use super::models::{
    file_basename, Image, ImagePage, Ingredient, NewImage, RemoteImage, SOURCE_OPEN_FOOD_FACTS,
};
use super::off::{self, AttributionMiss};
use super::store::{ImageStore, StoreError};

/// Path of the ingredient image endpoint on a wger deployment.
pub const IMAGE_API_PATH: &str = "/api/v2/ingredient-image/";

pub fn image_api_url(base_url: &str) -> String {
    format!("{}{}", normalize_base_url(base_url), IMAGE_API_PATH)
}

/// Why a point fetch did nothing before touching the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    HasImage,
    NotOpenFoodFacts,
    NoSourceUrl,
    Testing,
    DownloadsDisabled,
}

type Guard = (SkipReason, fn(&Ingredient, &SyncConfig) -> bool);

fn has_image(i: &Ingredient, _: &SyncConfig) -> bool {
    i.has_image
}

fn not_open_food_facts(i: &Ingredient, _: &SyncConfig) -> bool {
    !i.is_open_food_facts()
}

fn no_source_url(i: &Ingredient, _: &SyncConfig) -> bool {
    i.source_url().is_none()
}

fn testing(_: &Ingredient, c: &SyncConfig) -> bool {
    c.testing
}

fn downloads_disabled(_: &Ingredient, c: &SyncConfig) -> bool {
    c.download_mode == DownloadMode::Disabled
}

/// Point fetch preconditions, checked in this order.
const GUARDS: [Guard; 5] = [
    (SkipReason::HasImage, has_image),
    (SkipReason::NotOpenFoodFacts, not_open_food_facts),
    (SkipReason::NoSourceUrl, no_source_url),
    (SkipReason::Testing, testing),
    (SkipReason::DownloadsDisabled, downloads_disabled),
];

/// First guard that rules out a point fetch for `ingredient`, if any.
pub fn skip_reason(ingredient: &Ingredient, config: &SyncConfig) -> Option<SkipReason> {
    GUARDS
        .iter()
        .find(|(_, applies)| applies(ingredient, config))
        .map(|(reason, _)| *reason)
}

/// Result of a single point fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    Saved(Image),
    Skipped(SkipReason),
    /// Peer image UUID already stored locally.
    AlreadyPresent,
    /// Product record carries no front image.
    NoFrontImage,
    DownloadFailed { status: u16 },
    MissingAttribution(AttributionMiss),
    /// Another writer attached an image first.
    Conflict,
}

/// Counters for one bulk catalog walk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncSummary {
    pub pages: usize,
    pub processed: usize,
    pub created: usize,
    pub missing_ingredient: usize,
    pub already_present: usize,
    pub conflicts: usize,
    pub failed_downloads: usize,
}

/// Counters for a batch of point fetches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub attempted: usize,
    pub saved: usize,
    pub not_saved: usize,
    pub failed: usize,
}

/// Reconciles local ingredient images with a peer deployment or with Open
/// Food Facts. Everything runs sequentially: each request and write is
/// awaited before the next one starts.
pub struct ImageSync<S, H> {
    store: S,
    http: H,
    config: SyncConfig,
}

impl<S: ImageStore, H: HttpSource> ImageSync<S, H> {
    pub fn new(store: S, http: H, config: SyncConfig) -> Self {
        Self {
            store,
            http,
            config,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn http(&self) -> &H {
        &self.http
    }

    /// Bulk sync with the progress format of the admin command. `remote_url`
    /// falls back to the configured instance; `style` decorates the success
    /// line.
    pub async fn download_ingredient_images(
        &self,
        print: &mut dyn FnMut(&str),
        remote_url: Option<&str>,
        style: Option<&dyn Fn(&str) -> String>,
    ) -> Result<()> {
        let remote = remote_url.unwrap_or(&self.config.instance_url).to_string();
        let plain = |s: &str| s.to_string();
        let style = style.unwrap_or(&plain);
        let summary = self.walk_catalog(&remote, print, style).await?;
        info!(
            remote = %remote,
            pages = summary.pages,
            created = summary.created,
            "ingredient image sync finished"
        );
        Ok(())
    }

    /// Walks every page of the remote image listing and stores images not
    /// yet present locally.
    pub async fn sync_all_images(
        &self,
        remote_base_url: &str,
        progress: &mut dyn FnMut(&str),
    ) -> Result<SyncSummary> {
        self.walk_catalog(remote_base_url, progress, &|s: &str| s.to_string())
            .await
    }

    #[instrument(skip(self, print, style))]
    async fn walk_catalog(
        &self,
        remote_base_url: &str,
        print: &mut dyn FnMut(&str),
        style: &dyn Fn(&str) -> String,
    ) -> Result<SyncSummary> {
        let mut summary = SyncSummary::default();
        let mut visited: HashSet<String> = HashSet::new();
        let mut cursor = Some(image_api_url(remote_base_url));

        print("*** Processing images ***");
        while let Some(url) = cursor.take() {
            if !visited.insert(url.clone()) {
                warn!(%url, "listing points back to a page already processed; stopping");
                break;
            }

            let doc = self.http.get_json(&url).await?;
            let page: ImagePage = serde_json::from_value(doc)
                .with_context(|| format!("decoding image listing page {url}"))?;
            summary.pages += 1;

            print("");
            print(&format!("*** Page {}", summary.pages));
            print("");
            debug!(page = summary.pages, entries = page.results.len(), "processing listing page");

            for entry in &page.results {
                self.sync_entry(entry, print, style, &mut summary).await?;
            }

            cursor = page.next.filter(|n| !n.trim().is_empty());
        }

        Ok(summary)
    }

    async fn sync_entry(
        &self,
        entry: &RemoteImage,
        print: &mut dyn FnMut(&str),
        style: &dyn Fn(&str) -> String,
        summary: &mut SyncSummary,
    ) -> Result<()> {
        summary.processed += 1;
        print(&format!("Processing image {}", entry.uuid));

        let ingredient_uuid = entry
            .ingredient_uuid
            .ok_or_else(|| anyhow!("listing entry {} has no ingredient_uuid", entry.uuid))?;

        let Some(ingredient) = self.store.ingredient_by_uuid(ingredient_uuid).await? else {
            print("    Remote ingredient not found in local DB, skipping...");
            summary.missing_ingredient += 1;
            return Ok(());
        };

        if self.store.image_by_uuid(entry.uuid).await?.is_some() {
            print("    Image already present locally, skipping...");
            summary.already_present += 1;
            return Ok(());
        }

        print("    Image not found in local DB, creating now...");
        let download = self.http.get_bytes(&entry.image).await?;
        if !download.is_success() {
            warn!(image = %entry.uuid, url = %entry.image, status = download.status, "image download failed");
            print(&format!(
                "    Download failed with status {}, skipping...",
                download.status
            ));
            summary.failed_downloads += 1;
            return Ok(());
        }

        match self
            .store
            .create_image(NewImage::from_remote(&ingredient, download.bytes, entry))
            .await
        {
            Ok(image) => {
                debug!(image = %image.uuid, ingredient_id = ingredient.id, size = image.size, "image stored");
                summary.created += 1;
                print(&style("    successfully saved"));
            }
            Err(StoreError::ImageConflict { .. }) => {
                print("    Ingredient already has an image, skipping...");
                summary.conflicts += 1;
            }
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }

    /// Fetches the image of one local ingredient, from Open Food Facts or from
    /// the configured peer depending on the download mode.
    #[instrument(skip(self))]
    pub async fn fetch_ingredient_image(&self, ingredient_id: i64) -> Result<FetchOutcome> {
        let ingredient = self
            .store
            .ingredient_by_id(ingredient_id)
            .await?
            .ok_or_else(|| anyhow!("ingredient {ingredient_id} not found"))?;
        info!(ingredient_id, "fetching image for ingredient");

        if let Some(reason) = skip_reason(&ingredient, &self.config) {
            debug!(ingredient_id, ?reason, "skipping image fetch");
            return Ok(FetchOutcome::Skipped(reason));
        }

        match self.config.download_mode {
            DownloadMode::OpenFoodFacts => self.fetch_from_off(&ingredient).await,
            DownloadMode::WgerPeer => self.fetch_from_peer(&ingredient).await,
            DownloadMode::Disabled => Ok(FetchOutcome::Skipped(SkipReason::DownloadsDisabled)),
        }
    }

    async fn fetch_from_off(&self, ingredient: &Ingredient) -> Result<FetchOutcome> {
        info!(
            ingredient = %ingredient.name,
            uuid = %ingredient.uuid,
            "trying to fetch image from Open Food Facts"
        );
        let source_url = ingredient
            .source_url()
            .ok_or_else(|| anyhow!("ingredient {} has no source url", ingredient.id))?;

        let record = self.http.get_json(source_url).await?;
        let product = off::product(&record)?;
        let Some(image_url) = off::front_image_url(product) else {
            info!(ingredient_id = ingredient.id, "product data has no image_front_url");
            return Ok(FetchOutcome::NoFrontImage);
        };
        let images = off::images(product)?;

        let download = self.http.get_bytes(image_url).await?;
        if !download.is_success() {
            info!(ingredient_id = ingredient.id, status = download.status, "image download failed");
            return Ok(FetchOutcome::DownloadFailed {
                status: download.status,
            });
        }

        let image_name = off::image_name(image_url);
        let uploader = match off::uploader_name(images, image_name) {
            Ok(name) => name,
            Err(miss) => {
                info!(ingredient_id = ingredient.id, %miss, "could not load all image information, skipping");
                return Ok(FetchOutcome::MissingAttribution(miss));
            }
        };

        let size = download.bytes.len() as i64;
        let new_image = NewImage {
            uuid: Uuid::new_v4(),
            ingredient_id: ingredient.id,
            file_name: file_basename(image_url).to_string(),
            data: download.bytes,
            size,
            license: None,
            license_title: None,
            license_object_url: None,
            license_author: Some(uploader),
            license_author_url: None,
            license_derivative_source_url: None,
        };
        self.save(ingredient, new_image).await
    }

    async fn fetch_from_peer(&self, ingredient: &Ingredient) -> Result<FetchOutcome> {
        let url = format!("{}{}", image_api_url(&self.config.instance_url), ingredient.id);
        let doc = self.http.get_json(&url).await?;
        let meta: RemoteImage = serde_json::from_value(doc)
            .with_context(|| format!("decoding ingredient image from {url}"))?;

        if self.store.image_by_uuid(meta.uuid).await?.is_some() {
            info!(image = %meta.uuid, "image already present locally, skipping");
            return Ok(FetchOutcome::AlreadyPresent);
        }

        let download = self.http.get_bytes(&meta.image).await?;
        if !download.is_success() {
            info!(ingredient_id = ingredient.id, status = download.status, "image download failed");
            return Ok(FetchOutcome::DownloadFailed {
                status: download.status,
            });
        }
        self.save(ingredient, NewImage::from_remote(ingredient, download.bytes, &meta))
            .await
    }

    async fn save(&self, ingredient: &Ingredient, image: NewImage) -> Result<FetchOutcome> {
        // Concurrent fetches for the same ingredient race up to this insert;
        // the unique constraint decides the winner.
        match self.store.create_image(image).await {
            Ok(saved) => {
                info!(ingredient_id = ingredient.id, image = %saved.uuid, "image successfully saved");
                Ok(FetchOutcome::Saved(saved))
            }
            Err(StoreError::ImageConflict { .. }) => {
                info!(ingredient_id = ingredient.id, "ingredient already has an image, skipping");
                Ok(FetchOutcome::Conflict)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Point-fetches every Open Food Facts ingredient that still lacks an
    /// image, one at a time, pausing `delay` (plus up to half of it as
    /// jitter) between ingredients. Per-ingredient failures are logged and
    /// counted; they do not stop the batch.
    pub async fn fetch_missing_images(&self, limit: i64, delay: Duration) -> Result<BatchSummary> {
        let ids = self
            .store
            .ingredients_missing_images(SOURCE_OPEN_FOOD_FACTS, limit)
            .await?;
        info!(candidates = ids.len(), "fetching missing ingredient images");

        let mut summary = BatchSummary::default();
        for (idx, id) in ids.iter().copied().enumerate() {
            if idx > 0 && !delay.is_zero() {
                tokio::time::sleep(jittered(delay)).await;
            }
            summary.attempted += 1;
            match self.fetch_ingredient_image(id).await {
                Ok(FetchOutcome::Saved(_)) => summary.saved += 1,
                Ok(outcome) => {
                    debug!(ingredient_id = id, ?outcome, "no image stored");
                    summary.not_saved += 1;
                }
                Err(e) => {
                    warn!(ingredient_id = id, error = %e, "image fetch failed");
                    summary.failed += 1;
                }
            }
        }
        Ok(summary)
    }
}

fn jittered(delay: Duration) -> Duration {
    let max_extra = (delay.as_millis() / 2) as u64;
    if max_extra == 0 {
        return delay;
    }
    delay + Duration::from_millis(rand::thread_rng().gen_range(0..=max_extra))
}
