use sqlx::Row;
use tracing::debug;
use uuid::Uuid;

use super::models::{Image, Ingredient, NewImage};
use crate::util::db::Db;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Unique constraint hit on insert: the ingredient already carries an
    /// image, or the image UUID is taken.
    #[error("ingredient {ingredient_id} already has an image (image uuid {uuid})")]
    ImageConflict { ingredient_id: i64, uuid: Uuid },

    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

/// Persistence operations the image sync needs. Lookups return `None` on a
/// miss; only `create_image` distinguishes a conflict.
#[async_trait::async_trait]
pub trait ImageStore: Send + Sync {
    async fn ingredient_by_id(&self, id: i64) -> Result<Option<Ingredient>, StoreError>;
    async fn ingredient_by_uuid(&self, uuid: Uuid) -> Result<Option<Ingredient>, StoreError>;
    async fn image_by_uuid(&self, uuid: Uuid) -> Result<Option<Image>, StoreError>;
    async fn create_image(&self, image: NewImage) -> Result<Image, StoreError>;

    /// Ids of ingredients from `source_name` that have a source URL but no
    /// image yet, lowest id first.
    async fn ingredients_missing_images(
        &self,
        source_name: &str,
        limit: i64,
    ) -> Result<Vec<i64>, StoreError>;
}

const INGREDIENT_COLUMNS: &str = "i.id, i.uuid, i.name, i.source_name, i.source_url, \
     EXISTS (SELECT 1 FROM nutrition_image m WHERE m.ingredient_id = i.id) AS has_image";

/// `ImageStore` backed by the application's Postgres database.
#[derive(Clone)]
pub struct PgStore {
    db: Db,
}

impl PgStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    fn ingredient_from_row(row: &sqlx::postgres::PgRow) -> Result<Ingredient, sqlx::Error> {
        Ok(Ingredient {
            id: row.try_get("id")?,
            uuid: row.try_get("uuid")?,
            name: row.try_get("name")?,
            source_name: row.try_get("source_name")?,
            source_url: row.try_get("source_url")?,
            has_image: row.try_get("has_image")?,
        })
    }
}

#[async_trait::async_trait]
impl ImageStore for PgStore {
    async fn ingredient_by_id(&self, id: i64) -> Result<Option<Ingredient>, StoreError> {
        let sql = format!("SELECT {INGREDIENT_COLUMNS} FROM nutrition_ingredient i WHERE i.id = $1");
        let row = sqlx::query(&sql)
            .persistent(false)
            .bind(id)
            .fetch_optional(&self.db.pool)
            .await?;
        Ok(row.as_ref().map(Self::ingredient_from_row).transpose()?)
    }

    async fn ingredient_by_uuid(&self, uuid: Uuid) -> Result<Option<Ingredient>, StoreError> {
        let sql =
            format!("SELECT {INGREDIENT_COLUMNS} FROM nutrition_ingredient i WHERE i.uuid = $1");
        let row = sqlx::query(&sql)
            .persistent(false)
            .bind(uuid)
            .fetch_optional(&self.db.pool)
            .await?;
        Ok(row.as_ref().map(Self::ingredient_from_row).transpose()?)
    }

    async fn image_by_uuid(&self, uuid: Uuid) -> Result<Option<Image>, StoreError> {
        let row = sqlx::query(
            "SELECT id, uuid, ingredient_id, file_name, size, license_author, created_at \
             FROM nutrition_image WHERE uuid = $1",
        )
        .persistent(false)
        .bind(uuid)
        .fetch_optional(&self.db.pool)
        .await?;

        let Some(r) = row else {
            return Ok(None);
        };
        Ok(Some(Image {
            id: r.try_get("id")?,
            uuid: r.try_get("uuid")?,
            ingredient_id: r.try_get("ingredient_id")?,
            file_name: r.try_get("file_name")?,
            size: r.try_get("size")?,
            license_author: r.try_get("license_author")?,
            created_at: r.try_get("created_at")?,
        }))
    }

    async fn create_image(&self, image: NewImage) -> Result<Image, StoreError> {
        let res = sqlx::query(
            "INSERT INTO nutrition_image \
                (uuid, ingredient_id, file_name, image_data, size, license_id, license_title, \
                 license_object_url, license_author, license_author_url, \
                 license_derivative_source_url) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) \
             RETURNING id, created_at",
        )
        .persistent(false)
        .bind(image.uuid)
        .bind(image.ingredient_id)
        .bind(&image.file_name)
        .bind(&image.data[..])
        .bind(image.size)
        .bind(image.license)
        .bind(&image.license_title)
        .bind(&image.license_object_url)
        .bind(&image.license_author)
        .bind(&image.license_author_url)
        .bind(&image.license_derivative_source_url)
        .fetch_one(&self.db.pool)
        .await;

        let row = match res {
            Ok(row) => row,
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                debug!(ingredient_id = image.ingredient_id, uuid = %image.uuid, constraint = ?e.constraint(), "image insert hit unique constraint");
                return Err(StoreError::ImageConflict {
                    ingredient_id: image.ingredient_id,
                    uuid: image.uuid,
                });
            }
            Err(e) => return Err(e.into()),
        };

        Ok(Image {
            id: row.try_get("id")?,
            uuid: image.uuid,
            ingredient_id: image.ingredient_id,
            file_name: image.file_name,
            size: image.size,
            license_author: image.license_author,
            created_at: row.try_get("created_at")?,
        })
    }

    async fn ingredients_missing_images(
        &self,
        source_name: &str,
        limit: i64,
    ) -> Result<Vec<i64>, StoreError> {
        let ids = sqlx::query_scalar::<_, i64>(
            "SELECT i.id FROM nutrition_ingredient i \
             WHERE i.source_name = $1 \
               AND COALESCE(i.source_url, '') <> '' \
               AND NOT EXISTS (SELECT 1 FROM nutrition_image m WHERE m.ingredient_id = i.id) \
             ORDER BY i.id \
             LIMIT $2",
        )
        .persistent(false)
        .bind(source_name)
        .bind(limit)
        .fetch_all(&self.db.pool)
        .await?;
        Ok(ids)
    }
}
