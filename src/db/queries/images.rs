use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{FromRow, SqliteConnection, SqlitePool};

#[derive(Clone, Debug, Serialize, FromRow)]
pub struct Image {
    pub id: String,
    pub file_name: String,
    pub mime_type: String,
    pub content_hash: String,
    pub object_id: Option<i64>,
    pub object_type: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Image {
    /// Name of the file under the images directory: the image id plus the extension of its type.
    pub fn storage_filename(&self) -> String {
        storage_filename(&self.id, &self.mime_type)
    }

    pub fn url(&self) -> String {
        format!("/static/images/{}", self.storage_filename())
    }
}

/// Accepted image types and the extension files of that type are stored under.
const IMAGE_TYPES: [(&str, &str); 4] = [
    ("image/png", "png"),
    ("image/jpeg", "jpg"),
    ("image/gif", "gif"),
    ("image/webp", "webp"),
];

/// Extension for an accepted image type. The client's file name never picks the extension.
pub fn image_extension(mime_type: &str) -> Option<&'static str> {
    IMAGE_TYPES
        .iter()
        .find(|(mime, _)| *mime == mime_type)
        .map(|(_, ext)| *ext)
}

/// Image type recognised from the leading bytes of the file.
pub fn sniff_image_type(bytes: &[u8]) -> Option<&'static str> {
    if bytes.starts_with(b"\x89PNG\r\n\x1a\n") {
        Some("image/png")
    } else if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        Some("image/jpeg")
    } else if bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a") {
        Some("image/gif")
    } else if bytes.len() >= 12 && bytes.starts_with(b"RIFF") && &bytes[8..12] == b"WEBP" {
        Some("image/webp")
    } else {
        None
    }
}

pub fn storage_filename(id: &str, mime_type: &str) -> String {
    match image_extension(mime_type) {
        Some(ext) => format!("{id}.{ext}"),
        None => id.to_owned(),
    }
}

pub async fn get_image(pool: &SqlitePool, id: &str) -> sqlx::Result<Image> {
    sqlx::query_as::<_, Image>(
        r#"
        SELECT * FROM images WHERE images.id = ?1
        "#,
    )
    .bind(id)
    .fetch_one(pool)
    .await
}

pub async fn find_image_by_hash(
    conn: &mut SqliteConnection,
    content_hash: &str,
) -> sqlx::Result<Option<Image>> {
    sqlx::query_as::<_, Image>(
        r#"
        SELECT * FROM images WHERE images.content_hash = ?1
        "#,
    )
    .bind(content_hash)
    .fetch_optional(conn)
    .await
}

pub async fn insert_image(conn: &mut SqliteConnection, image: &Image) -> sqlx::Result<()> {
    sqlx::query(
        r#"
        INSERT INTO images (id, file_name, mime_type, content_hash, object_id, object_type, created_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
        "#,
    )
    .bind(&image.id)
    .bind(&image.file_name)
    .bind(&image.mime_type)
    .bind(&image.content_hash)
    .bind(image.object_id)
    .bind(&image.object_type)
    .bind(image.created_at)
    .execute(conn)
    .await?;
    Ok(())
}

pub async fn attach_image(
    conn: &mut SqliteConnection,
    image_id: &str,
    object_type: &str,
    object_id: i64,
) -> sqlx::Result<()> {
    sqlx::query(
        r#"
        UPDATE images SET object_type = ?1, object_id = ?2
        WHERE images.id = ?3 AND images.object_id IS NULL
        "#,
    )
    .bind(object_type)
    .bind(object_id)
    .bind(image_id)
    .execute(conn)
    .await?;
    Ok(())
}
