use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{FromRow, SqliteConnection, SqlitePool};

#[derive(Clone, Debug, Serialize, FromRow)]
pub struct Review {
    pub id: i64,
    pub rating: i64,
    pub text: String,
    pub created_at: DateTime<Utc>,
    pub course_id: i64,
    pub user_id: i64,
}

impl Review {
    pub fn stars(&self) -> String {
        stars(self.rating)
    }
}

#[derive(Clone, Debug, FromRow)]
pub struct ReviewWithAuthor {
    #[sqlx(flatten)]
    pub review: Review,
    pub author_first_name: String,
    pub author_last_name: String,
}

impl ReviewWithAuthor {
    pub fn author_name(&self) -> String {
        format!("{} {}", self.author_first_name, self.author_last_name)
    }

    pub fn created_display(&self) -> String {
        self.review.created_at.format("%d.%m.%Y %H:%M").to_string()
    }
}

fn stars(rating: i64) -> String {
    let filled = rating.clamp(0, 5) as usize;
    format!("{}{}", "★".repeat(filled), "☆".repeat(5 - filled))
}

/// Ordering of a review listing. `id` breaks ties so pages are stable.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SortBy {
    #[default]
    Recent,
    Positive,
    Negative,
}

impl SortBy {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortBy::Recent => "recent",
            SortBy::Positive => "positive",
            SortBy::Negative => "negative",
        }
    }

    fn order_by(&self) -> &'static str {
        match self {
            SortBy::Recent => "r.created_at DESC, r.id DESC",
            SortBy::Positive => "r.rating DESC, r.created_at DESC, r.id DESC",
            SortBy::Negative => "r.rating ASC, r.created_at DESC, r.id DESC",
        }
    }
}

impl FromStr for SortBy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "recent" => Ok(SortBy::Recent),
            "positive" => Ok(SortBy::Positive),
            "negative" => Ok(SortBy::Negative),
            other => Err(format!("Unknown sort order {other}")),
        }
    }
}

pub struct NewReview<'a> {
    pub course_id: i64,
    pub user_id: i64,
    pub rating: i64,
    pub text: &'a str,
    pub created_at: DateTime<Utc>,
}

pub async fn insert_review(conn: &mut SqliteConnection, review: &NewReview<'_>) -> sqlx::Result<i64> {
    let id = sqlx::query(
        r#"
INSERT INTO reviews (rating, text, created_at, course_id, user_id) VALUES (?1, ?2, ?3, ?4, ?5)
        "#,
    )
    .bind(review.rating)
    .bind(review.text)
    .bind(review.created_at)
    .bind(review.course_id)
    .bind(review.user_id)
    .execute(conn)
    .await?
    .last_insert_rowid();

    Ok(id)
}

pub async fn get_review(conn: &mut SqliteConnection, id: i64) -> sqlx::Result<Review> {
    sqlx::query_as::<_, Review>(
        r#"
        SELECT * FROM reviews WHERE reviews.id = ?1
        "#,
    )
    .bind(id)
    .fetch_one(conn)
    .await
}

pub async fn find_user_review(
    conn: &mut SqliteConnection,
    course_id: i64,
    user_id: i64,
) -> sqlx::Result<Option<Review>> {
    sqlx::query_as::<_, Review>(
        r#"
        SELECT * FROM reviews WHERE reviews.course_id = ?1 AND reviews.user_id = ?2
        "#,
    )
    .bind(course_id)
    .bind(user_id)
    .fetch_optional(conn)
    .await
}

pub async fn list_reviews(
    pool: &SqlitePool,
    course_id: i64,
    sort_by: SortBy,
    limit: i64,
    offset: i64,
) -> sqlx::Result<Vec<ReviewWithAuthor>> {
    let sql = format!(
        r#"
SELECT r.id, r.rating, r.text, r.created_at, r.course_id, r.user_id,
       u.first_name AS author_first_name, u.last_name AS author_last_name
FROM reviews r
JOIN users u ON u.id = r.user_id
WHERE r.course_id = ?1
ORDER BY {}
LIMIT ?2 OFFSET ?3
        "#,
        sort_by.order_by()
    );
    sqlx::query_as::<_, ReviewWithAuthor>(&sql)
        .bind(course_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(pool)
        .await
}

pub async fn count_reviews(pool: &SqlitePool, course_id: i64) -> sqlx::Result<i64> {
    sqlx::query_scalar::<_, i64>(
        r#"
        SELECT COUNT(*) FROM reviews WHERE reviews.course_id = ?1
        "#,
    )
    .bind(course_id)
    .fetch_one(pool)
    .await
}

pub async fn get_all_reviews(pool: &SqlitePool) -> sqlx::Result<Vec<Review>> {
    sqlx::query_as::<_, Review>(
        r#"
        SELECT * FROM reviews ORDER BY id
        "#,
    )
    .fetch_all(pool)
    .await
}
