//! Review submission and listing.
//!
//! A review insert and the course's cached `rating_sum`/`rating_num` are always written in the
//! same transaction, so readers never see one without the other.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use crate::db::queries::{courses, reviews};
use crate::db::{is_unique_violation, Review, ReviewWithAuthor, User};
use crate::telemetry::REVIEWS_CNTR;

pub use crate::db::queries::reviews::SortBy;

/// Reviews shown inline on the course page.
pub const LATEST_REVIEWS: i64 = 5;
pub const REVIEWS_PER_PAGE: i64 = 10;
pub const MAX_RATING: i64 = 5;

#[derive(Debug, thiserror::Error)]
pub enum ReviewError {
    #[error("login required to post a review")]
    Unauthorized,
    #[error("course {0} does not exist")]
    CourseNotFound(i64),
    #[error("rating must be between 0 and 5, got {0}")]
    InvalidRating(i64),
    #[error("review text must not be empty")]
    EmptyText,
    #[error("course {} already has a review from user {}", .0.course_id, .0.user_id)]
    AlreadyReviewed(Box<Review>),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

pub async fn submit_review(
    pool: &SqlitePool,
    course_id: i64,
    user: Option<&User>,
    rating: i64,
    text: &str,
    created_at: DateTime<Utc>,
) -> Result<Review, ReviewError> {
    let user = user.ok_or(ReviewError::Unauthorized)?;
    if !(0..=MAX_RATING).contains(&rating) {
        return Err(ReviewError::InvalidRating(rating));
    }
    let text = text.trim();
    if text.is_empty() {
        return Err(ReviewError::EmptyText);
    }

    // take the write lock up front; a deferred transaction could not upgrade its read lock
    // while another submission holds one
    let mut tx = pool.begin_with("BEGIN IMMEDIATE").await?;

    let exists: Option<i64> = sqlx::query_scalar("SELECT id FROM courses WHERE courses.id = ?1")
        .bind(course_id)
        .fetch_optional(&mut *tx)
        .await?;
    if exists.is_none() {
        return Err(ReviewError::CourseNotFound(course_id));
    }

    if let Some(existing) = reviews::find_user_review(&mut *tx, course_id, user.id).await? {
        return Err(ReviewError::AlreadyReviewed(Box::new(existing)));
    }

    let new_review = reviews::NewReview {
        course_id,
        user_id: user.id,
        rating,
        text,
        created_at,
    };
    let review_id = match reviews::insert_review(&mut *tx, &new_review).await {
        Ok(id) => id,
        Err(e) if is_unique_violation(&e) => {
            // lost a race with a concurrent submission from the same user
            let existing = reviews::find_user_review(&mut *tx, course_id, user.id).await?;
            return Err(match existing {
                Some(review) => ReviewError::AlreadyReviewed(Box::new(review)),
                None => ReviewError::Database(e),
            });
        }
        Err(e) => return Err(e.into()),
    };
    courses::add_rating(&mut *tx, course_id, rating).await?;
    let review = reviews::get_review(&mut *tx, review_id).await?;

    tx.commit().await?;

    REVIEWS_CNTR.with_label_values(&[rating.to_string().as_str()]).inc();
    tracing::info!(course_id, user_id = user.id, rating, "Review created");
    Ok(review)
}

/// The user's review of a course, if they wrote one.
pub async fn user_review(
    pool: &SqlitePool,
    course_id: i64,
    user_id: i64,
) -> sqlx::Result<Option<Review>> {
    let mut conn = pool.acquire().await?;
    reviews::find_user_review(&mut *conn, course_id, user_id).await
}

pub async fn latest_reviews(pool: &SqlitePool, course_id: i64) -> sqlx::Result<Vec<ReviewWithAuthor>> {
    reviews::list_reviews(pool, course_id, SortBy::Recent, LATEST_REVIEWS, 0).await
}

pub struct ReviewPage {
    pub reviews: Vec<ReviewWithAuthor>,
    pub sort_by: SortBy,
    /// 1-based page number.
    pub page: u32,
    pub total: i64,
    pub total_pages: u32,
}

pub fn total_pages(total: i64, per_page: i64) -> u32 {
    if total <= 0 || per_page <= 0 {
        return 0;
    }
    u32::try_from((total + per_page - 1) / per_page).unwrap_or(u32::MAX)
}

/// One page of a course's reviews. Pages past the end are empty rather than an error.
pub async fn list_course_reviews(
    pool: &SqlitePool,
    course_id: i64,
    sort_by: SortBy,
    page: Option<u32>,
) -> sqlx::Result<ReviewPage> {
    let page = page.unwrap_or(1).max(1);
    let offset = i64::from(page - 1) * REVIEWS_PER_PAGE;
    let reviews = reviews::list_reviews(pool, course_id, sort_by, REVIEWS_PER_PAGE, offset).await?;
    let total = reviews::count_reviews(pool, course_id).await?;
    Ok(ReviewPage {
        reviews,
        sort_by,
        page,
        total,
        total_pages: total_pages(total, REVIEWS_PER_PAGE),
    })
}
