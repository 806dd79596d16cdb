use askama::Template;
use askama_web::WebTemplate;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
    routing::{get, post},
    Form, Router,
};
use chrono::Utc;
use serde::Deserialize;
use sqlx::SqlitePool;

use crate::{
    db::{queries::courses::get_course, Course, Review, ReviewWithAuthor, User},
    reviews::{self, list_course_reviews, user_review, ReviewError, SortBy},
    server::{
        app::AppState,
        deserializers::empty_string_as_none,
        error::{ApiError, ApiResponse},
        session::CurrentUser,
    },
};

use super::{courses::course_page, page_links, query_string, PageLink};

#[derive(Deserialize)]
struct ReviewsQuery {
    #[serde(default)]
    sort_by: Option<String>,
    #[serde(default)]
    #[serde(deserialize_with = "empty_string_as_none")]
    page: Option<u32>,
}

#[derive(Deserialize)]
struct ReviewForm {
    rating: i64,
    #[serde(default)]
    text: String,
}

struct SortOption {
    value: &'static str,
    label: &'static str,
    selected: bool,
}

#[derive(Template, WebTemplate)]
#[template(path = "courses/reviews.html")]
struct ReviewsPage {
    current_user: Option<User>,
    course: Course,
    reviews: Vec<ReviewWithAuthor>,
    own_review: Option<Review>,
    total: i64,
    sort_options: Vec<SortOption>,
    pages: Vec<PageLink>,
    error: Option<String>,
    form_rating: i64,
    form_text: String,
}

fn sort_options(current: SortBy) -> Vec<SortOption> {
    [
        (SortBy::Recent, "По новизне"),
        (SortBy::Positive, "Сначала положительные"),
        (SortBy::Negative, "Сначала отрицательные"),
    ]
    .into_iter()
    .map(|(sort_by, label)| SortOption {
        value: sort_by.as_str(),
        label,
        selected: sort_by == current,
    })
    .collect()
}

async fn course_reviews(
    State(pool): State<SqlitePool>,
    CurrentUser(current_user): CurrentUser,
    Path(course_id): Path<i64>,
    Query(query): Query<ReviewsQuery>,
) -> ApiResponse<ReviewsPage> {
    let course = get_course(&pool, course_id).await?;
    // unknown orderings fall back to the default instead of failing the page
    let sort_by = query
        .sort_by
        .as_deref()
        .and_then(|value| value.parse::<SortBy>().ok())
        .unwrap_or_default();
    let page = list_course_reviews(&pool, course_id, sort_by, query.page).await?;
    let own_review = match &current_user {
        Some(user) => user_review(&pool, course_id, user.id).await?,
        None => None,
    };
    let pages = page_links(page.total_pages, page.page, |n| {
        format!(
            "/courses/{course_id}/reviews?{}",
            query_string(&[
                ("sort_by", sort_by.as_str().to_owned()),
                ("page", n.to_string())
            ])
        )
    });

    Ok(ReviewsPage {
        current_user,
        course,
        reviews: page.reviews,
        own_review,
        total: page.total,
        sort_options: sort_options(sort_by),
        pages,
        error: None,
        form_rating: 5,
        form_text: String::new(),
    })
}

async fn add_review(
    State(pool): State<SqlitePool>,
    CurrentUser(current_user): CurrentUser,
    Path(course_id): Path<i64>,
    Form(form): Form<ReviewForm>,
) -> ApiResponse<Response> {
    let course_url = format!("/courses/{course_id}");
    let result = reviews::submit_review(
        &pool,
        course_id,
        current_user.as_ref(),
        form.rating,
        &form.text,
        Utc::now(),
    )
    .await;

    let message = match result {
        Ok(_) => return Ok(Redirect::to(&course_url).into_response()),
        Err(ReviewError::Unauthorized) => return Err(ApiError::unauthorized(course_url)),
        Err(ReviewError::CourseNotFound(_)) => return Err(ApiError::NotFound),
        Err(ReviewError::AlreadyReviewed(existing)) => {
            tracing::info!(
                course_id,
                review_id = existing.id,
                "Repeated review submission, showing the existing one"
            );
            return Ok(Redirect::to(&course_url).into_response());
        }
        Err(ReviewError::Database(e)) => return Err(e.into()),
        Err(ReviewError::InvalidRating(_)) => "Оценка должна быть от 0 до 5".to_owned(),
        Err(ReviewError::EmptyText) => "Текст отзыва не может быть пустым".to_owned(),
    };

    let mut page = course_page(&pool, course_id, current_user).await?;
    page.error = Some(message);
    page.form_rating = form.rating.clamp(0, reviews::MAX_RATING);
    page.form_text = form.text;
    Ok((StatusCode::BAD_REQUEST, page).into_response())
}

pub fn reviews_router(state: AppState) -> Router {
    Router::new()
        .route("/courses/{id}/reviews", get(course_reviews))
        .route("/courses/{id}/add_review", post(add_review))
        .with_state(state)
}
