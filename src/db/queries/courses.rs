use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{FromRow, QueryBuilder, Sqlite, SqliteConnection, SqlitePool};

use super::images::storage_filename;

#[derive(Clone, Debug, Serialize, FromRow)]
pub struct Course {
    pub id: i64,
    pub name: String,
    pub short_desc: String,
    pub full_desc: String,
    pub rating_sum: i64,
    pub rating_num: i64,
    pub category_id: i64,
    pub author_id: i64,
    pub background_image_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Course {
    pub fn rating(&self) -> Option<f64> {
        average_rating(self.rating_sum, self.rating_num)
    }

    pub fn rating_display(&self) -> String {
        format_rating(self.rating())
    }
}

/// Catalogue row: a course joined with its category and background image.
#[derive(Clone, Debug, FromRow)]
pub struct CourseSummary {
    pub id: i64,
    pub name: String,
    pub short_desc: String,
    pub rating_sum: i64,
    pub rating_num: i64,
    pub category_name: String,
    pub background_image_id: Option<String>,
    pub image_file_name: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl CourseSummary {
    pub fn rating_display(&self) -> String {
        format_rating(average_rating(self.rating_sum, self.rating_num))
    }

    pub fn image_url(&self) -> Option<String> {
        match (&self.background_image_id, &self.image_file_name) {
            (Some(id), Some(file_name)) => Some(format!(
                "/static/images/{}",
                storage_filename(id, file_name)
            )),
            _ => None,
        }
    }
}

pub fn average_rating(rating_sum: i64, rating_num: i64) -> Option<f64> {
    if rating_num > 0 {
        Some(rating_sum as f64 / rating_num as f64)
    } else {
        None
    }
}

fn format_rating(rating: Option<f64>) -> String {
    match rating {
        Some(value) => format!("{value:.1}"),
        None => "нет оценок".to_owned(),
    }
}

pub struct NewCourse<'a> {
    pub name: &'a str,
    pub short_desc: &'a str,
    pub full_desc: &'a str,
    pub category_id: i64,
    pub author_id: i64,
    pub background_image_id: Option<&'a str>,
    pub created_at: DateTime<Utc>,
}

#[derive(Default)]
pub struct CourseFilter {
    pub name: Option<String>,
    pub category_id: Option<i64>,
}

/// A course whose cached aggregate disagrees with its reviews.
#[derive(Debug, FromRow)]
pub struct RatingDrift {
    pub id: i64,
    pub name: String,
    pub rating_sum: i64,
    pub rating_num: i64,
    pub actual_sum: i64,
    pub actual_num: i64,
}

pub async fn get_course(pool: &SqlitePool, id: i64) -> sqlx::Result<Course> {
    sqlx::query_as::<_, Course>(
        r#"
        SELECT * FROM courses WHERE courses.id = ?1
        "#,
    )
    .bind(id)
    .fetch_one(pool)
    .await
}

pub async fn get_all_courses(pool: &SqlitePool) -> sqlx::Result<Vec<Course>> {
    sqlx::query_as::<_, Course>(
        r#"
        SELECT * FROM courses ORDER BY id
        "#,
    )
    .fetch_all(pool)
    .await
}

pub async fn insert_course(conn: &mut SqliteConnection, course: NewCourse<'_>) -> sqlx::Result<i64> {
    let id = sqlx::query(
        r#"
INSERT INTO courses (name, short_desc, full_desc, rating_sum, rating_num, category_id, author_id, background_image_id, created_at)
VALUES (?1, ?2, ?3, 0, 0, ?4, ?5, ?6, ?7)
        "#,
    )
    .bind(course.name)
    .bind(course.short_desc)
    .bind(course.full_desc)
    .bind(course.category_id)
    .bind(course.author_id)
    .bind(course.background_image_id)
    .bind(course.created_at)
    .execute(conn)
    .await?
    .last_insert_rowid();

    Ok(id)
}

/// Adds one rating to the cached aggregate. Relative so that concurrent writers don't lose updates.
pub async fn add_rating(conn: &mut SqliteConnection, course_id: i64, rating: i64) -> sqlx::Result<()> {
    sqlx::query(
        r#"
        UPDATE courses SET rating_sum = rating_sum + ?1, rating_num = rating_num + 1
        WHERE courses.id = ?2
        "#,
    )
    .bind(rating)
    .bind(course_id)
    .execute(conn)
    .await?;
    Ok(())
}

fn escape_like(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn push_filter(builder: &mut QueryBuilder<'_, Sqlite>, filter: &CourseFilter) {
    builder.push(" WHERE 1 = 1");
    if let Some(name) = filter.name.as_deref().map(str::trim).filter(|n| !n.is_empty()) {
        builder
            .push(" AND c.name LIKE ")
            .push_bind(format!("%{}%", escape_like(name)))
            .push(" ESCAPE '\\'");
    }
    if let Some(category_id) = filter.category_id {
        builder.push(" AND c.category_id = ").push_bind(category_id);
    }
}

pub async fn search_courses(
    pool: &SqlitePool,
    filter: &CourseFilter,
    limit: i64,
    offset: i64,
) -> sqlx::Result<Vec<CourseSummary>> {
    let mut builder = QueryBuilder::<Sqlite>::new(
        r#"
SELECT c.id, c.name, c.short_desc, c.rating_sum, c.rating_num, cat.name AS category_name,
       c.background_image_id, i.file_name AS image_file_name, c.created_at
FROM courses c
JOIN categories cat ON cat.id = c.category_id
LEFT JOIN images i ON i.id = c.background_image_id"#,
    );
    push_filter(&mut builder, filter);
    builder
        .push(" ORDER BY c.created_at DESC, c.id DESC LIMIT ")
        .push_bind(limit)
        .push(" OFFSET ")
        .push_bind(offset);

    builder
        .build_query_as::<CourseSummary>()
        .fetch_all(pool)
        .await
}

pub async fn count_courses(pool: &SqlitePool, filter: &CourseFilter) -> sqlx::Result<i64> {
    let mut builder = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM courses c");
    push_filter(&mut builder, filter);
    builder
        .build_query_scalar::<i64>()
        .fetch_one(pool)
        .await
}

pub async fn find_rating_drift(pool: &SqlitePool) -> sqlx::Result<Vec<RatingDrift>> {
    sqlx::query_as::<_, RatingDrift>(
        r#"
SELECT c.id, c.name, c.rating_sum, c.rating_num,
       COALESCE(SUM(r.rating), 0) AS actual_sum, COUNT(r.id) AS actual_num
FROM courses c
LEFT JOIN reviews r ON r.course_id = c.id
GROUP BY c.id
HAVING c.rating_sum != actual_sum OR c.rating_num != actual_num
ORDER BY c.id
        "#,
    )
    .fetch_all(pool)
    .await
}

/// Recomputes every cached aggregate from the reviews table.
pub async fn recount_ratings(pool: &SqlitePool) -> sqlx::Result<u64> {
    let mut conn = pool.acquire().await?;
    let updated = sqlx::query(
        r#"
UPDATE courses SET
    rating_sum = (SELECT COALESCE(SUM(r.rating), 0) FROM reviews r WHERE r.course_id = courses.id),
    rating_num = (SELECT COUNT(*) FROM reviews r WHERE r.course_id = courses.id)
        "#,
    )
    .execute(&mut *conn)
    .await?
    .rows_affected();
    Ok(updated)
}
