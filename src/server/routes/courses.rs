use std::path::{Path as FsPath, PathBuf};

use askama::Template;
use askama_web::WebTemplate;
use axum::{
    extract::{DefaultBodyLimit, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
    routing::{get, post},
    Router,
};
use axum_typed_multipart::{FieldData, TryFromMultipart, TypedMultipart};
use chrono::Utc;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use sqlx::{Sqlite, SqlitePool, Transaction};
use tempfile::NamedTempFile;
use uuid::Uuid;

use crate::{
    db::{
        queries::{
            categories::{get_all_categories, get_category},
            courses::{self, CourseFilter, NewCourse},
            images::{self, get_image},
            users::get_user,
        },
        is_unique_violation, Category, Course, CourseSummary, Image, Review, ReviewWithAuthor,
        User,
    },
    reviews::{latest_reviews, total_pages, user_review},
    server::{
        app::AppState,
        deserializers::empty_string_as_none,
        error::{ApiError, ApiResponse},
        session::CurrentUser,
    },
    telemetry::COURSES_CNTR,
};

use super::{page_links, query_string, PageLink};

pub const COURSES_PER_PAGE: i64 = 10;
const MAX_IMAGE_SIZE: usize = 10 * 1024 * 1024;

#[derive(Deserialize)]
struct CatalogueQuery {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    #[serde(deserialize_with = "empty_string_as_none")]
    category_id: Option<i64>,
    #[serde(default)]
    #[serde(deserialize_with = "empty_string_as_none")]
    page: Option<u32>,
}

#[derive(TryFromMultipart)]
struct NewCourseForm {
    name: String,
    category_id: i64,
    short_desc: String,
    full_desc: String,
    #[form_data(limit = "10MiB")]
    background_img: Option<FieldData<NamedTempFile>>,
}

#[derive(Template, WebTemplate)]
#[template(path = "courses/index.html")]
struct CataloguePage {
    current_user: Option<User>,
    courses: Vec<CourseSummary>,
    categories: Vec<Category>,
    name: String,
    selected_category: i64,
    pages: Vec<PageLink>,
}

#[derive(Template, WebTemplate)]
#[template(path = "courses/new.html")]
struct NewCoursePage {
    current_user: Option<User>,
    categories: Vec<Category>,
    name: String,
    short_desc: String,
    full_desc: String,
    selected_category: i64,
    error: Option<String>,
}

/// Course detail with the latest reviews and the review form.
#[derive(Template, WebTemplate)]
#[template(path = "courses/show.html")]
pub(super) struct CoursePage {
    pub current_user: Option<User>,
    pub course: Course,
    pub category: Category,
    pub author: User,
    pub image_url: Option<String>,
    pub reviews: Vec<ReviewWithAuthor>,
    pub own_review: Option<Review>,
    pub error: Option<String>,
    pub form_rating: i64,
    pub form_text: String,
}

pub(super) async fn course_page(
    pool: &SqlitePool,
    course_id: i64,
    current_user: Option<User>,
) -> ApiResponse<CoursePage> {
    let course = courses::get_course(pool, course_id).await?;
    let category = get_category(pool, course.category_id).await?;
    let author = get_user(pool, course.author_id).await?;
    let image_url = match &course.background_image_id {
        Some(id) => Some(get_image(pool, id).await?.url()),
        None => None,
    };
    let reviews = latest_reviews(pool, course_id).await?;
    let own_review = match &current_user {
        Some(user) => user_review(pool, course_id, user.id).await?,
        None => None,
    };
    Ok(CoursePage {
        current_user,
        course,
        category,
        author,
        image_url,
        reviews,
        own_review,
        error: None,
        form_rating: 5,
        form_text: String::new(),
    })
}

async fn catalogue(
    State(pool): State<SqlitePool>,
    CurrentUser(current_user): CurrentUser,
    Query(query): Query<CatalogueQuery>,
) -> ApiResponse<CataloguePage> {
    let page = query.page.unwrap_or(1).max(1);
    let filter = CourseFilter {
        name: query.name.clone(),
        category_id: query.category_id,
    };
    let offset = i64::from(page - 1) * COURSES_PER_PAGE;
    let courses = courses::search_courses(&pool, &filter, COURSES_PER_PAGE, offset).await?;
    let total = courses::count_courses(&pool, &filter).await?;

    let name = query.name.unwrap_or_default();
    let category = query
        .category_id
        .map(|id| id.to_string())
        .unwrap_or_default();
    let pages = page_links(
        total_pages(total, COURSES_PER_PAGE),
        page,
        |n| {
            format!(
                "/courses?{}",
                query_string(&[
                    ("name", name.clone()),
                    ("category_id", category.clone()),
                    ("page", n.to_string()),
                ])
            )
        },
    );

    Ok(CataloguePage {
        current_user,
        courses,
        categories: get_all_categories(&pool).await?,
        name,
        selected_category: query.category_id.unwrap_or(0),
        pages,
    })
}

async fn show_course(
    State(pool): State<SqlitePool>,
    CurrentUser(current_user): CurrentUser,
    Path(id): Path<i64>,
) -> ApiResponse<CoursePage> {
    course_page(&pool, id, current_user).await
}

async fn new_course(
    State(pool): State<SqlitePool>,
    current_user: CurrentUser,
) -> ApiResponse<NewCoursePage> {
    let user = current_user.require("/courses/new")?;
    Ok(NewCoursePage {
        current_user: Some(user),
        categories: get_all_categories(&pool).await?,
        name: String::new(),
        short_desc: String::new(),
        full_desc: String::new(),
        selected_category: 0,
        error: None,
    })
}

struct UploadedImage {
    file_name: String,
    mime_type: &'static str,
    content_hash: String,
    contents: NamedTempFile,
}

async fn read_upload(field: FieldData<NamedTempFile>) -> ApiResponse<Option<UploadedImage>> {
    let file_name = field.metadata.file_name.unwrap_or_default();
    let bytes = tokio::fs::read(field.contents.path()).await?;
    // an untouched file input is submitted as an empty part
    if file_name.is_empty() && bytes.is_empty() {
        return Ok(None);
    }
    // the declared content type is client input; only the file signature decides
    let Some(mime_type) = images::sniff_image_type(&bytes) else {
        return Err(ApiError::Validation(format!(
            "Файл {file_name} не является изображением (PNG, JPEG, GIF, WebP)"
        )));
    };
    let content_hash = hex::encode(Sha256::digest(&bytes));
    Ok(Some(UploadedImage {
        file_name,
        mime_type,
        content_hash,
        contents: field.contents,
    }))
}

/// Finds the image by content hash or records it and copies the upload into `images_dir`.
/// Returns the path of the copied file when a new one was written.
async fn store_image(
    conn: &mut sqlx::SqliteConnection,
    images_dir: &FsPath,
    upload: &UploadedImage,
) -> ApiResponse<(Image, Option<PathBuf>)> {
    if let Some(existing) = images::find_image_by_hash(&mut *conn, &upload.content_hash).await? {
        return Ok((existing, None));
    }
    let image = Image {
        id: Uuid::new_v4().to_string(),
        file_name: upload.file_name.clone(),
        mime_type: upload.mime_type.to_owned(),
        content_hash: upload.content_hash.clone(),
        object_id: None,
        object_type: None,
        created_at: Utc::now(),
    };
    match images::insert_image(&mut *conn, &image).await {
        Ok(()) => {}
        Err(e) if is_unique_violation(&e) => {
            // the same file was stored by a concurrent upload
            return match images::find_image_by_hash(&mut *conn, &upload.content_hash).await? {
                Some(existing) => Ok((existing, None)),
                None => Err(e.into()),
            };
        }
        Err(e) => return Err(e.into()),
    }

    tokio::fs::create_dir_all(images_dir).await?;
    let target = images_dir.join(image.storage_filename());
    if let Err(e) = tokio::fs::copy(upload.contents.path(), &target).await {
        remove_stored_file(&target).await;
        return Err(e.into());
    }
    Ok((image, Some(target)))
}

async fn remove_stored_file(path: &FsPath) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(path = %path.display(), "Failed to remove image file: {e}");
        }
    }
}

/// Writes the course and its background image in one transaction. A freshly copied image
/// file is removed again when the transaction does not commit.
async fn save_course(
    pool: &SqlitePool,
    images_dir: &FsPath,
    upload: Option<&UploadedImage>,
    course: NewCourse<'_>,
) -> ApiResponse<i64> {
    let mut tx = pool.begin_with("BEGIN IMMEDIATE").await?;
    let (image, stored_file) = match upload {
        Some(upload) => {
            let (image, stored_file) = store_image(&mut *tx, images_dir, upload).await?;
            (Some(image), stored_file)
        }
        None => (None, None),
    };

    let result = insert_course_with_image(tx, course, image.as_ref()).await;
    if result.is_err() {
        if let Some(path) = &stored_file {
            remove_stored_file(path).await;
        }
    }
    Ok(result?)
}

async fn insert_course_with_image(
    mut tx: Transaction<'_, Sqlite>,
    course: NewCourse<'_>,
    image: Option<&Image>,
) -> sqlx::Result<i64> {
    let course_id = courses::insert_course(
        &mut *tx,
        NewCourse {
            background_image_id: image.map(|i| i.id.as_str()),
            ..course
        },
    )
    .await?;
    if let Some(image) = image {
        images::attach_image(&mut *tx, &image.id, "course", course_id).await?;
    }
    tx.commit().await?;
    Ok(course_id)
}

async fn create_course(
    State(pool): State<SqlitePool>,
    State(static_dir): State<PathBuf>,
    current_user: CurrentUser,
    TypedMultipart(form): TypedMultipart<NewCourseForm>,
) -> ApiResponse<Response> {
    let user = current_user.require("/courses/new")?;
    let name = form.name.trim();
    let short_desc = form.short_desc.trim();
    let full_desc = form.full_desc.trim();

    let category_exists = match get_category(&pool, form.category_id).await {
        Ok(_) => true,
        Err(sqlx::Error::RowNotFound) => false,
        Err(e) => return Err(e.into()),
    };
    let error = if name.is_empty() || short_desc.is_empty() || full_desc.is_empty() {
        Some("Заполните название и описания курса")
    } else if !category_exists {
        Some("Выберите категорию курса")
    } else {
        None
    };
    if let Some(error) = error {
        let page = NewCoursePage {
            current_user: Some(user),
            categories: get_all_categories(&pool).await?,
            name: name.to_owned(),
            short_desc: short_desc.to_owned(),
            full_desc: full_desc.to_owned(),
            selected_category: form.category_id,
            error: Some(error.to_owned()),
        };
        return Ok((StatusCode::BAD_REQUEST, page).into_response());
    }

    let upload = match form.background_img {
        Some(field) => read_upload(field).await?,
        None => None,
    };
    let course_id = save_course(
        &pool,
        &static_dir.join("images"),
        upload.as_ref(),
        NewCourse {
            name,
            short_desc,
            full_desc,
            category_id: form.category_id,
            author_id: user.id,
            background_image_id: None,
            created_at: Utc::now(),
        },
    )
    .await?;

    COURSES_CNTR.inc();
    tracing::info!(course_id, author_id = user.id, "Course created");
    Ok(Redirect::to(&format!("/courses/{course_id}")).into_response())
}

pub fn courses_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(catalogue))
        .route("/courses", get(catalogue))
        .route("/courses/new", get(new_course))
        .route(
            "/courses/create",
            post(create_course).layer(DefaultBodyLimit::max(MAX_IMAGE_SIZE + 64 * 1024)),
        )
        .route("/courses/{id}", get(show_course))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;
    use crate::db::queries::users::{create_user, NewUser};
    use crate::db::{establish_in_memory, run_migrations};

    const PNG: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR";

    fn upload(bytes: &[u8]) -> UploadedImage {
        let mut contents = NamedTempFile::new().unwrap();
        contents.write_all(bytes).unwrap();
        UploadedImage {
            file_name: "bg.png".to_owned(),
            mime_type: "image/png",
            content_hash: hex::encode(Sha256::digest(bytes)),
            contents,
        }
    }

    fn new_course(author_id: i64) -> NewCourse<'static> {
        NewCourse {
            name: "PYTHON С НУЛЯ",
            short_desc: "Базовый курс по Python",
            full_desc: "Полное описание Python курса",
            category_id: 1,
            author_id,
            background_image_id: None,
            created_at: Utc::now(),
        }
    }

    async fn image_rows(pool: &SqlitePool) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM images")
            .fetch_one(pool)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn failed_course_insert_leaves_no_image_behind() {
        let pool = establish_in_memory().await.unwrap();
        run_migrations(&pool).await.unwrap();
        let images_dir = tempfile::tempdir().unwrap();

        // no such author, so the course insert hits the foreign key
        let result = save_course(&pool, images_dir.path(), Some(&upload(PNG)), new_course(999)).await;
        assert!(result.is_err());
        assert_eq!(image_rows(&pool).await, 0);
        assert_eq!(std::fs::read_dir(images_dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn saved_course_keeps_image_file() {
        let pool = establish_in_memory().await.unwrap();
        run_migrations(&pool).await.unwrap();
        let images_dir = tempfile::tempdir().unwrap();
        let author_id = create_user(
            &pool,
            NewUser {
                login: "user3",
                password_hash: "!",
                first_name: "Иван",
                last_name: "Привалов",
                middle_name: None,
                created_at: Utc::now(),
            },
        )
        .await
        .unwrap();

        let course_id = save_course(&pool, images_dir.path(), Some(&upload(PNG)), new_course(author_id))
            .await
            .unwrap();
        let course = courses::get_course(&pool, course_id).await.unwrap();
        let image = get_image(&pool, course.background_image_id.as_deref().unwrap())
            .await
            .unwrap();
        assert!(image.storage_filename().ends_with(".png"));
        assert!(images_dir.path().join(image.storage_filename()).exists());
        assert_eq!(image_rows(&pool).await, 1);
    }
}
