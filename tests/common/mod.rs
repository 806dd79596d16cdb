#![allow(dead_code)]

use axum::body::Body;
use axum::http::{header, HeaderMap, Request, StatusCode};
use axum::Router;
use chrono::{DateTime, Utc};
use course_reviews::auth::hash_password;
use course_reviews::db::queries::courses::{insert_course, NewCourse};
use course_reviews::db::queries::users::{create_user, get_user, NewUser};
use course_reviews::db::{establish_in_memory, run_migrations, User};
use course_reviews::reviews::submit_review;
use course_reviews::server::app::{build_app, AppState};
use http_body_util::BodyExt;
use secrecy::SecretString;
use sqlx::SqlitePool;
use tempfile::TempDir;
use tower::ServiceExt;

pub const PASSWORD: &str = "qwerty";

pub struct TestApp {
    pub pool: SqlitePool,
    pub router: Router,
    pub static_dir: TempDir,
}

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: String,
}

impl TestResponse {
    pub fn location(&self) -> &str {
        self.headers
            .get(header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
    }

    pub fn session_cookie(&self) -> Option<String> {
        self.headers
            .get_all(header::SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .find(|v| v.starts_with("session="))
            .and_then(|v| v.split(';').next())
            .map(str::to_owned)
    }
}

pub async fn spawn_app() -> TestApp {
    let pool = establish_in_memory().await.unwrap();
    run_migrations(&pool).await.unwrap();
    let static_dir = tempfile::tempdir().unwrap();
    let state = AppState {
        pool: pool.clone(),
        static_dir: static_dir.path().to_path_buf(),
    };
    TestApp {
        pool,
        router: build_app(state, false),
        static_dir,
    }
}

impl TestApp {
    pub async fn send(&self, request: Request<Body>) -> TestResponse {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        TestResponse {
            status,
            headers,
            body: String::from_utf8_lossy(&bytes).into_owned(),
        }
    }

    pub async fn get(&self, uri: &str, cookie: Option<&str>) -> TestResponse {
        let mut builder = Request::get(uri);
        if let Some(cookie) = cookie {
            builder = builder.header(header::COOKIE, cookie);
        }
        self.send(builder.body(Body::empty()).unwrap()).await
    }

    pub async fn post_form(
        &self,
        uri: &str,
        form: &[(&str, &str)],
        cookie: Option<&str>,
    ) -> TestResponse {
        let body = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(form)
            .finish();
        let mut builder = Request::post(uri).header(
            header::CONTENT_TYPE,
            "application/x-www-form-urlencoded",
        );
        if let Some(cookie) = cookie {
            builder = builder.header(header::COOKIE, cookie);
        }
        self.send(builder.body(Body::from(body)).unwrap()).await
    }

    /// Logs in and returns the `session=...` cookie pair.
    pub async fn login(&self, login: &str, password: &str) -> String {
        let response = self
            .post_form("/login", &[("login", login), ("password", password)], None)
            .await;
        assert_eq!(response.status, StatusCode::SEE_OTHER, "{}", response.body);
        response.session_cookie().expect("login sets a session cookie")
    }
}

/// A user that can log in with [`PASSWORD`].
pub async fn user_with_password(pool: &SqlitePool, login: &str) -> User {
    let hash = hash_password(SecretString::from(PASSWORD)).await.unwrap();
    insert_user(pool, login, &hash).await
}

/// A user with an unusable password hash, for seeding reviews.
pub async fn user(pool: &SqlitePool, login: &str) -> User {
    insert_user(pool, login, "!").await
}

async fn insert_user(pool: &SqlitePool, login: &str, password_hash: &str) -> User {
    let id = create_user(
        pool,
        NewUser {
            login,
            password_hash,
            first_name: "Иван",
            last_name: "Привалов",
            middle_name: None,
            created_at: Utc::now(),
        },
    )
    .await
    .unwrap();
    get_user(pool, id).await.unwrap()
}

pub async fn course(pool: &SqlitePool, author: &User, name: &str) -> i64 {
    let mut conn = pool.acquire().await.unwrap();
    insert_course(
        &mut *conn,
        NewCourse {
            name,
            short_desc: "Базовый курс по Python",
            full_desc: "Полное описание Python курса",
            category_id: 1,
            author_id: author.id,
            background_image_id: None,
            created_at: Utc::now(),
        },
    )
    .await
    .unwrap()
}

pub async fn review(
    pool: &SqlitePool,
    course_id: i64,
    user: &User,
    rating: i64,
    text: &str,
    created_at: DateTime<Utc>,
) {
    submit_review(pool, course_id, Some(user), rating, text, created_at)
        .await
        .unwrap();
}

pub async fn review_count(pool: &SqlitePool, course_id: i64) -> i64 {
    sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM reviews WHERE course_id = ?1")
        .bind(course_id)
        .fetch_one(pool)
        .await
        .unwrap()
}

pub async fn aggregate(pool: &SqlitePool, course_id: i64) -> (i64, i64) {
    sqlx::query_as::<_, (i64, i64)>("SELECT rating_sum, rating_num FROM courses WHERE id = ?1")
        .bind(course_id)
        .fetch_one(pool)
        .await
        .unwrap()
}
