use askama::Template;
use askama_web::WebTemplate;
use axum::{
    extract::{Query, State},
    response::{IntoResponse, Redirect, Response},
    routing::get,
    Form, Router,
};
use chrono::Utc;
use secrecy::SecretString;
use serde::Deserialize;
use sqlx::SqlitePool;
use tower_sessions::Session;

use crate::{
    auth::{self, validate_login, validate_password},
    db::{
        is_unique_violation,
        queries::users::{create_user, NewUser},
        User,
    },
    server::{
        app::AppState,
        deserializers::deserialize_bool_from_checkbox,
        error::ApiResponse,
        session::{self, safe_next, CurrentUser},
    },
    telemetry::LOGINS_CNTR,
};

#[derive(Deserialize)]
struct NextQuery {
    next: Option<String>,
}

#[derive(Deserialize)]
struct LoginForm {
    login: String,
    password: SecretString,
    #[serde(default)]
    #[serde(deserialize_with = "deserialize_bool_from_checkbox")]
    remember_me: Option<bool>,
    #[serde(default)]
    next: Option<String>,
}

#[derive(Deserialize)]
struct RegisterForm {
    login: String,
    password: SecretString,
    first_name: String,
    last_name: String,
    #[serde(default)]
    middle_name: Option<String>,
}

#[derive(Template, WebTemplate)]
#[template(path = "auth/login.html")]
struct LoginPage {
    current_user: Option<User>,
    login: String,
    next: String,
    error: Option<String>,
}

#[derive(Template, WebTemplate, Default)]
#[template(path = "auth/register.html")]
struct RegisterPage {
    current_user: Option<User>,
    login: String,
    first_name: String,
    last_name: String,
    middle_name: String,
    error: Option<String>,
}

async fn login_page(
    CurrentUser(current_user): CurrentUser,
    Query(NextQuery { next }): Query<NextQuery>,
) -> LoginPage {
    LoginPage {
        current_user,
        login: String::new(),
        next: safe_next(next.as_deref()).to_owned(),
        error: None,
    }
}

async fn login(
    State(pool): State<SqlitePool>,
    session: Session,
    Form(form): Form<LoginForm>,
) -> ApiResponse<Response> {
    let login = form.login.trim();
    let next = safe_next(form.next.as_deref()).to_owned();
    match auth::authenticate(&pool, login, form.password).await? {
        Some(user) => {
            session::login(&session, user.id, form.remember_me.unwrap_or(false)).await?;
            LOGINS_CNTR.inc();
            tracing::info!(user_id = user.id, "User logged in");
            Ok(Redirect::to(&next).into_response())
        }
        None => {
            tracing::info!(login, "Failed login attempt");
            Ok(LoginPage {
                current_user: None,
                login: login.to_owned(),
                next,
                error: Some("Невозможно аутентифицироваться с указанными логином и паролем".to_owned()),
            }
            .into_response())
        }
    }
}

async fn logout(session: Session) -> ApiResponse<Redirect> {
    session::logout(&session).await?;
    Ok(Redirect::to("/"))
}

async fn register_page(CurrentUser(current_user): CurrentUser) -> RegisterPage {
    RegisterPage {
        current_user,
        ..Default::default()
    }
}

fn non_empty(value: &str) -> Option<&str> {
    Some(value.trim()).filter(|v| !v.is_empty())
}

async fn register(
    State(pool): State<SqlitePool>,
    session: Session,
    Form(form): Form<RegisterForm>,
) -> ApiResponse<Response> {
    let login = form.login.trim();
    let middle_name = form.middle_name.as_deref().and_then(non_empty);
    let mut page = RegisterPage {
        current_user: None,
        login: login.to_owned(),
        first_name: form.first_name.trim().to_owned(),
        last_name: form.last_name.trim().to_owned(),
        middle_name: middle_name.unwrap_or_default().to_owned(),
        error: None,
    };

    let validation = validate_login(login)
        .and_then(|_| validate_password(&form.password))
        .and_then(|_| match (non_empty(&form.first_name), non_empty(&form.last_name)) {
            (Some(_), Some(_)) => Ok(()),
            _ => Err("Имя и фамилия обязательны".to_owned()),
        });
    if let Err(message) = validation {
        page.error = Some(message);
        return Ok(page.into_response());
    }

    let password_hash = auth::hash_password(form.password).await?;
    let created = create_user(
        &pool,
        NewUser {
            login,
            password_hash: &password_hash,
            first_name: &page.first_name,
            last_name: &page.last_name,
            middle_name,
            created_at: Utc::now(),
        },
    )
    .await;
    let user_id = match created {
        Ok(id) => id,
        Err(e) if is_unique_violation(&e) => {
            page.error = Some("Пользователь с таким логином уже существует".to_owned());
            return Ok(page.into_response());
        }
        Err(e) => return Err(e.into()),
    };

    tracing::info!(user_id, login, "User registered");
    session::login(&session, user_id, false).await?;
    Ok(Redirect::to("/").into_response())
}

pub fn auth_router(state: AppState) -> Router {
    Router::new()
        .route("/login", get(login_page).post(login))
        .route("/logout", get(logout))
        .route("/register", get(register_page).post(register))
        .with_state(state)
}
