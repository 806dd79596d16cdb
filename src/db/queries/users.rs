use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{FromRow, SqlitePool};

#[derive(Clone, Debug, Serialize, FromRow)]
pub struct User {
    pub id: i64,
    pub login: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub first_name: String,
    pub last_name: String,
    pub middle_name: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn full_name(&self) -> String {
        match &self.middle_name {
            Some(middle) => format!("{} {} {}", self.last_name, self.first_name, middle),
            None => format!("{} {}", self.last_name, self.first_name),
        }
    }
}

pub struct NewUser<'a> {
    pub login: &'a str,
    pub password_hash: &'a str,
    pub first_name: &'a str,
    pub last_name: &'a str,
    pub middle_name: Option<&'a str>,
    pub created_at: DateTime<Utc>,
}

pub async fn get_user(pool: &SqlitePool, id: i64) -> sqlx::Result<User> {
    sqlx::query_as::<_, User>(
        r#"
        SELECT * FROM users WHERE users.id = ?1
        "#,
    )
    .bind(id)
    .fetch_one(pool)
    .await
}

pub async fn find_user_by_login(pool: &SqlitePool, login: &str) -> sqlx::Result<Option<User>> {
    sqlx::query_as::<_, User>(
        r#"
        SELECT * FROM users WHERE users.login = ?1
        "#,
    )
    .bind(login)
    .fetch_optional(pool)
    .await
}

pub async fn get_users(pool: &SqlitePool) -> sqlx::Result<Vec<User>> {
    sqlx::query_as::<_, User>(
        r#"
        SELECT * FROM users ORDER BY id
        "#,
    )
    .fetch_all(pool)
    .await
}

pub async fn create_user(pool: &SqlitePool, user: NewUser<'_>) -> sqlx::Result<i64> {
    let mut conn = pool.acquire().await?;
    let user_id = sqlx::query(
        r#"
        INSERT INTO users (login, password_hash, first_name, last_name, middle_name, created_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6)
        "#,
    )
    .bind(user.login)
    .bind(user.password_hash)
    .bind(user.first_name)
    .bind(user.last_name)
    .bind(user.middle_name)
    .bind(user.created_at)
    .execute(&mut *conn)
    .await?
    .last_insert_rowid();

    Ok(user_id)
}
