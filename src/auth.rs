//! Password hashing and credential checks.
//!
//! Hashes are Argon2id PHC strings. Hashing is CPU bound, so it runs on the blocking pool.

use anyhow::{anyhow, Context};
use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use secrecy::{ExposeSecret, SecretString};
use sqlx::SqlitePool;

use crate::db::queries::users::find_user_by_login;
use crate::db::User;

pub const MIN_PASSWORD_LEN: usize = 6;

pub async fn hash_password(password: SecretString) -> anyhow::Result<String> {
    tokio::task::spawn_blocking(move || {
        let salt = SaltString::generate(&mut OsRng);
        Argon2::default()
            .hash_password(password.expose_secret().as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| anyhow!("Failed to hash password: {e}"))
    })
    .await
    .context("Password hashing task panicked")?
}

pub async fn verify_password(password: SecretString, password_hash: String) -> anyhow::Result<bool> {
    tokio::task::spawn_blocking(move || {
        let parsed = match PasswordHash::new(&password_hash) {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::warn!("Stored password hash can not be parsed: {e}");
                return false;
            }
        };
        Argon2::default()
            .verify_password(password.expose_secret().as_bytes(), &parsed)
            .is_ok()
    })
    .await
    .context("Password verification task panicked")
}

/// Looks up the user by login and checks the password. `None` for unknown login or wrong password.
pub async fn authenticate(
    pool: &SqlitePool,
    login: &str,
    password: SecretString,
) -> anyhow::Result<Option<User>> {
    let Some(user) = find_user_by_login(pool, login).await? else {
        return Ok(None);
    };
    if verify_password(password, user.password_hash.clone()).await? {
        Ok(Some(user))
    } else {
        Ok(None)
    }
}

pub fn validate_login(login: &str) -> Result<(), String> {
    let len = login.chars().count();
    if !(3..=64).contains(&len) {
        return Err("Логин должен содержать от 3 до 64 символов".to_owned());
    }
    if !login
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
    {
        return Err("Логин может содержать только латинские буквы, цифры и символы _ . -".to_owned());
    }
    Ok(())
}

pub fn validate_password(password: &SecretString) -> Result<(), String> {
    if password.expose_secret().chars().count() < MIN_PASSWORD_LEN {
        return Err(format!(
            "Пароль должен содержать не менее {MIN_PASSWORD_LEN} символов"
        ));
    }
    Ok(())
}
