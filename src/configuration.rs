use std::path::PathBuf;

use config::builder::DefaultState;
use config::{Config, ConfigBuilder, ConfigError, Environment, File};
use serde::Deserialize;
use serde_aux::field_attributes::{deserialize_bool_from_anything, deserialize_number_from_string};

#[derive(Deserialize, Clone, Debug)]
pub struct Settings {
    pub application: ApplicationSettings,
    pub database: DatabaseSettings,
}

#[derive(Deserialize, Clone, Debug)]
pub struct ApplicationSettings {
    pub host: String,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub port: u16,
    /// Served under `/static`; uploaded images go to its `images` subdirectory.
    pub static_dir: PathBuf,
    #[serde(deserialize_with = "deserialize_bool_from_anything")]
    pub secure_cookies: bool,
}

impl ApplicationSettings {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Deserialize, Clone, Debug)]
pub struct DatabaseSettings {
    pub path: String,
}

fn with_defaults(
    builder: ConfigBuilder<DefaultState>,
) -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    builder
        .set_default("application.host", "0.0.0.0")?
        .set_default("application.port", 8080)?
        .set_default("application.static_dir", "static")?
        .set_default("application.secure_cookies", false)?
        .set_default("database.path", "courses.db")
}

/// Defaults, then `configuration.toml` if present, then `APP__SECTION__KEY` variables.
/// `DB_PATH` and `STATIC_DIR` are honoured as shorthands.
pub fn get_configuration() -> Result<Settings, ConfigError> {
    dotenv::dotenv().ok();
    with_defaults(Config::builder())?
        .add_source(File::with_name("configuration").required(false))
        .add_source(
            Environment::with_prefix("APP")
                .prefix_separator("__")
                .separator("__"),
        )
        .set_override_option("database.path", dotenv::var("DB_PATH").ok())?
        .set_override_option("application.static_dir", dotenv::var("STATIC_DIR").ok())?
        .build()?
        .try_deserialize()
}
