use std::fmt::Display;
use std::str::FromStr;

use serde::{Deserialize, Deserializer};

// forms send "on" or not including the value for checkbox
pub fn deserialize_bool_from_checkbox<'de, D>(deserializer: D) -> Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    if let Some(value) = value {
        match value.as_str() {
            "on" => Ok(Some(true)),
            variant => Err(serde::de::Error::unknown_variant(variant, &["on"])),
        }
    } else {
        Ok(None)
    }
}

// selects and GET forms submit "" for "nothing chosen"
pub fn empty_string_as_none<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: FromStr,
    T::Err: Display,
{
    let value = Option::<String>::deserialize(deserializer)?;
    match value.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(value) => value.parse::<T>().map(Some).map_err(serde::de::Error::custom),
    }
}
