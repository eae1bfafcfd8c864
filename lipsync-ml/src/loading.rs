use std::path::Path;

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;

fn read_with<T, E>(path: &Path, parse: impl FnOnce(&str) -> Result<T, E>) -> Result<T>
where
    E: std::error::Error + Send + Sync + 'static,
{
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read {}", path.display()))?;
    parse(&text).with_context(|| format!("malformed {}", path.display()))
}

pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    read_with(path, |text| serde_json::from_str(text))
}

pub fn read_yaml<T: DeserializeOwned>(path: &Path) -> Result<T> {
    read_with(path, |text| serde_yaml::from_str(text))
}
