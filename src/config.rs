//! Repository settings.
//!
//! Settings are immutable for the lifetime of a repository instance: they
//! are parsed once at `Repository::start` and handed out as an `Arc` from
//! then on, read-mostly for the rest of its life.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

const DEFAULT_BYTES_PER_SEC: u64 = 40 * 1024 * 1024; // 40 MB

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RepositorySettings {
    pub compress: bool,
    #[serde(deserialize_with = "deserialize_byte_size")]
    pub max_snapshot_bytes_per_sec: u64,
    #[serde(deserialize_with = "deserialize_byte_size")]
    pub max_restore_bytes_per_sec: u64,
    pub readonly: bool,
    pub chunk_size: u64,
}

impl Default for RepositorySettings {
    fn default() -> Self {
        Self {
            compress: true,
            max_snapshot_bytes_per_sec: DEFAULT_BYTES_PER_SEC,
            max_restore_bytes_per_sec: DEFAULT_BYTES_PER_SEC,
            readonly: false,
            chunk_size: 64 * 1024 * 1024,
        }
    }
}

impl RepositorySettings {
    /// Validates chunk size against the on-disk layout assumptions the rest
    /// of the engine makes at `start()` time.
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            bail!("chunk_size must be a positive number of bytes");
        }
        Ok(())
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        let settings: Self = toml::from_str(text).context("parsing repository settings")?;
        settings.validate()?;
        Ok(settings)
    }
}

/// Parses either a bare integer or a `"40MB"`-style suffixed byte size.
pub fn parse_byte_size(raw: &str) -> Result<u64> {
    let raw = raw.trim();
    if let Ok(n) = raw.parse::<u64>() {
        return Ok(n);
    }
    let (digits, suffix) = raw.split_at(
        raw.find(|c: char| !c.is_ascii_digit() && c != '.')
            .ok_or_else(|| anyhow::anyhow!("invalid byte size '{}'", raw))?,
    );
    let value: f64 = digits
        .parse()
        .with_context(|| format!("invalid byte size '{}'", raw))?;
    let multiplier: u64 = match suffix.trim().to_ascii_uppercase().as_str() {
        "B" => 1,
        "KB" | "K" => 1024,
        "MB" | "M" => 1024 * 1024,
        "GB" | "G" => 1024 * 1024 * 1024,
        "TB" | "T" => 1024u64 * 1024 * 1024 * 1024,
        other => bail!("unknown byte size suffix '{}'", other),
    };
    Ok((value * multiplier as f64) as u64)
}

fn deserialize_byte_size<'de, D>(deserializer: D) -> std::result::Result<u64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(u64),
        Text(String),
    }
    match Raw::deserialize(deserializer)? {
        Raw::Number(n) => Ok(n),
        Raw::Text(s) => parse_byte_size(&s).map_err(serde::de::Error::custom),
    }
}
