use std::{env, fmt::Display, path::PathBuf, str::FromStr, time::Duration};

use anyhow::{Context, Result, anyhow};

pub const DEFAULT_ARCHIVE_NAME: &str = "Converted.zip";
const DEFAULT_PORT: u16 = 8080;
const DEFAULT_SOFFICE_BIN: &str = "soffice";
const DEFAULT_CONVERT_TIMEOUT_SECS: u64 = 60;
const DEFAULT_SWEEP_MAX_AGE_HOURS: u64 = 24;
const DEFAULT_SWEEP_INTERVAL_MINUTES: u64 = 24 * 60;
const DEFAULT_MAX_UPLOAD_FILES: usize = 10;
const DEFAULT_MAX_UPLOAD_MB: usize = 50;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub port: u16,
    pub workspace_root: PathBuf,
    pub soffice_bin: PathBuf,
    pub convert_timeout: Duration,
    pub sweep_max_age: Duration,
    pub sweep_interval: Duration,
    pub archive_name: String,
    pub max_upload_files: usize,
    pub max_upload_bytes: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            workspace_root: env::temp_dir(),
            soffice_bin: PathBuf::from(DEFAULT_SOFFICE_BIN),
            convert_timeout: Duration::from_secs(DEFAULT_CONVERT_TIMEOUT_SECS),
            sweep_max_age: Duration::from_secs(DEFAULT_SWEEP_MAX_AGE_HOURS * 60 * 60),
            sweep_interval: Duration::from_secs(DEFAULT_SWEEP_INTERVAL_MINUTES * 60),
            archive_name: DEFAULT_ARCHIVE_NAME.to_string(),
            max_upload_files: DEFAULT_MAX_UPLOAD_FILES,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_MB * 1024 * 1024,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let var = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let convert_timeout_secs: u64 =
            parse_var(&var, "CONVERT_TIMEOUT_SECS", DEFAULT_CONVERT_TIMEOUT_SECS)?;
        if convert_timeout_secs == 0 {
            return Err(anyhow!("CONVERT_TIMEOUT_SECS must be greater than 0"));
        }
        let sweep_max_age_hours: u64 =
            parse_var(&var, "SWEEP_MAX_AGE_HOURS", DEFAULT_SWEEP_MAX_AGE_HOURS)?;
        if sweep_max_age_hours == 0 {
            return Err(anyhow!("SWEEP_MAX_AGE_HOURS must be greater than 0"));
        }
        let sweep_interval_minutes: u64 =
            parse_var(&var, "SWEEP_INTERVAL_MINUTES", DEFAULT_SWEEP_INTERVAL_MINUTES)?;
        if sweep_interval_minutes == 0 {
            return Err(anyhow!("SWEEP_INTERVAL_MINUTES must be greater than 0"));
        }
        let max_upload_files: usize =
            parse_var(&var, "MAX_UPLOAD_FILES", DEFAULT_MAX_UPLOAD_FILES)?;
        if max_upload_files == 0 {
            return Err(anyhow!("MAX_UPLOAD_FILES must be greater than 0"));
        }
        let max_upload_mb: usize = parse_var(&var, "MAX_UPLOAD_MB", DEFAULT_MAX_UPLOAD_MB)?;

        Ok(Self {
            port: parse_var(&var, "PORT", DEFAULT_PORT)?,
            workspace_root: var("WORKSPACE_ROOT")
                .map(PathBuf::from)
                .unwrap_or(defaults.workspace_root),
            soffice_bin: var("SOFFICE_BIN")
                .map(PathBuf::from)
                .unwrap_or(defaults.soffice_bin),
            convert_timeout: Duration::from_secs(convert_timeout_secs),
            sweep_max_age: scaled_duration(sweep_max_age_hours, 60 * 60, "SWEEP_MAX_AGE_HOURS")?,
            sweep_interval: scaled_duration(
                sweep_interval_minutes,
                60,
                "SWEEP_INTERVAL_MINUTES",
            )?,
            archive_name: var("ARCHIVE_NAME").unwrap_or(defaults.archive_name),
            max_upload_files,
            max_upload_bytes: max_upload_mb
                .checked_mul(1024 * 1024)
                .ok_or_else(|| anyhow!("MAX_UPLOAD_MB is too large"))?,
        })
    }
}

fn scaled_duration(value: u64, unit_secs: u64, key: &str) -> Result<Duration> {
    value
        .checked_mul(unit_secs)
        .map(Duration::from_secs)
        .ok_or_else(|| anyhow!("{key} is too large"))
}

fn parse_var<T, F>(var: &F, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
    F: Fn(&str) -> Option<String>,
{
    match var(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|err| anyhow!("{err}"))
            .with_context(|| format!("invalid value for {key}: {raw:?}")),
        None => Ok(default),
    }
}
