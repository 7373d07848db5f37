use anyhow::{Context, Result, anyhow, bail};
use std::{
    collections::HashMap,
    env, fs,
    path::{Path, PathBuf},
    str::FromStr,
    sync::Arc,
};

use crate::origin::cloudinary::CloudinaryCredentials;
use crate::origin::{
    CloudinaryOrigin, DEFAULT_MAX_UPLOAD_BYTES, LocalOrigin, MediaOrigin, UploadLimits,
};

pub const DEFAULT_ENV_PATH: &str = ".env";
pub const DEFAULT_VIDSHELF_PORT: u16 = 4000;
pub const DEFAULT_VIDSHELF_HOST: &str = "127.0.0.1";
pub const DATABASE_FILE: &str = "catalog.db";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OriginKind {
    #[default]
    Local,
    Cloudinary,
}

impl FromStr for OriginKind {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "cloudinary" => Ok(Self::Cloudinary),
            other => bail!("unknown MEDIA_ORIGIN {other:?} (expected local or cloudinary)"),
        }
    }
}

#[derive(Debug, Clone)]
pub enum OriginSettings {
    Local,
    Cloudinary {
        credentials: CloudinaryCredentials,
        /// Upload folder; the origin's default when unset.
        folder: Option<String>,
    },
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub media_root: PathBuf,
    pub www_root: PathBuf,
    pub vidshelf_port: u16,
    pub vidshelf_host: String,
    pub origin: OriginSettings,
    pub max_upload_bytes: u64,
}

impl AppConfig {
    pub fn database_path(&self) -> PathBuf {
        self.media_root.join(DATABASE_FILE)
    }

    pub fn upload_limits(&self) -> UploadLimits {
        UploadLimits {
            max_size_bytes: self.max_upload_bytes,
        }
    }

    pub fn media_origin(&self) -> Arc<dyn MediaOrigin> {
        match &self.origin {
            OriginSettings::Local => Arc::new(LocalOrigin::new(self.media_root.clone())),
            OriginSettings::Cloudinary {
                credentials,
                folder,
            } => {
                let origin = CloudinaryOrigin::new(credentials.clone());
                match folder {
                    Some(folder) => Arc::new(origin.with_folder(folder.clone())),
                    None => Arc::new(origin),
                }
            }
        }
    }
}

/// Values supplied on the command line. They beat both the environment and
/// the `.env` file.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub media_root: Option<PathBuf>,
    pub www_root: Option<PathBuf>,
    pub vidshelf_port: Option<u16>,
    pub vidshelf_host: Option<String>,
    pub origin: Option<OriginKind>,
    pub max_upload_bytes: Option<u64>,
    pub env_path: Option<PathBuf>,
}

pub fn resolve_config(overrides: ConfigOverrides) -> Result<AppConfig> {
    let env_path = overrides
        .env_path
        .as_deref()
        .unwrap_or_else(|| Path::new(DEFAULT_ENV_PATH));
    let file_vars = read_env_file(env_path)?;
    build_config_with_overrides(&file_vars, env_var_string, overrides)
}

/// Resolves only `MEDIA_ROOT`, for tools that touch the catalogue database
/// but never serve the frontend.
pub fn resolve_media_root(
    override_root: Option<PathBuf>,
    env_path: Option<&Path>,
) -> Result<PathBuf> {
    if let Some(root) = override_root {
        return Ok(root);
    }
    let file_vars = read_env_file(env_path.unwrap_or_else(|| Path::new(DEFAULT_ENV_PATH)))?;
    media_root_from(&file_vars, env_var_string)
}

fn media_root_from(
    file_vars: &HashMap<String, String>,
    env_lookup: impl Fn(&str) -> Option<String>,
) -> Result<PathBuf> {
    lookup_value("MEDIA_ROOT", file_vars, &env_lookup)
        .map(PathBuf::from)
        .ok_or_else(|| anyhow!("MEDIA_ROOT not set"))
}

#[cfg(test)]
fn build_config(
    file_vars: &HashMap<String, String>,
    env_lookup: impl Fn(&str) -> Option<String>,
) -> Result<AppConfig> {
    build_config_with_overrides(file_vars, env_lookup, ConfigOverrides::default())
}

fn build_config_with_overrides(
    file_vars: &HashMap<String, String>,
    env_lookup: impl Fn(&str) -> Option<String>,
    overrides: ConfigOverrides,
) -> Result<AppConfig> {
    let lookup = |key: &str| lookup_value(key, file_vars, &env_lookup);

    let media_root = overrides
        .media_root
        .map(|path| path.to_string_lossy().into_owned())
        .or_else(|| lookup("MEDIA_ROOT"))
        .ok_or_else(|| anyhow!("MEDIA_ROOT not set"))?;
    let www_root = overrides
        .www_root
        .map(|path| path.to_string_lossy().into_owned())
        .or_else(|| lookup("WWW_ROOT"))
        .ok_or_else(|| anyhow!("WWW_ROOT not set"))?;
    let vidshelf_port = overrides
        .vidshelf_port
        .or_else(|| lookup("VIDSHELF_PORT").and_then(|value| value.parse::<u16>().ok()))
        .unwrap_or(DEFAULT_VIDSHELF_PORT);
    let vidshelf_host = overrides
        .vidshelf_host
        .and_then(non_blank)
        .or_else(|| lookup("VIDSHELF_HOST"))
        .unwrap_or_else(|| DEFAULT_VIDSHELF_HOST.to_string());
    let max_upload_bytes = overrides
        .max_upload_bytes
        .or_else(|| lookup("MAX_UPLOAD_BYTES").and_then(|value| value.parse::<u64>().ok()))
        .filter(|limit| *limit > 0)
        .unwrap_or(DEFAULT_MAX_UPLOAD_BYTES);

    let origin_kind = match overrides.origin {
        Some(kind) => kind,
        None => lookup("MEDIA_ORIGIN")
            .map(|value| value.parse::<OriginKind>())
            .transpose()?
            .unwrap_or_default(),
    };
    let origin = match origin_kind {
        OriginKind::Local => OriginSettings::Local,
        OriginKind::Cloudinary => {
            let require = |key: &str| {
                lookup(key).ok_or_else(|| anyhow!("{key} not set (required by MEDIA_ORIGIN=cloudinary)"))
            };
            OriginSettings::Cloudinary {
                credentials: CloudinaryCredentials {
                    cloud_name: require("CLOUDINARY_CLOUD_NAME")?,
                    api_key: require("CLOUDINARY_API_KEY")?,
                    api_secret: require("CLOUDINARY_API_SECRET")?,
                },
                folder: lookup("CLOUDINARY_FOLDER"),
            }
        }
    };

    Ok(AppConfig {
        media_root: PathBuf::from(media_root),
        www_root: PathBuf::from(www_root),
        vidshelf_port,
        vidshelf_host,
        origin,
        max_upload_bytes,
    })
}

fn non_blank(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn env_var_string(key: &str) -> Option<String> {
    env::var(key).ok().and_then(non_blank)
}

fn lookup_value(
    key: &str,
    file_vars: &HashMap<String, String>,
    env_lookup: &impl Fn(&str) -> Option<String>,
) -> Option<String> {
    env_lookup(key)
        .and_then(non_blank)
        .or_else(|| file_vars.get(key).cloned().and_then(non_blank))
}

pub fn read_env_file(path: &Path) -> Result<HashMap<String, String>> {
    let mut vars = HashMap::new();
    if !path.exists() {
        return Ok(vars);
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("Reading {}", path.display()))?;
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let line = trimmed.strip_prefix("export ").unwrap_or(trimmed);
        let Some((key, value_raw)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        let value = value_raw.trim();
        let value = value
            .strip_prefix('"')
            .and_then(|value| value.strip_suffix('"'))
            .or_else(|| {
                value
                    .strip_prefix('\'')
                    .and_then(|value| value.strip_suffix('\''))
            })
            .unwrap_or(value);
        vars.insert(key.to_string(), value.to_string());
    }
    Ok(vars)
}
