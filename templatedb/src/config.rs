use crate::error::{Result, TemplateDbError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Default config file name, looked up in the working directory.
pub const CONFIG_FILE: &str = "templatedb.yaml";

pub const ENV_DATABASE: &str = "TEMPLATEDB_DATABASE";
pub const ENV_CATALOG: &str = "TEMPLATEDB_CATALOG";
pub const ENV_KEY_SCHEME: &str = "TEMPLATEDB_KEY_SCHEME";

/// How stored records are keyed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyScheme {
    /// `"<kind>, <name>"`; re-importing a node overwrites its record
    #[default]
    Natural,
    /// `<session-token>-<seq>`; every import creates fresh records
    Synthetic,
}

impl FromStr for KeyScheme {
    type Err = TemplateDbError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "natural" => Ok(KeyScheme::Natural),
            "synthetic" => Ok(KeyScheme::Synthetic),
            other => Err(TemplateDbError::Config(format!(
                "unknown key scheme '{other}' (expected natural or synthetic)"
            ))),
        }
    }
}

/// Generator for the per-import session token of synthetic keys
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyntheticIds {
    #[default]
    Ulid,
    Uuid,
    Nanoid,
}

impl SyntheticIds {
    pub fn generate(&self) -> String {
        match self {
            SyntheticIds::Ulid => ulid::Ulid::new().to_string().to_lowercase(),
            SyntheticIds::Uuid => uuid::Uuid::new_v4().to_string(),
            SyntheticIds::Nanoid => nanoid::nanoid!(),
        }
    }
}

/// Contents of `templatedb.yaml`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// SQLite database file
    pub database: PathBuf,
    /// Catalog YAML; the built-in UMI catalog when unset
    pub catalog: Option<PathBuf>,
    pub key_scheme: KeyScheme,
    pub synthetic_ids: SyntheticIds,
    /// Fill absent fields from catalog defaults on import
    pub apply_defaults: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            database: PathBuf::from("templates.db"),
            catalog: None,
            key_scheme: KeyScheme::default(),
            synthetic_ids: SyntheticIds::default(),
            apply_defaults: false,
        }
    }
}

impl Config {
    /// Parse a config file. Relative paths inside it are resolved against
    /// the file's directory.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            TemplateDbError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        let mut config = Self::from_yaml(&content)?;
        if let Some(dir) = path.parent() {
            config.resolve_relative_to(dir);
        }
        Ok(config)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        if content.trim().is_empty() {
            return Ok(Config::default());
        }
        Ok(serde_yaml::from_str(content)?)
    }

    /// Load `path` if given, else `templatedb.yaml` in the working directory
    /// if present, else the defaults. Environment overrides are applied last.
    pub fn discover(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) => Self::load(p)?,
            None if Path::new(CONFIG_FILE).exists() => Self::load(Path::new(CONFIG_FILE))?,
            None => Config::default(),
        };
        config.apply_env()?;
        Ok(config)
    }

    /// Apply `TEMPLATEDB_*` environment overrides.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_overrides(|name| std::env::var(name).ok())
    }

    /// Apply overrides from any variable source.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(db) = lookup(ENV_DATABASE).filter(|v| !v.is_empty()) {
            self.database = PathBuf::from(db);
        }
        if let Some(catalog) = lookup(ENV_CATALOG).filter(|v| !v.is_empty()) {
            self.catalog = Some(PathBuf::from(catalog));
        }
        if let Some(scheme) = lookup(ENV_KEY_SCHEME).filter(|v| !v.is_empty()) {
            self.key_scheme = scheme.parse()?;
        }
        Ok(())
    }

    fn resolve_relative_to(&mut self, dir: &Path) {
        if self.database.is_relative() {
            self.database = dir.join(&self.database);
        }
        if let Some(catalog) = &self.catalog {
            if catalog.is_relative() {
                self.catalog = Some(dir.join(catalog));
            }
        }
    }
}
