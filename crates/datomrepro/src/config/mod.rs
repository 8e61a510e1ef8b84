use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{ReproError, Result};
use crate::search::SearchBound;

mod env;

const ENV_DB_DIR: &str = "DATOMREPRO_DB_DIR";
const ENV_DB_NAME: &str = "DATOMREPRO_DB_NAME";
const ENV_EXPORT_PATH: &str = "DATOMREPRO_EXPORT_PATH";
const ENV_IMPORT_BATCH_SIZE: &str = "DATOMREPRO_IMPORT_BATCH_SIZE";
const ENV_RUN_LOG: &str = "DATOMREPRO_RUN_LOG";
const ENV_SEARCH_MAX_ATTEMPTS: &str = "DATOMREPRO_SEARCH_MAX_ATTEMPTS";
const ENV_SEARCH_DEADLINE_MS: &str = "DATOMREPRO_SEARCH_DEADLINE_MS";

pub const DEFAULT_DB_DIR: &str = ".datomrepro/databases";
pub const DEFAULT_DB_NAME: &str = "upsert-repro";
pub const DEFAULT_EXPORT_PATH: &str = "vulnerable-case.jsonl";
pub const DEFAULT_IMPORT_BATCH_SIZE: usize = 1000;

/// Where a named database lives. Two live runs must never share one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseConfig {
    pub dir: PathBuf,
    pub name: String,
}

impl DatabaseConfig {
    pub fn new(dir: impl Into<PathBuf>, name: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            name: name.into(),
        }
    }

    #[must_use]
    pub fn namespaced(&self, suffix: &str) -> Self {
        Self {
            dir: self.dir.clone(),
            name: format!("{}-{suffix}", self.name),
        }
    }

    pub fn validate(&self) -> Result<()> {
        let name = self.name.trim();
        if name.is_empty() {
            return Err(ReproError::Validation(
                "database name must not be empty".to_string(),
            ));
        }
        if name
            .chars()
            .any(|ch| !(ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.')))
            || name.starts_with('.')
        {
            return Err(ReproError::Validation(format!(
                "database name contains unsupported characters: {name}"
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarnessConfig {
    pub database: DatabaseConfig,
    pub export_path: PathBuf,
    pub import_batch_size: usize,
    pub run_log_path: Option<PathBuf>,
    pub search: SearchBound,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::new(DEFAULT_DB_DIR, DEFAULT_DB_NAME),
            export_path: PathBuf::from(DEFAULT_EXPORT_PATH),
            import_batch_size: DEFAULT_IMPORT_BATCH_SIZE,
            run_log_path: None,
            search: SearchBound::unbounded(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct HarnessConfigFile {
    #[serde(default)]
    database: DatabaseSection,
    export_path: Option<PathBuf>,
    import_batch_size: Option<usize>,
    run_log: Option<PathBuf>,
    #[serde(default)]
    search: SearchSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct DatabaseSection {
    dir: Option<PathBuf>,
    name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct SearchSection {
    max_attempts: Option<usize>,
    deadline_ms: Option<u64>,
}

impl HarnessConfig {
    /// Every path below `root`; used for scratch runs and tests.
    pub fn rooted(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        Self {
            database: DatabaseConfig::new(root.join("databases"), DEFAULT_DB_NAME),
            export_path: root.join(DEFAULT_EXPORT_PATH),
            run_log_path: Some(root.join("runs.jsonl")),
            ..Self::default()
        }
    }

    pub fn from_env() -> Result<Self> {
        Self::default().with_overrides(|name| std::env::var(name).ok())
    }

    /// Reads a TOML file, resolving relative paths against its directory, then applies env overrides.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        let base = path.parent().unwrap_or_else(|| Path::new(""));
        Self::from_toml_with_base(&raw, base)?.with_overrides(|name| std::env::var(name).ok())
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        Self::from_toml_with_base(raw, Path::new(""))
    }

    fn from_toml_with_base(raw: &str, base: &Path) -> Result<Self> {
        let file: HarnessConfigFile = toml::from_str(raw)?;
        let resolve = |path: PathBuf| {
            if path.is_relative() && !base.as_os_str().is_empty() {
                base.join(path)
            } else {
                path
            }
        };

        let mut config = Self::default();
        if let Some(dir) = file.database.dir {
            config.database.dir = resolve(dir);
        }
        if let Some(name) = file.database.name {
            config.database.name = name;
        }
        if let Some(export_path) = file.export_path {
            config.export_path = resolve(export_path);
        }
        if let Some(batch) = file.import_batch_size {
            config.import_batch_size = batch;
        }
        config.run_log_path = file.run_log.map(resolve);
        config.search.max_attempts = file.search.max_attempts;
        config.search.deadline = file.search.deadline_ms.map(Duration::from_millis);
        config.validate()?;
        Ok(config)
    }

    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(dir) = env::read_non_empty(&lookup, ENV_DB_DIR) {
            self.database.dir = PathBuf::from(dir);
        }
        if let Some(name) = env::read_non_empty(&lookup, ENV_DB_NAME) {
            self.database.name = name;
        }
        if let Some(path) = env::read_non_empty(&lookup, ENV_EXPORT_PATH) {
            self.export_path = PathBuf::from(path);
        }
        if let Some(batch) = env::read_usize_at_least(&lookup, ENV_IMPORT_BATCH_SIZE, 1)? {
            self.import_batch_size = batch;
        }
        if let Some(path) = env::read_non_empty(&lookup, ENV_RUN_LOG) {
            self.run_log_path = Some(PathBuf::from(path));
        }
        if let Some(attempts) = env::read_parsed::<usize>(&lookup, ENV_SEARCH_MAX_ATTEMPTS)? {
            self.search.max_attempts = Some(attempts);
        }
        if let Some(ms) = env::read_parsed::<u64>(&lookup, ENV_SEARCH_DEADLINE_MS)? {
            self.search.deadline = Some(Duration::from_millis(ms));
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        self.database.validate()?;
        if self.import_batch_size == 0 {
            return Err(ReproError::Validation(
                "import_batch_size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
