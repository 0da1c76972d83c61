//! TOML configuration for the workbench and the tracing setup driven by it.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use thiserror::Error;
use unravel_cache::{code_cache_dir, CacheConfig, CacheError, CodeCacheConfig};
use unravel_memory::MB;
use unravel_scheduler::{ExecutorConfig, MemoryCheckConfig};

mod logging;

pub use logging::{init_tracing, LoggingConfig};

/// Environment variable naming a config file to load instead of the defaults.
pub const UNRAVEL_CONFIG_ENV_VAR: &str = "UNRAVEL_CONFIG_PATH";

/// A byte size given either as a raw integer or with a suffix (`"512MB"`, `"1.5GiB"`).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ByteSize(pub u64);

impl Serialize for ByteSize {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_u64(self.0)
    }
}

impl<'de> Deserialize<'de> for ByteSize {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Bytes(u64),
            Human(String),
        }

        match Repr::deserialize(deserializer)? {
            Repr::Bytes(value) => Ok(ByteSize(value)),
            Repr::Human(value) => unravel_memory::parse_byte_size(&value)
                .map(ByteSize)
                .map_err(serde::de::Error::custom),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UnravelConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub cache: CacheSection,
    #[serde(default)]
    pub scheduler: SchedulerSection,
    #[serde(default)]
    pub navigation: NavigationSection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CacheSection {
    /// Disk tier directory. Defaults to `<cache root>/code`, where the root comes from
    /// `UNRAVEL_CACHE_DIR` or `~/.unravel/cache`.
    #[serde(default)]
    pub dir: Option<PathBuf>,
    #[serde(default = "CacheSection::default_disk_enabled")]
    pub disk_enabled: bool,
    #[serde(default = "CacheSection::default_memory_max_entries")]
    pub memory_max_entries: usize,
    #[serde(default = "CacheSection::default_memory_max_bytes")]
    pub memory_max_bytes: ByteSize,
    /// Bump after changing decompiler settings to stop reusing previously generated code.
    #[serde(default)]
    pub settings_version: u32,
}

impl CacheSection {
    fn default_disk_enabled() -> bool {
        true
    }

    fn default_memory_max_entries() -> usize {
        CodeCacheConfig::default().max_entries
    }

    fn default_memory_max_bytes() -> ByteSize {
        ByteSize(CodeCacheConfig::default().max_bytes)
    }

    /// Resolves the disk directory (creating it) and builds the cache settings.
    pub fn code_cache_config(&self) -> Result<CodeCacheConfig, ConfigError> {
        let disk_dir = if !self.disk_enabled {
            None
        } else if let Some(dir) = &self.dir {
            std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
                path: dir.display().to_string(),
                source,
            })?;
            Some(dir.clone())
        } else {
            Some(code_cache_dir(&CacheConfig::from_env())?)
        };

        Ok(CodeCacheConfig {
            disk_dir,
            max_entries: self.memory_max_entries,
            max_bytes: self.memory_max_bytes.0,
            settings_version: self.settings_version,
        })
    }
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            dir: None,
            disk_enabled: Self::default_disk_enabled(),
            memory_max_entries: Self::default_memory_max_entries(),
            memory_max_bytes: Self::default_memory_max_bytes(),
            settings_version: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SchedulerSection {
    /// Workers per task; defaults to the available parallelism capped at 8.
    #[serde(default)]
    pub threads: Option<usize>,
    /// Whether batch decompilation watches free memory.
    #[serde(default = "SchedulerSection::default_check_memory")]
    pub check_memory: bool,
    #[serde(default = "SchedulerSection::default_min_free_memory")]
    pub min_free_memory: ByteSize,
    #[serde(default = "SchedulerSection::default_settle_delay_ms")]
    pub settle_delay_ms: u64,
    #[serde(default = "SchedulerSection::default_cancel_grace_ms")]
    pub cancel_grace_ms: u64,
}

impl SchedulerSection {
    fn default_check_memory() -> bool {
        true
    }

    fn default_min_free_memory() -> ByteSize {
        ByteSize(256 * MB)
    }

    fn default_settle_delay_ms() -> u64 {
        1_000
    }

    fn default_cancel_grace_ms() -> u64 {
        5_000
    }

    pub fn executor_config(&self) -> ExecutorConfig {
        let defaults = ExecutorConfig::default();
        ExecutorConfig {
            threads: self.threads.unwrap_or(defaults.threads),
            memory_check: MemoryCheckConfig {
                min_free_bytes: self.min_free_memory.0,
                settle_delay: Duration::from_millis(self.settle_delay_ms),
            },
            cancel_grace: Duration::from_millis(self.cancel_grace_ms),
            ..defaults
        }
    }
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            threads: None,
            check_memory: Self::default_check_memory(),
            min_free_memory: Self::default_min_free_memory(),
            settle_delay_ms: Self::default_settle_delay_ms(),
            cancel_grace_ms: Self::default_cancel_grace_ms(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NavigationSection {
    #[serde(default = "NavigationSection::default_history_limit")]
    pub history_limit: usize,
}

impl NavigationSection {
    fn default_history_limit() -> usize {
        100
    }
}

impl Default for NavigationSection {
    fn default() -> Self {
        Self {
            history_limit: Self::default_history_limit(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse toml config: {0}")]
    Toml(String),
    #[error("invalid value for `{field}`: {message}")]
    Invalid {
        field: &'static str,
        message: &'static str,
    },
    #[error(transparent)]
    Cache(#[from] CacheError),
}

impl From<toml::de::Error> for ConfigError {
    fn from(err: toml::de::Error) -> Self {
        // The default `Display` quotes the offending source line; keep only the message.
        ConfigError::Toml(sanitize_toml_error_message(err.message()))
    }
}

/// Redacts quoted user values from a toml/serde message.
fn sanitize_toml_error_message(message: &str) -> String {
    static QUOTED_STRING_RE: OnceLock<regex::Regex> = OnceLock::new();
    static BACKTICK_VALUE_RE: OnceLock<regex::Regex> = OnceLock::new();

    let quoted = QUOTED_STRING_RE.get_or_init(|| {
        regex::Regex::new(r#""(?:\\.|[^"\\])*"|'(?:\\.|[^'\\])*'"#)
            .expect("quoted-string regex should compile")
    });
    let out = quoted.replace_all(message, "\"<redacted>\"");

    // `unknown field `x`` and `unknown variant `x`` echo user input; `missing field` does not.
    let backtick = BACKTICK_VALUE_RE.get_or_init(|| {
        regex::Regex::new(r"(unknown (?:field|variant)) `[^`]*`")
            .expect("backtick regex should compile")
    });
    backtick.replace_all(&out, "$1 `<redacted>`").into_owned()
}

impl UnravelConfig {
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::load_from_str(&text)
    }

    pub fn load_from_str(text: &str) -> Result<Self, ConfigError> {
        let config: UnravelConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads the file named by `UNRAVEL_CONFIG_PATH`, or the defaults when it is unset.
    pub fn load_from_env() -> Result<(Self, Option<PathBuf>), ConfigError> {
        match std::env::var_os(UNRAVEL_CONFIG_ENV_VAR).filter(|value| !value.is_empty()) {
            Some(path) => {
                let path = PathBuf::from(path);
                let config = Self::load_from_path(&path)?;
                tracing::debug!(
                    target: "unravel.config",
                    path = %path.display(),
                    "loaded config"
                );
                Ok((config, Some(path)))
            }
            None => Ok((Self::default(), None)),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cache.memory_max_entries == 0 {
            return Err(ConfigError::Invalid {
                field: "cache.memory_max_entries",
                message: "must be at least 1",
            });
        }
        if self.scheduler.threads == Some(0) {
            return Err(ConfigError::Invalid {
                field: "scheduler.threads",
                message: "must be at least 1",
            });
        }
        if self.navigation.history_limit == 0 {
            return Err(ConfigError::Invalid {
                field: "navigation.history_limit",
                message: "must be at least 1",
            });
        }
        Ok(())
    }

    pub fn code_cache_config(&self) -> Result<CodeCacheConfig, ConfigError> {
        self.cache.code_cache_config()
    }

    pub fn executor_config(&self) -> ExecutorConfig {
        self.scheduler.executor_config()
    }
}
