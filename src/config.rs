use crate::core::{DbError, Result};
use crate::digest::FloatFormat;
use crate::storage::persistence::DurabilityMode;
use std::path::PathBuf;

const URL_SCHEME: &str = "simvault://";

/// Store configuration
///
/// Built with the setter chain or parsed from a store URL.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Directory holding the WAL and snapshot. `None` keeps the store in memory.
    pub data_dir: Option<PathBuf>,

    pub durability: DurabilityMode,

    /// Commits logged before an automatic checkpoint
    pub checkpoint_threshold: usize,

    /// Float encoding used by value digests. Stores that should share digests
    /// must agree on it.
    pub float_format: FloatFormat,

    /// Longest physical table name the store will generate
    pub max_identifier_len: usize,
}

impl StoreConfig {
    /// Purely in-memory configuration
    pub fn new() -> Self {
        Self {
            data_dir: None,
            durability: DurabilityMode::None,
            checkpoint_threshold: 1000,
            float_format: FloatFormat::Shortest,
            max_identifier_len: 63,
        }
    }

    /// Durable store in `dir` with the default durability mode
    pub fn persistent(dir: impl Into<PathBuf>) -> Self {
        Self::new().data_dir(dir).durability(DurabilityMode::default())
    }

    pub fn data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = Some(dir.into());
        self
    }

    pub fn durability(mut self, mode: DurabilityMode) -> Self {
        self.durability = mode;
        self
    }

    pub fn checkpoint_threshold(mut self, threshold: usize) -> Self {
        self.checkpoint_threshold = threshold;
        self
    }

    pub fn float_format(mut self, format: FloatFormat) -> Self {
        self.float_format = format;
        self
    }

    pub fn max_identifier_len(mut self, len: usize) -> Self {
        self.max_identifier_len = len;
        self
    }

    /// Whether opening this configuration touches the filesystem
    pub fn is_durable(&self) -> bool {
        self.data_dir.is_some() && self.durability != DurabilityMode::None
    }

    /// Parse from a store URL
    ///
    /// Format: `simvault:///path/to/dir?durability=sync&checkpoint=500&float=fixed:6`,
    /// or `simvault://memory` for an in-memory store.
    ///
    /// # Examples
    ///
    /// ```
    /// use simvault::StoreConfig;
    ///
    /// let config = StoreConfig::from_url("simvault:///var/lib/sim?durability=sync&checkpoint=500")?;
    /// assert!(config.is_durable());
    /// assert_eq!(config.checkpoint_threshold, 500);
    ///
    /// assert!(StoreConfig::from_url("simvault://memory").is_ok());
    /// # Ok::<(), simvault::DbError>(())
    /// ```
    pub fn from_url(url: &str) -> Result<Self> {
        let rest = url.strip_prefix(URL_SCHEME).ok_or_else(|| {
            DbError::InvalidArgument(format!("URL must start with '{}'", URL_SCHEME))
        })?;

        let (location, query) = match rest.split_once('?') {
            Some((location, query)) => (location, Some(query)),
            None => (rest, None),
        };

        let mut config = match location {
            "" => return Err(DbError::InvalidArgument("URL has no store location".into())),
            "memory" => Self::new(),
            path => Self::persistent(path),
        };

        for pair in query.into_iter().flat_map(|q| q.split('&')).filter(|p| !p.is_empty()) {
            let (key, value) = pair.split_once('=').ok_or_else(|| {
                DbError::InvalidArgument(format!("Invalid URL parameter '{}'", pair))
            })?;
            match key {
                "durability" => config.durability = value.parse()?,
                "checkpoint" => {
                    config.checkpoint_threshold = value.parse().map_err(|_| {
                        DbError::InvalidArgument(format!("Invalid checkpoint threshold '{}'", value))
                    })?
                }
                "float" => config.float_format = FloatFormat::parse(value)?,
                "max_ident" => {
                    config.max_identifier_len = value.parse().map_err(|_| {
                        DbError::InvalidArgument(format!("Invalid identifier limit '{}'", value))
                    })?
                }
                other => {
                    return Err(DbError::InvalidArgument(format!("Unknown URL parameter '{}'", other)));
                }
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.checkpoint_threshold == 0 {
            return Err(DbError::InvalidArgument("checkpoint_threshold must be > 0".into()));
        }
        // shortest legal name: one prefix char, `_`, role suffix, 8 digest chars
        if self.max_identifier_len < 11 {
            return Err(DbError::InvalidArgument(format!(
                "max_identifier_len {} is too small",
                self.max_identifier_len
            )));
        }
        if self.durability != DurabilityMode::None && self.data_dir.is_none() {
            return Err(DbError::InvalidArgument(
                "a durable store needs a data directory".into(),
            ));
        }
        Ok(())
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::new()
    }
}
