//! Node configuration and the files it is loaded from.
//!
//! A node reads one JSON file at startup. The first existing file in the
//! search order wins:
//!
//! 1. the path given on the command line
//! 2. `$VSN_CONFIG`
//! 3. `./vsn_client.json`
//! 4. `~/.vsn/vsn_client.json`
//! 5. `/etc/vsn/vsn_client.json`
//!
//! Missing fields take their defaults, so `{}` is a valid file.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use activity_control::{ParameterSet, DEFAULT_ABOVE_THRESHOLD, DEFAULT_BELOW_THRESHOLD};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::image_proc::{ImageType, DEFAULT_JPEG_QUALITY};
use crate::image_size::ImageSize;
use crate::packet::NodeId;

/// File name looked up in every search directory
pub const CONFIG_FILE_NAME: &str = "vsn_client.json";

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "VSN_CONFIG";

pub const DEFAULT_SERVER_PORT: u16 = 50001;
pub const DEFAULT_DISCOVERY_PORT: u16 = 54545;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("No configuration file found (searched: {})", DisplayPaths(.searched))]
    ConfigurationMissing { searched: Vec<PathBuf> },

    #[error("Cannot access {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Cannot parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

struct DisplayPaths<'a>(&'a [PathBuf]);

impl fmt::Display for DisplayPaths<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let joined: Vec<String> = self.0.iter().map(|p| p.display().to_string()).collect();
        write!(f, "{}", joined.join(", "))
    }
}

/// Everything a node needs to run, as stored on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub parameters_below_threshold: ParameterSet,
    pub parameters_above_threshold: ParameterSet,
    #[serde(alias = "activation_level_threshold")]
    pub activation_threshold: f64,
    /// Capture resolution
    pub image_size: ImageSize,
    /// Capture rate requested from the camera driver, frames per second
    pub frame_rate: u32,
    /// Neighbour weights per node id.
    ///
    /// Persisted for the server side, which folds neighbour activity into
    /// the single `activation_neighbours` value it sends. A node only reads
    /// its own row, for logging.
    pub dependencies: BTreeMap<NodeId, Vec<f64>>,
    pub server_port: u16,
    pub discovery_port: u16,
    pub jpeg_quality: u8,
    /// Size of the blocking pool used for image work
    pub worker_threads: usize,
    /// Attach an image to every data packet, not only above threshold
    pub send_image: bool,
    pub image_type: ImageType,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            parameters_below_threshold: DEFAULT_BELOW_THRESHOLD,
            parameters_above_threshold: DEFAULT_ABOVE_THRESHOLD,
            activation_threshold: 15.0,
            image_size: ImageSize::default(),
            frame_rate: 20,
            dependencies: BTreeMap::new(),
            server_port: DEFAULT_SERVER_PORT,
            discovery_port: DEFAULT_DISCOVERY_PORT,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            worker_threads: 2,
            send_image: false,
            image_type: ImageType::default(),
        }
    }
}

impl NodeConfig {
    /// Weight of `neighbour` (1-based) as seen from `node`.
    pub fn dependency_value(&self, node: NodeId, neighbour: usize) -> Option<f64> {
        let row = self.dependencies.get(&node)?;
        row.get(neighbour.checked_sub(1)?).copied()
    }

    /// Check the values serde cannot check on its own.
    pub fn validate(&self) -> ConfigResult<()> {
        if !self.activation_threshold.is_finite() {
            return Err(ConfigError::Invalid(format!(
                "activation_threshold must be finite, got {}",
                self.activation_threshold
            )));
        }
        if self.image_size.is_empty() {
            return Err(ConfigError::Invalid(format!(
                "image_size must not be empty, got {}",
                self.image_size
            )));
        }
        if self.frame_rate == 0 {
            return Err(ConfigError::Invalid("frame_rate must be > 0".to_string()));
        }
        if !(1..=100).contains(&self.jpeg_quality) {
            return Err(ConfigError::Invalid(format!(
                "jpeg_quality must be within 1..=100, got {}",
                self.jpeg_quality
            )));
        }
        if self.worker_threads == 0 {
            return Err(ConfigError::Invalid(
                "worker_threads must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Load and validate a config file
    pub fn load_from_file(path: &Path) -> ConfigResult<Self> {
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&json).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Save as pretty-printed JSON
    pub fn save_to_file(&self, path: &Path) -> ConfigResult<()> {
        let json = serde_json::to_string_pretty(self).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        std::fs::write(path, json).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Ordered list of places a node config may live.
#[derive(Debug, Clone)]
pub struct ConfigStorage {
    search_paths: Vec<PathBuf>,
}

impl ConfigStorage {
    /// Standard search order, with `explicit` (from the command line) first.
    pub fn new(explicit: Option<PathBuf>) -> Self {
        let mut search_paths = Vec::new();
        search_paths.extend(explicit);
        if let Some(from_env) = std::env::var_os(CONFIG_ENV_VAR) {
            search_paths.push(PathBuf::from(from_env));
        }
        search_paths.push(PathBuf::from(CONFIG_FILE_NAME));
        if let Some(home) = std::env::var_os("HOME") {
            search_paths.push(PathBuf::from(home).join(".vsn").join(CONFIG_FILE_NAME));
        }
        search_paths.push(PathBuf::from("/etc/vsn").join(CONFIG_FILE_NAME));
        Self { search_paths }
    }

    /// Search only the given paths
    pub fn with_paths(search_paths: Vec<PathBuf>) -> Self {
        Self { search_paths }
    }

    pub fn search_paths(&self) -> &[PathBuf] {
        &self.search_paths
    }

    /// First search path that exists
    pub fn locate(&self) -> Option<&Path> {
        self.search_paths
            .iter()
            .map(PathBuf::as_path)
            .find(|path| path.is_file())
    }

    /// Load the first config found. Returns the path it came from.
    pub fn load(&self) -> ConfigResult<(PathBuf, NodeConfig)> {
        let path = self.locate().ok_or_else(|| ConfigError::ConfigurationMissing {
            searched: self.search_paths.clone(),
        })?;
        debug!("Loading node configuration from {}", path.display());
        let config = NodeConfig::load_from_file(path)?;
        Ok((path.to_path_buf(), config))
    }

    /// Write `config` to `path`, creating parent directories.
    pub fn save(path: &Path, config: &NodeConfig) -> ConfigResult<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| ConfigError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        config.save_to_file(path)
    }
}
