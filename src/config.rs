use std::{
    net::{IpAddr, Ipv4Addr},
    path::{Path, PathBuf},
    time::Duration,
};

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::{
    error::{Result, SyncError},
    CHUNK_SIZE, CONNECT_TIMEOUT_SECS, DEFAULT_PORT,
};

const CONFIG_FILE: &str = "batchsend.toml";
const ENV_PREFIX: &str = "BATCHSEND_";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub bind_addr: IpAddr,
    pub port: u16,
    pub connect_timeout_secs: u64,
    pub chunk_size: usize,
    pub download_dir: PathBuf,
    /// Leave files that already exist in `download_dir` untouched.
    pub skip_existing: bool,
    pub max_files: u32,
    pub max_file_size: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            connect_timeout_secs: CONNECT_TIMEOUT_SECS,
            chunk_size: CHUNK_SIZE,
            download_dir: PathBuf::from("batchsend-downloads"),
            skip_existing: false,
            max_files: 65_536,
            max_file_size: 1 << 40,
        }
    }
}

impl Config {
    /// Loads the per-user config, writing a default one on first run.
    pub fn new() -> Result<Self> {
        let dirs = directories::BaseDirs::new().ok_or(SyncError::NoHomeDir)?;

        let config_file = dirs.config_dir().join(CONFIG_FILE);
        let defaults = Self {
            download_dir: dirs.home_dir().join("batchsend-downloads"),
            ..Default::default()
        };

        if !config_file.exists() {
            log::info!("creating config file at {config_file:?}");
            std::fs::create_dir_all(dirs.config_dir())?;
            std::fs::write(&config_file, toml::to_string(&defaults)?)?;
        }

        Self::layered(defaults, &config_file)
    }

    /// Loads `path` on top of the built-in defaults. A missing file is not an error.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        Self::layered(Self::default(), path.as_ref())
    }

    fn layered(defaults: Self, path: &Path) -> Result<Self> {
        log::info!("reading config from {path:?}");
        let config: Self = Figment::from(Serialized::defaults(defaults))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX))
            .extract()
            .map_err(Box::new)?; // boxed because the error size from figment is large

        if config.chunk_size == 0 {
            return Err(SyncError::InvalidConfig(
                "chunk_size must be greater than zero".into(),
            ));
        }

        log::debug!("using config: {config:?}");
        Ok(config)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}
