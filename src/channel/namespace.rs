//! Channel name resolution
//!
//! A channel name is an opaque string shared between processes. Each name maps
//! to a Unix domain socket file inside the namespace directory.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::config::ChannelConfig;
use crate::error::TransportError;

/// `sun_path` is 108 bytes on Linux, including the trailing NUL
const MAX_SOCKET_PATH_LEN: usize = 107;

const SOCKET_SUFFIX: &str = ".sock";

/// A directory of named channels
///
/// Cheap to clone; every clone shares the same configuration.
#[derive(Debug, Clone, Default)]
pub struct ChannelNamespace {
    config: Arc<ChannelConfig>,
}

impl ChannelNamespace {
    pub fn new(config: ChannelConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    /// Namespace rooted at `dir` with otherwise default settings
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        Self::new(ChannelConfig::with_dir(dir))
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    pub fn dir(&self) -> &Path {
        &self.config.dir
    }

    /// Socket path for a channel name
    pub fn path_for(&self, name: &str) -> Result<PathBuf, TransportError> {
        if name.is_empty() || name.contains('/') || name.contains('\0') || name == "." || name == ".." {
            return Err(TransportError::InvalidName(name.to_string()));
        }

        let path = self.config.dir.join(format!("{}{}", name, SOCKET_SUFFIX));
        if path.as_os_str().len() > MAX_SOCKET_PATH_LEN {
            return Err(TransportError::InvalidName(name.to_string()));
        }

        Ok(path)
    }

    /// Create the namespace directory if it does not exist
    pub fn ensure_dir(&self) -> io::Result<()> {
        std::fs::create_dir_all(&self.config.dir)
    }
}
