// Copyright 2018 The dirwatch Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Reading the daemon configuration.
//!
//! The configuration is a small JSON file:
//!
//! ```json
//! {
//!     "outputPath": "/var/log/dirwatch/access.log",
//!     "dirs": [{"path": "/var/data"}, {"path": "/srv/shared"}]
//! }
//! ```
//!
//! The order of `dirs` defines root-lookup order; duplicates are
//! collapsed, first occurrence winning.

use std::env;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Environment variable naming the configuration file.
static DIRWATCH_CONFIG: &str = "DIRWATCH_CONFIG";
/// Where the configuration lives when the variable is unset.
static DEFAULT_CONFIG_PATH: &str = "/etc/dirwatch.json";

/// The errors that can occur reading a configuration.
#[derive(Debug)]
pub enum ConfigError {
    /// The file could not be read.
    Read(PathBuf, io::Error),
    /// The file was read, but is not a well-formed configuration.
    Parse(PathBuf, serde_json::Error),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            ConfigError::Read(ref path, ref e) => {
                write!(f, "can't read config file {}: {}", path.display(), e)
            }
            ConfigError::Parse(ref path, ref e) => {
                write!(f, "invalid config file {}: {}", path.display(), e)
            }
        }
    }
}

/// The raw file shape; validated into [`Config`] on load.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConfigFile {
    output_path: String,
    dirs: Vec<WatchedDir>,
}

#[derive(Debug, Deserialize)]
struct WatchedDir {
    path: String,
}

/// The daemon configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Destination of the access log, opened in append mode.
    pub output_path: String,
    /// Watched roots, in lookup order, duplicates removed.
    pub dirs: Vec<String>,
}

impl Config {
    /// The configuration file location for this run.
    pub fn config_path() -> PathBuf {
        match env::var(DIRWATCH_CONFIG) {
            Ok(path) => PathBuf::from(path),
            Err(_) => PathBuf::from(DEFAULT_CONFIG_PATH),
        }
    }

    /// Loads and validates the configuration at `path`.
    pub fn load(path: &Path) -> Result<Config, ConfigError> {
        let raw = fs::read_to_string(path)
            .map_err(|e| ConfigError::Read(path.to_owned(), e))?;
        let file: ConfigFile = serde_json::from_str(&raw)
            .map_err(|e| ConfigError::Parse(path.to_owned(), e))?;
        Ok(Config::from_file(file))
    }

    fn from_file(file: ConfigFile) -> Config {
        let mut dirs: Vec<String> = Vec::new();
        for dir in file.dirs {
            if !dirs.contains(&dir.path) {
                dirs.push(dir.path);
            }
        }
        Config { output_path: file.output_path, dirs }
    }
}
