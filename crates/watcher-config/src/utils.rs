// Copyright 2022 Webb Technologies Inc.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::path::{Path, PathBuf};

use config::{Config, File};

use crate::WatcherConfig;

/// Returns every `toml` and `json` file under `base_dir`, recursively.
pub fn search_config_files<P: AsRef<Path>>(
    base_dir: P,
) -> rosen_watcher_utils::Result<Vec<PathBuf>> {
    // A pattern that covers all toml or json files in the config directory and subdirectories.
    let toml_pattern = format!("{}/**/*.toml", base_dir.as_ref().display());
    let json_pattern = format!("{}/**/*.json", base_dir.as_ref().display());
    tracing::trace!(
        "Loading config files from {} and {}",
        toml_pattern,
        json_pattern
    );
    let toml_files = glob::glob(&toml_pattern)?;
    let json_files = glob::glob(&json_pattern)?;
    toml_files
        .chain(json_files)
        .map(|v| v.map_err(rosen_watcher_utils::Error::from))
        .collect()
}

/// Try to parse the [`WatcherConfig`] from the given config file(s).
pub fn parse_from_files(
    files: &[PathBuf],
) -> rosen_watcher_utils::Result<WatcherConfig> {
    let mut builder = Config::builder();
    for config_file in files {
        tracing::trace!("Loading config file: {}", config_file.display());
        // get file extension
        let ext = config_file
            .extension()
            .map(|e| e.to_str().unwrap_or(""))
            .unwrap_or("");
        let format = match ext {
            "toml" => config::FileFormat::Toml,
            "json" => config::FileFormat::Json,
            _ => {
                tracing::warn!("Unknown file extension: {}", ext);
                continue;
            }
        };
        builder = builder
            .add_source(File::from(config_file.as_path()).format(format));
    }

    // also merge in the environment (with a prefix of ROSEN).
    // `ROSEN_WATCHER__SECRET` sets `watcher.secret`.
    let builder = builder.add_source(
        config::Environment::with_prefix("ROSEN")
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true),
    );
    let cfg = builder.build()?;
    // and finally deserialize the config and post-process it
    let config: Result<
        WatcherConfig,
        serde_path_to_error::Error<config::ConfigError>,
    > = serde_path_to_error::deserialize(cfg);
    match config {
        Ok(c) => postloading_process(c),
        Err(e) => {
            tracing::error!("{}", e);
            Err(e.into())
        }
    }
}

/// Load the configuration files and
///
/// Returns `Ok(WatcherConfig)` on success, or `Err(rosen_watcher_utils::Error)` on failure.
///
/// it is the same as using the [`search_config_files`] and [`parse_from_files`] functions combined.
pub fn load<P: AsRef<Path>>(
    path: P,
) -> rosen_watcher_utils::Result<WatcherConfig> {
    parse_from_files(&search_config_files(path)?)
}

/// The postloading_process exists to validate configuration and standardize
/// the format of the configuration
pub fn postloading_process(
    mut config: WatcherConfig,
) -> rosen_watcher_utils::Result<WatcherConfig> {
    tracing::trace!("Checking configration sanity ...");
    config.watcher.wid = config.watcher.wid.trim().to_owned();
    config.watcher.network = config.watcher.network.to_lowercase();
    if config.observation.confirmation >= config.observation.valid_threshold {
        tracing::warn!(
            "!!WARNING!!: observation confirmation ({}) is not below the valid threshold ({}), \
            observations will time out before they can be committed",
            config.observation.confirmation,
            config.observation.valid_threshold,
        );
    }
    config.verify()?;
    Ok(config)
}
