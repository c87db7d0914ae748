use std::io;
use std::path::{Path, PathBuf};

use rust_cli_config::builder::{ConfigBuilder, DefaultState};
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::environment::Environment;
use crate::shared::ValidationError;

/// Directory holding the configuration layers, relative to the working directory.
const CONFIGURATION_DIR: &str = "configuration";

/// Stem of the layer every environment starts from.
const BASE_STEM: &str = "base";

/// Extensions tried, in order, for each layer.
const CONFIG_FILE_EXTENSIONS: &[&str] = &["yaml", "yml", "json"];

/// Prefix of environment variables overriding file values, e.g. `APP_KEY_PREFIX`.
const ENV_PREFIX: &str = "APP";

const ENV_PREFIX_SEPARATOR: &str = "_";

/// Separator for nested keys, e.g. `APP_TXN_RETRY__MAX_ATTEMPTS`.
const ENV_SEPARATOR: &str = "__";

/// A configuration structure loadable through [`load_config`].
///
/// Loaded values are validated before being handed out, so a process never starts with a
/// configuration its store client would reject later.
pub trait Config: DeserializeOwned {
    /// Name of the structure in load errors.
    const NAME: &'static str;

    fn validate(&self) -> Result<(), ValidationError>;
}

/// Errors that can occur while loading configuration files and overrides.
#[derive(Debug, Error)]
pub enum LoadConfigError {
    #[error("failed to determine the current directory: {0}")]
    CurrentDir(#[source] io::Error),

    #[error("configuration directory `{0}` does not exist")]
    MissingConfigurationDirectory(PathBuf),

    #[error("could not locate the {layer} layer in `{directory}`; attempted: {attempted}")]
    ConfigurationFileMissing {
        layer: String,
        directory: PathBuf,
        attempted: String,
    },

    #[error("failed to load the {layer} layer from `{path}`: {source}")]
    ConfigurationFileLoad {
        layer: String,
        path: PathBuf,
        source: rust_cli_config::ConfigError,
    },

    #[error("failed to deserialize {name}: {source}")]
    Deserialization {
        name: &'static str,
        source: rust_cli_config::ConfigError,
    },

    #[error("invalid {name}: {source}")]
    Validation {
        name: &'static str,
        source: ValidationError,
    },

    #[error("failed to determine runtime environment: {0}")]
    Environment(#[from] io::Error),

    #[error("failed to apply environment overrides: {0}")]
    Overrides(#[source] rust_cli_config::ConfigError),
}

/// One file of the layered configuration.
#[derive(Debug)]
struct ConfigLayer {
    name: String,
    path: PathBuf,
}

impl ConfigLayer {
    /// Locates the file of the layer named `stem` in `directory`.
    fn find(directory: &Path, stem: &str) -> Result<Self, LoadConfigError> {
        let candidates: Vec<PathBuf> = CONFIG_FILE_EXTENSIONS
            .iter()
            .map(|extension| directory.join(format!("{stem}.{extension}")))
            .collect();

        match candidates.iter().find(|path| path.is_file()) {
            Some(path) => Ok(Self {
                name: stem.to_string(),
                path: path.clone(),
            }),
            None => Err(LoadConfigError::ConfigurationFileMissing {
                layer: stem.to_string(),
                directory: directory.to_path_buf(),
                attempted: candidates
                    .iter()
                    .map(|path| format!("`{}`", path.display()))
                    .collect::<Vec<_>>()
                    .join(", "),
            }),
        }
    }

    /// Adds the layer to `builder`, failing early with the layer's path if its file is broken.
    fn apply(
        self,
        builder: ConfigBuilder<DefaultState>,
    ) -> Result<ConfigBuilder<DefaultState>, LoadConfigError> {
        let builder = builder.add_source(rust_cli_config::File::from(self.path.as_path()));

        match builder.clone().build() {
            Ok(_) => Ok(builder),
            Err(source) => Err(LoadConfigError::ConfigurationFileLoad {
                layer: self.name,
                path: self.path,
                source,
            }),
        }
    }
}

/// Loads and validates `T` from the `configuration` directory of the working directory.
///
/// The environment comes from `APP_ENVIRONMENT`. See [`load_config_from`] for the layering.
pub fn load_config<T: Config>() -> Result<T, LoadConfigError> {
    let base_path = std::env::current_dir().map_err(LoadConfigError::CurrentDir)?;
    let environment = Environment::load()?;

    load_config_from(&base_path.join(CONFIGURATION_DIR), environment)
}

/// Loads and validates `T` from `configuration_directory`.
///
/// Layers, later ones overriding earlier ones:
/// 1. `base.(yaml|yml|json)`,
/// 2. `{environment}.(yaml|yml|json)`,
/// 3. `APP_`-prefixed environment variables.
///
/// Fields missing from every layer take their serde defaults.
pub fn load_config_from<T: Config>(
    configuration_directory: &Path,
    environment: Environment,
) -> Result<T, LoadConfigError> {
    if !configuration_directory.is_dir() {
        return Err(LoadConfigError::MissingConfigurationDirectory(
            configuration_directory.to_path_buf(),
        ));
    }

    let layers = [
        ConfigLayer::find(configuration_directory, BASE_STEM)?,
        ConfigLayer::find(configuration_directory, environment.as_str())?,
    ];

    let mut builder = rust_cli_config::Config::builder();
    for layer in layers {
        builder = layer.apply(builder)?;
    }

    let overrides = rust_cli_config::Environment::with_prefix(ENV_PREFIX)
        .prefix_separator(ENV_PREFIX_SEPARATOR)
        .separator(ENV_SEPARATOR);

    let config: T = builder
        .add_source(overrides)
        .build()
        .map_err(LoadConfigError::Overrides)?
        .try_deserialize()
        .map_err(|source| LoadConfigError::Deserialization {
            name: T::NAME,
            source,
        })?;

    config
        .validate()
        .map_err(|source| LoadConfigError::Validation {
            name: T::NAME,
            source,
        })?;

    Ok(config)
}
