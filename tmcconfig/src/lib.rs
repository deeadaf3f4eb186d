//! # TMCMusic Configuration Module
//!
//! Configuration management for TMCMusic:
//! - Loading configuration from YAML files
//! - Merging with the embedded default configuration
//! - Environment variable overrides (`TMC_CONFIG__SECTION__KEY=value`)
//! - Type-safe getters and setters for configuration values
//!
//! There is no global instance: the binary loads one [`Config`] and passes
//! the values it needs down to the session.
//!
//! ## Usage
//!
//! ```no_run
//! use tmcconfig::Config;
//!
//! let config = Config::load_config("")?;
//! let volume = config.get_player_volume()?;
//! config.set_player_shuffle(true)?;
//! # Ok::<(), anyhow::Error>(())
//! ```

use anyhow::{Result, anyhow};
use dirs::home_dir;
use serde_yaml::{Mapping, Number, Value};
use std::{
    env, fs,
    path::{Path, PathBuf},
    sync::{Mutex, MutexGuard, PoisonError},
};
use tracing::{info, warn};

pub mod secret;

pub use secret::{decrypt_secret, encrypt_secret, is_encrypted, reveal_secret};

// Configuration par défaut intégrée
const DEFAULT_CONFIG: &str = include_str!("tmcmusic.yaml");

const ENV_CONFIG_DIR: &str = "TMC_CONFIG";
const ENV_PREFIX: &str = "TMC_CONFIG__";
const CONFIG_DIR_NAME: &str = ".tmcmusic";

// Default values for configuration
const DEFAULT_LOG_MIN_LEVEL: &str = "info";
const DEFAULT_LIBRARY_FILE: &str = "library.yaml";
const DEFAULT_STATION_FETCH_LENGTH: usize = 50;
const DEFAULT_PLAYER_VOLUME: u8 = 80;
const DEFAULT_SIMULATED_TRACK_SECONDS: usize = 180;

/// Macro to generate getter/setter for usize values with default
macro_rules! impl_usize_config {
    ($getter:ident, $setter:ident, $path:expr, $default:expr) => {
        pub fn $getter(&self) -> Result<usize> {
            match self.get_value($path) {
                Ok(Value::Number(n)) => Ok(n.as_u64().map(|v| v as usize).unwrap_or($default)),
                _ => Ok($default),
            }
        }

        pub fn $setter(&self, value: usize) -> Result<()> {
            self.set_value($path, Value::Number(Number::from(value)))
        }
    };
}

/// Macro to generate getter/setter for bool values with default
macro_rules! impl_bool_config {
    ($getter:ident, $setter:ident, $path:expr, $default:expr) => {
        pub fn $getter(&self) -> Result<bool> {
            match self.get_value($path) {
                Ok(Value::Bool(b)) => Ok(b),
                _ => Ok($default),
            }
        }

        pub fn $setter(&self, value: bool) -> Result<()> {
            self.set_value($path, Value::Bool(value))
        }
    };
}

/// Macro to generate getter/setter for string values with default
macro_rules! impl_string_config {
    ($getter:ident, $setter:ident, $path:expr, $default:expr) => {
        pub fn $getter(&self) -> Result<String> {
            match self.get_value($path) {
                Ok(Value::String(s)) => Ok(s),
                _ => Ok($default.to_string()),
            }
        }

        pub fn $setter(&self, value: String) -> Result<()> {
            self.set_value($path, Value::String(value))
        }
    };
}

/// Configuration manager for TMCMusic
#[derive(Debug)]
pub struct Config {
    config_dir: PathBuf,
    path: PathBuf,
    data: Mutex<Value>,
}

impl Config {
    /// Finds a config directory by trying different locations in order
    fn find_config_dir(directory: &str) -> PathBuf {
        // 1. Try provided directory
        if !directory.is_empty() {
            return PathBuf::from(directory);
        }

        // 2. Try environment variable
        if let Ok(env_path) = env::var(ENV_CONFIG_DIR) {
            info!(env_var = ENV_CONFIG_DIR, path = %env_path, "Trying to load config from env");
            return PathBuf::from(env_path);
        }

        // 3. Try current directory
        if Path::new(CONFIG_DIR_NAME).exists() {
            return PathBuf::from(CONFIG_DIR_NAME);
        }

        // 4. Try home directory
        if let Some(home) = home_dir() {
            let home_config = home.join(CONFIG_DIR_NAME);
            if home_config.exists() {
                return home_config;
            }
        }

        // Default fallback
        PathBuf::from(CONFIG_DIR_NAME)
    }

    /// Validates and prepares a config directory
    fn validate_config_dir(path: &Path) -> Result<()> {
        if !path.exists() {
            fs::create_dir_all(path)?;
        }

        if !path.is_dir() {
            return Err(anyhow!("{} is not a directory", path.display()));
        }

        // Test write permission
        let test_file = path.join(".write_test");
        fs::write(&test_file, b"test")?;
        fs::remove_file(&test_file)?;

        // Test read permission
        fs::read_dir(path)?;

        Ok(())
    }

    /// Loads the configuration from `directory`.
    ///
    /// The directory is searched in the following order:
    /// 1. The provided `directory` parameter if not empty
    /// 2. The `TMC_CONFIG` environment variable
    /// 3. `.tmcmusic` in the current directory
    /// 4. `.tmcmusic` in the user's home directory
    ///
    /// It is created if missing and probed for read/write access. The
    /// embedded defaults are merged with `config.yaml`, then environment
    /// overrides are applied and the result is saved back.
    pub fn load_config(directory: &str) -> Result<Self> {
        let config_dir = Self::find_config_dir(directory);
        Self::validate_config_dir(&config_dir)?;
        info!(config_dir = %config_dir.display(), "Using config directory");

        let path = config_dir.join("config.yaml");

        let mut config_value: Value = serde_yaml::from_str(DEFAULT_CONFIG)?;

        match fs::read(&path) {
            Ok(data) => {
                info!(config_file = %path.display(), "Loaded config file");
                // Un fichier vide se lit comme `null` : rien à fusionner
                let external: Value = serde_yaml::from_slice(&data)?;
                merge_yaml(&mut config_value, &lower_keys_value(external));
            }
            Err(_) => {
                info!(config_file = %path.display(), "Config file not found, using default embedded config");
            }
        }

        let mut config_value = lower_keys_value(config_value);
        apply_overrides(&mut config_value, env::vars());

        let config = Config {
            config_dir,
            path,
            data: Mutex::new(config_value),
        };

        config.save()?;
        Ok(config)
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    pub fn config_file(&self) -> &Path {
        &self.path
    }

    fn data(&self) -> MutexGuard<'_, Value> {
        self.data.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Saves the current configuration to the config.yaml file
    pub fn save(&self) -> Result<()> {
        let yaml = serde_yaml::to_string(&*self.data())?;
        fs::write(&self.path, yaml)?;
        Ok(())
    }

    /// Sets a configuration value at the specified path and saves it
    ///
    /// `path` is an array of keys, e.g. `&["player", "volume"]`.
    pub fn set_value(&self, path: &[&str], value: Value) -> Result<()> {
        {
            let mut data = self.data();
            set_value_internal(&mut data, path, value)?;
        }
        self.save()
    }

    /// Gets a configuration value at the specified path
    pub fn get_value(&self, path: &[&str]) -> Result<Value> {
        get_value_internal(&self.data(), path)
    }

    /// Résout un chemin relatif au répertoire de configuration.
    /// Une valeur vide donne `None`.
    pub fn resolve_path(&self, value: &str) -> Option<PathBuf> {
        if value.trim().is_empty() {
            return None;
        }
        let path = Path::new(value);
        if path.is_absolute() {
            Some(path.to_path_buf())
        } else {
            Some(self.config_dir.join(path))
        }
    }

    impl_string_config!(
        get_log_min_level,
        set_log_min_level,
        &["logger", "min_level"],
        DEFAULT_LOG_MIN_LEVEL
    );

    impl_string_config!(get_log_file, set_log_file, &["logger", "file"], "");

    /// Fichier de log résolu, `None` pour écrire sur stderr.
    pub fn get_log_path(&self) -> Result<Option<PathBuf>> {
        Ok(self.resolve_path(&self.get_log_file()?))
    }

    impl_string_config!(
        get_library_file,
        set_library_file,
        &["catalog", "library_file"],
        DEFAULT_LIBRARY_FILE
    );

    /// Bibliothèque YAML résolue par rapport au répertoire de configuration.
    pub fn get_library_path(&self) -> Result<PathBuf> {
        let file = self.get_library_file()?;
        self.resolve_path(&file)
            .ok_or_else(|| anyhow!("catalog.library_file is empty"))
    }

    impl_string_config!(
        get_catalog_username,
        set_catalog_username,
        &["catalog", "username"],
        ""
    );

    /// Mot de passe du catalogue en clair.
    ///
    /// Une valeur saisie en clair dans `config.yaml` est acceptée telle
    /// quelle ; [`Config::set_catalog_password`] la stocke chiffrée.
    pub fn get_catalog_password(&self) -> Result<String> {
        match self.get_value(&["catalog", "password"]) {
            Ok(Value::String(s)) => reveal_secret(&s),
            _ => Ok(String::new()),
        }
    }

    pub fn set_catalog_password(&self, password: &str) -> Result<()> {
        let sealed = encrypt_secret(password)?;
        self.set_value(&["catalog", "password"], Value::String(sealed))
    }

    impl_usize_config!(
        get_station_fetch_length,
        set_station_fetch_length,
        &["catalog", "station_fetch_length"],
        DEFAULT_STATION_FETCH_LENGTH
    );

    /// Volume initial, borné à 0..=100.
    pub fn get_player_volume(&self) -> Result<u8> {
        match self.get_value(&["player", "volume"]) {
            Ok(Value::Number(n)) => match n.as_u64() {
                Some(v) => Ok(v.min(100) as u8),
                None => {
                    warn!(value = %n, "Invalid player volume, using default");
                    Ok(DEFAULT_PLAYER_VOLUME)
                }
            },
            _ => Ok(DEFAULT_PLAYER_VOLUME),
        }
    }

    pub fn set_player_volume(&self, volume: u8) -> Result<()> {
        self.set_value(
            &["player", "volume"],
            Value::Number(Number::from(volume.min(100))),
        )
    }

    impl_bool_config!(
        get_player_shuffle,
        set_player_shuffle,
        &["player", "shuffle"],
        false
    );

    impl_bool_config!(
        get_player_repeat_one,
        set_player_repeat_one,
        &["player", "repeat_one"],
        false
    );

    impl_usize_config!(
        get_simulated_track_seconds,
        set_simulated_track_seconds,
        &["player", "simulated_track_seconds"],
        DEFAULT_SIMULATED_TRACK_SECONDS
    );

    impl_string_config!(
        get_state_file,
        set_state_file,
        &["player", "state_file"],
        ""
    );

    /// Fichier d'état JSON résolu, `None` quand la diffusion est désactivée.
    pub fn get_state_path(&self) -> Result<Option<PathBuf>> {
        Ok(self.resolve_path(&self.get_state_file()?))
    }
}

fn set_value_internal(data: &mut Value, path: &[&str], value: Value) -> Result<()> {
    if path.is_empty() {
        *data = value;
        return Ok(());
    }
    if let Value::Mapping(map) = data {
        let key = Value::String(path[0].to_lowercase());
        if path.len() == 1 {
            map.insert(key, value);
        } else {
            let entry = map.entry(key).or_insert(Value::Mapping(Mapping::new()));
            set_value_internal(entry, &path[1..], value)?;
        }
        Ok(())
    } else {
        Err(anyhow!("Current node is not a map"))
    }
}

fn get_value_internal(data: &Value, path: &[&str]) -> Result<Value> {
    let mut current = data;
    for (i, key) in path.iter().enumerate() {
        if let Value::Mapping(map) = current {
            match map.get(Value::String(key.to_lowercase())) {
                Some(next) => current = next,
                None => return Err(anyhow!("Path {} does not exist", path[..=i].join("."))),
            }
        } else {
            return Err(anyhow!("Path {} is not a map", path[..i].join(".")));
        }
    }
    Ok(current.clone())
}

/// Applies `TMC_CONFIG__A__B=value` pairs to the configuration tree.
fn apply_overrides(config: &mut Value, vars: impl IntoIterator<Item = (String, String)>) {
    for (key, value) in vars {
        let Some(rest) = key.strip_prefix(ENV_PREFIX) else {
            continue;
        };
        let key_path: Vec<String> = rest.split("__").map(str::to_lowercase).collect();
        let key_path: Vec<&str> = key_path.iter().map(String::as_str).collect();
        if let Err(err) = set_value_internal(config, &key_path, convert_env_value(&value)) {
            warn!(variable = %key, error = %err, "Ignoring environment override");
        }
    }
}

fn convert_env_value(value: &str) -> Value {
    serde_yaml::from_str::<Value>(value).unwrap_or_else(|_| Value::String(value.to_string()))
}

fn lower_keys_value(value: Value) -> Value {
    match value {
        Value::Mapping(map) => {
            let mut new_map = Mapping::new();
            for (k, v) in map {
                let k = match k {
                    Value::String(s) => Value::String(s.to_lowercase()),
                    other => other,
                };
                new_map.insert(k, lower_keys_value(v));
            }
            Value::Mapping(new_map)
        }
        Value::Sequence(seq) => Value::Sequence(seq.into_iter().map(lower_keys_value).collect()),
        _ => value,
    }
}

/// Merges external YAML configuration into default configuration
///
/// Mappings are merged key by key; scalars and sequences from `external`
/// replace the default. A `null` external document changes nothing.
fn merge_yaml(default: &mut Value, external: &Value) {
    match (default, external) {
        (_, Value::Null) => {}
        (Value::Mapping(dmap), Value::Mapping(emap)) => {
            for (k, v) in emap {
                match dmap.get_mut(k) {
                    Some(dv) => merge_yaml(dv, v),
                    None => {
                        dmap.insert(k.clone(), v.clone());
                    }
                }
            }
        }
        (d, e) => *d = e.clone(),
    }
}
