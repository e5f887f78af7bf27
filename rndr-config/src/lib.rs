//! Layered configuration for the renderer bridge.
//!
//! Configuration is a three-way merge, lowest to highest priority:
//! 1. the embedded default document (`renderer.yaml`)
//! 2. an on-disk `config.yaml` in the configuration directory, if present
//! 3. `RNDR_CONFIG__<PATH>` environment variables (double-underscore separated path)
//!
//! Access is through the process-wide singleton returned by [`get_config`], or through
//! a freshly constructed [`Config`] for tests.

use anyhow::{anyhow, Result};
use dirs::home_dir;
use lazy_static::lazy_static;
use rndr_utils::guess_local_ip;
use serde_yaml::{Mapping, Number, Value};
use std::{
    env, fs,
    path::Path,
    sync::{Arc, Mutex},
};
use tracing::info;
use uuid::Uuid;

const DEFAULT_CONFIG: &str = include_str!("renderer.yaml");

lazy_static! {
    static ref CONFIG: Arc<Config> =
        Arc::new(Config::load_config("").expect("Failed to load renderer configuration"));
}

const ENV_CONFIG_DIR: &str = "RNDR_CONFIG";
const ENV_PREFIX: &str = "RNDR_CONFIG__";

const DEFAULT_SEARCH_WINDOW: u32 = 3;
const DEFAULT_METACACHE_DEBOUNCE_MS: u32 = 2000;
const DEFAULT_PROXY_PORT: u16 = 49149;
const DEFAULT_PROXY_KILL_AFTER_MS: i32 = -1;
const DEFAULT_DISCOVERY_TIMEOUT_MS: u32 = 5000;
const DEFAULT_LOG_BUFFER_CAPACITY: usize = 1000;
const DEFAULT_LOG_MIN_LEVEL: &str = "info";

macro_rules! impl_u32_config {
    ($getter:ident, $setter:ident, $path:expr, $default:expr) => {
        pub fn $getter(&self) -> u32 {
            match self.get_value($path) {
                Ok(Value::Number(n)) if n.is_u64() => n.as_u64().unwrap() as u32,
                Ok(Value::Number(n)) if n.is_i64() => n.as_i64().unwrap() as u32,
                _ => $default,
            }
        }

        pub fn $setter(&self, v: u32) -> Result<()> {
            self.set_value($path, Value::Number(Number::from(v)))
        }
    };
}

macro_rules! impl_bool_config {
    ($getter:ident, $setter:ident, $path:expr, $default:expr) => {
        pub fn $getter(&self) -> bool {
            match self.get_value($path) {
                Ok(Value::Bool(b)) => b,
                _ => $default,
            }
        }

        pub fn $setter(&self, v: bool) -> Result<()> {
            self.set_value($path, Value::Bool(v))
        }
    };
}

/// Process-wide (or per-test) renderer configuration.
#[derive(Debug)]
pub struct Config {
    config_dir: String,
    path: String,
    data: Mutex<Value>,
}

impl Clone for Config {
    fn clone(&self) -> Self {
        let data = self.data.lock().unwrap().clone();
        Self {
            config_dir: self.config_dir.clone(),
            path: self.path.clone(),
            data: Mutex::new(data),
        }
    }
}

impl Config {
    fn find_config_dir(directory: &str) -> String {
        if !directory.is_empty() {
            return directory.to_string();
        }
        if let Ok(env_path) = env::var(ENV_CONFIG_DIR) {
            info!(env_var = ENV_CONFIG_DIR, path = %env_path, "using config dir from env");
            return env_path;
        }
        if Path::new(".rndr").exists() {
            return ".rndr".to_string();
        }
        if let Some(home) = home_dir() {
            let home_config = home.join(".rndr");
            if home_config.exists() {
                return home_config.to_string_lossy().to_string();
            }
        }
        ".rndr".to_string()
    }

    fn validate_config_dir(path: &Path) -> Result<()> {
        if !path.exists() {
            fs::create_dir_all(path)?;
        }
        if !path.is_dir() {
            return Err(anyhow!("config path is not a directory"));
        }
        let test_file = path.join(".write_test");
        fs::write(&test_file, b"test")?;
        fs::remove_file(&test_file)?;
        fs::read_dir(path)?;
        Ok(())
    }

    pub fn config_dir(directory: &str) -> String {
        let dir_path = Self::find_config_dir(directory);
        let path = Path::new(&dir_path);
        Self::validate_config_dir(path).expect("cannot validate config directory");
        dir_path
    }

    /// Loads configuration from `directory` (or the usual search path if empty).
    pub fn load_config(directory: &str) -> Result<Self> {
        let config_dir = Self::config_dir(directory);
        info!(config_dir = %config_dir, "using config directory");

        let config_file_path = Path::new(&config_dir).join("config.yaml");
        let path = config_file_path.to_string_lossy().to_string();

        let mut default_value: Value = serde_yaml::from_str(DEFAULT_CONFIG)?;

        let yaml_data = if let Ok(data) = fs::read(&path) {
            info!(config_file = %path, "loaded config file");
            data
        } else {
            info!(config_file = %path, "config file not found, using embedded defaults");
            DEFAULT_CONFIG.as_bytes().to_vec()
        };

        let external_value: Value = serde_yaml::from_slice(&yaml_data)?;
        merge_yaml(&mut default_value, &external_value);
        let mut config_value = Self::lower_keys_value(default_value);

        Self::apply_env_overrides(&mut config_value);

        let config = Config {
            config_dir,
            path,
            data: Mutex::new(config_value),
        };
        config.save()?;
        Ok(config)
    }

    /// Builds a config from an in-memory YAML document without touching disk, for tests.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let mut default_value: Value = serde_yaml::from_str(DEFAULT_CONFIG)?;
        let external_value: Value = serde_yaml::from_str(yaml)?;
        merge_yaml(&mut default_value, &external_value);
        let config_value = Self::lower_keys_value(default_value);
        Ok(Config {
            config_dir: String::new(),
            path: String::new(),
            data: Mutex::new(config_value),
        })
    }

    pub fn save(&self) -> Result<()> {
        if self.path.is_empty() {
            return Ok(());
        }
        let data = self.data.lock().unwrap();
        let yaml = serde_yaml::to_string(&*data)?;
        fs::write(&self.path, yaml)?;
        Ok(())
    }

    pub fn set_value(&self, path: &[&str], value: Value) -> Result<()> {
        let mut data = self.data.lock().unwrap();
        Self::set_value_internal(&mut data, path, value)?;
        drop(data);
        self.save()?;
        Ok(())
    }

    fn set_value_internal(data: &mut Value, path: &[&str], value: Value) -> Result<()> {
        if path.is_empty() {
            *data = value;
            return Ok(());
        }
        if let Value::Mapping(map) = data {
            let key = path[0].to_lowercase();
            let key_value = Value::String(key);
            if path.len() == 1 {
                map.insert(key_value, value);
            } else {
                let entry = map
                    .entry(key_value)
                    .or_insert(Value::Mapping(Mapping::new()));
                Self::set_value_internal(entry, &path[1..], value)?;
            }
            Ok(())
        } else {
            Err(anyhow!("config node is not a mapping"))
        }
    }

    pub fn get_value(&self, path: &[&str]) -> Result<Value> {
        let data = self.data.lock().unwrap();
        Self::get_value_internal(&data, path)
    }

    fn get_value_internal(data: &Value, path: &[&str]) -> Result<Value> {
        let mut current = data;
        for (i, key) in path.iter().enumerate() {
            if let Value::Mapping(map) = current {
                let key = key.to_lowercase();
                if let Some(next) = map.get(&Value::String(key)) {
                    current = next;
                } else {
                    return Err(anyhow!("path {} does not exist", path[..=i].join(".")));
                }
            } else {
                return Err(anyhow!("path {} is not a mapping", path[..i].join(".")));
            }
        }
        Ok(current.clone())
    }

    fn apply_env_overrides(config: &mut Value) {
        for (key, value) in env::vars() {
            if let Some(rest) = key.strip_prefix(ENV_PREFIX) {
                let key_path: Vec<&str> = rest.split("__").collect();
                let yaml_value = Self::convert_env_value(&value);
                let _ = Self::set_value_internal(config, &key_path, yaml_value);
            }
        }
    }

    fn convert_env_value(value: &str) -> Value {
        if let Ok(parsed) = serde_yaml::from_str::<Value>(value) {
            return parsed;
        }
        Value::String(value.to_string())
    }

    fn lower_keys_value(value: Value) -> Value {
        match value {
            Value::Mapping(map) => {
                let mut new_map = Mapping::new();
                for (k, v) in map {
                    if let Value::String(s) = k {
                        new_map.insert(Value::String(s.to_lowercase()), Self::lower_keys_value(v));
                    } else {
                        new_map.insert(k, Self::lower_keys_value(v));
                    }
                }
                Value::Mapping(new_map)
            }
            Value::Sequence(seq) => {
                Value::Sequence(seq.into_iter().map(Self::lower_keys_value).collect())
            }
            other => other,
        }
    }

    /// Base URL/host to use when constructing proxy URLs, falling back to the guessed
    /// local IP when unconfigured.
    pub fn get_base_host(&self) -> String {
        match self.get_value(&["renderer", "base_host"]) {
            Ok(Value::String(s)) if !s.is_empty() => s,
            _ => guess_local_ip(),
        }
    }

    pub fn get_renderer_friendly_name(&self) -> String {
        match self.get_value(&["renderer", "friendly_name"]) {
            Ok(Value::String(s)) if !s.is_empty() => s,
            _ => "Renderer Bridge".to_string(),
        }
    }

    pub fn get_device_udn(&self, devtype: &str, name: &str) -> Result<String> {
        let path = &["devices", devtype, name, "udn"];
        match self.get_value(path) {
            Ok(Value::String(udn)) => {
                let trimmed = udn.trim();
                Ok(trimmed.strip_prefix("uuid:").unwrap_or(trimmed).to_string())
            }
            _ => {
                let new_udn = Uuid::new_v4().to_string();
                self.set_value(path, Value::String(new_udn.clone()))?;
                Ok(new_udn)
            }
        }
    }

    impl_bool_config!(
        get_keepconsume,
        set_keepconsume,
        &["renderer", "keepconsume"],
        false
    );

    impl_u32_config!(
        get_search_window,
        set_search_window,
        &["playlist", "search_window"],
        DEFAULT_SEARCH_WINDOW
    );

    impl_u32_config!(
        get_metacache_save_debounce_ms,
        set_metacache_save_debounce_ms,
        &["playlist", "metacache_save_debounce_ms"],
        DEFAULT_METACACHE_DEBOUNCE_MS
    );

    pub fn get_proxy_listen_port(&self) -> u16 {
        match self.get_value(&["proxy", "listen_port"]) {
            Ok(Value::Number(n)) if n.is_u64() => n.as_u64().unwrap() as u16,
            _ => DEFAULT_PROXY_PORT,
        }
    }

    pub fn set_proxy_listen_port(&self, port: u16) -> Result<()> {
        self.set_value(&["proxy", "listen_port"], Value::Number(Number::from(port)))
    }

    pub fn get_proxy_kill_after_ms(&self) -> i32 {
        match self.get_value(&["proxy", "kill_after_ms"]) {
            Ok(Value::Number(n)) if n.is_i64() => n.as_i64().unwrap() as i32,
            _ => DEFAULT_PROXY_KILL_AFTER_MS,
        }
    }

    impl_u32_config!(
        get_discovery_download_timeout_ms,
        set_discovery_download_timeout_ms,
        &["discovery", "download_timeout_ms"],
        DEFAULT_DISCOVERY_TIMEOUT_MS
    );

    pub fn get_log_min_level(&self) -> String {
        match self.get_value(&["logger", "min_level"]) {
            Ok(Value::String(s)) => s,
            _ => DEFAULT_LOG_MIN_LEVEL.to_string(),
        }
    }

    pub fn get_log_buffer_capacity(&self) -> usize {
        match self.get_value(&["logger", "buffer_capacity"]) {
            Ok(Value::Number(n)) if n.is_u64() => n.as_u64().unwrap() as usize,
            _ => DEFAULT_LOG_BUFFER_CAPACITY,
        }
    }
}

/// Returns the process-wide configuration singleton, lazily loaded on first access.
pub fn get_config() -> Arc<Config> {
    CONFIG.clone()
}

fn merge_yaml(default: &mut Value, external: &Value) {
    match (default, external) {
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_come_from_embedded_yaml() {
        let cfg = Config::from_yaml_str("{}").unwrap();
        assert_eq!(cfg.get_search_window(), 3);
        assert_eq!(cfg.get_proxy_listen_port(), 49149);
        assert_eq!(cfg.get_proxy_kill_after_ms(), -1);
        assert!(!cfg.get_keepconsume());
    }

    #[test]
    fn external_yaml_overrides_defaults() {
        let cfg = Config::from_yaml_str("playlist:\n  search_window: 7\n").unwrap();
        assert_eq!(cfg.get_search_window(), 7);
        assert_eq!(cfg.get_proxy_listen_port(), 49149);
    }

    #[test]
    fn setters_round_trip_through_get_value() {
        let cfg = Config::from_yaml_str("{}").unwrap();
        cfg.set_value(&["proxy", "listen_port"], Value::Number(Number::from(60000u32)))
            .unwrap();
        assert_eq!(cfg.get_proxy_listen_port(), 60000);
    }

    #[test]
    fn keys_are_lowercased() {
        let cfg = Config::from_yaml_str("Playlist:\n  Search_Window: 9\n").unwrap();
        assert_eq!(cfg.get_search_window(), 9);
    }
}
