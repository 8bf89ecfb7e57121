//! NVS (Non-Volatile Storage) adapter.
//!
//! Implements both [`ConfigPort`] and [`KvStore`] for the relay node.
//!
//! - Config validation: [`DeviceConfig::validate`] runs before every save,
//!   so an unsafe strap polarity never reaches flash.
//! - Typed keys: rules are stored one field per key through [`KvStore`];
//!   the device config is one postcard blob under `devcfg`.
//! - Atomic writes: ESP-IDF NVS commits are atomic per nvs_commit().
//!
//! On the host the adapter is an in-memory map so tests can inspect what
//! would have been written.

use crate::app::ports::{ConfigError, ConfigPort, KvStore, StorageError, check_key};
use crate::config::DeviceConfig;
use log::info;
#[cfg(target_os = "espidf")]
use log::warn;

#[cfg(not(target_os = "espidf"))]
use std::collections::HashMap;

#[cfg(target_os = "espidf")]
use esp_idf_svc::sys::*;

#[cfg_attr(not(target_os = "espidf"), allow(dead_code))]
const NAMESPACE: &str = "relaynode";
const CONFIG_KEY: &str = "devcfg";

#[cfg_attr(not(target_os = "espidf"), allow(dead_code))]
const MAX_BLOB_SIZE: usize = 4000;

#[cfg(not(target_os = "espidf"))]
#[derive(Debug, Clone, PartialEq)]
enum Value {
    Int(i32),
    Str(String),
    Bool(bool),
    Blob(Vec<u8>),
}

pub struct NvsAdapter {
    #[cfg(not(target_os = "espidf"))]
    store: std::cell::RefCell<HashMap<String, Value>>,
}

impl NvsAdapter {
    /// Create a new NvsAdapter and initialise NVS flash.
    ///
    /// Returns `Err(ConfigError::IoError)` if flash initialisation fails
    /// unrecoverably. On first boot or after a version mismatch the NVS
    /// partition is erased and re-initialised automatically.
    pub fn new() -> Result<Self, ConfigError> {
        #[cfg(target_os = "espidf")]
        {
            // SAFETY: nvs_flash_init / nvs_flash_erase are called from the
            // single main-task context before any concurrent NVS access.
            let ret = unsafe { nvs_flash_init() };
            if ret == ESP_ERR_NVS_NO_FREE_PAGES || ret == ESP_ERR_NVS_NEW_VERSION_FOUND {
                warn!("NVS: erasing and re-initialising flash partition");
                let ret2 = unsafe { nvs_flash_erase() };
                if ret2 != ESP_OK {
                    return Err(ConfigError::IoError);
                }
                let ret3 = unsafe { nvs_flash_init() };
                if ret3 != ESP_OK {
                    return Err(ConfigError::IoError);
                }
            } else if ret != ESP_OK {
                return Err(ConfigError::IoError);
            }
            info!("NvsAdapter: ESP-IDF NVS initialised");
        }

        #[cfg(not(target_os = "espidf"))]
        info!("NvsAdapter: simulation backend");

        Ok(Self {
            #[cfg(not(target_os = "espidf"))]
            store: std::cell::RefCell::new(HashMap::new()),
        })
    }

    #[cfg(not(target_os = "espidf"))]
    fn get(&self, key: &str) -> Option<Value> {
        self.store.borrow().get(key).cloned()
    }

    #[cfg(not(target_os = "espidf"))]
    fn put(&self, key: &str, value: Value) -> Result<(), StorageError> {
        check_key(key)?;
        self.store.borrow_mut().insert(key.to_owned(), value);
        Ok(())
    }

    /// Open the namespace, execute a closure with the handle, then close.
    #[cfg(target_os = "espidf")]
    fn with_nvs_handle<F, T>(write: bool, f: F) -> Result<T, i32>
    where
        F: FnOnce(nvs_handle_t) -> Result<T, i32>,
    {
        let ns = c_key(NAMESPACE).map_err(|_| ESP_ERR_INVALID_ARG)?;
        let mut handle: nvs_handle_t = 0;
        let mode = if write {
            nvs_open_mode_t_NVS_READWRITE
        } else {
            nvs_open_mode_t_NVS_READONLY
        };

        let ret = unsafe { nvs_open(ns.as_ptr() as *const _, mode, &mut handle) };
        if ret != ESP_OK {
            return Err(ret);
        }

        let result = f(handle);
        unsafe {
            nvs_close(handle);
        }
        result
    }

    /// Run a write closure and commit.
    #[cfg(target_os = "espidf")]
    fn write_commit<F>(key: &str, f: F) -> Result<(), StorageError>
    where
        F: FnOnce(nvs_handle_t, *const core::ffi::c_char) -> i32,
    {
        let k = c_key(key)?;
        let result = Self::with_nvs_handle(true, |handle| {
            let ret = f(handle, k.as_ptr() as *const _);
            if ret != ESP_OK {
                return Err(ret);
            }
            let ret = unsafe { nvs_commit(handle) };
            if ret != ESP_OK {
                return Err(ret);
            }
            Ok(())
        });
        result.map_err(|e| {
            warn!("NvsAdapter: write '{}' failed: {}", key, e);
            if e == ESP_ERR_NVS_NOT_ENOUGH_SPACE {
                StorageError::Full
            } else {
                StorageError::IoError
            }
        })
    }
}

/// NUL-terminated copy of a validated key.
#[cfg(target_os = "espidf")]
fn c_key(key: &str) -> Result<[u8; 16], StorageError> {
    check_key(key)?;
    let mut buf = [0u8; 16];
    buf[..key.len()].copy_from_slice(key.as_bytes());
    Ok(buf)
}

/// Longest whole-character prefix of `value` that fits a 64-byte string.
fn truncate_to_fit(value: &str) -> heapless::String<64> {
    let mut out = heapless::String::new();
    for c in value.chars() {
        if out.push(c).is_err() {
            break;
        }
    }
    out
}

fn validate_config(cfg: &DeviceConfig) -> Result<(), ConfigError> {
    cfg.validate().map_err(ConfigError::ValidationFailed)
}

// ── ConfigPort ────────────────────────────────────────────────

impl ConfigPort for NvsAdapter {
    fn load(&self) -> Result<DeviceConfig, ConfigError> {
        #[cfg(not(target_os = "espidf"))]
        {
            match self.get(CONFIG_KEY) {
                Some(Value::Blob(bytes)) => {
                    let cfg: DeviceConfig =
                        postcard::from_bytes(&bytes).map_err(|_| ConfigError::Corrupted)?;
                    info!("NvsAdapter: loaded config from store");
                    Ok(cfg)
                }
                Some(_) => Err(ConfigError::Corrupted),
                None => Err(ConfigError::NotFound),
            }
        }

        #[cfg(target_os = "espidf")]
        {
            let key = c_key(CONFIG_KEY).map_err(|_| ConfigError::IoError)?;
            let result = Self::with_nvs_handle(false, |handle| {
                let mut size: usize = 0;

                // First call: get size
                let ret = unsafe {
                    nvs_get_blob(handle, key.as_ptr() as *const _, core::ptr::null_mut(), &mut size)
                };
                if ret != ESP_OK {
                    return Err(ret);
                }
                if size == 0 || size > MAX_BLOB_SIZE {
                    return Err(ESP_ERR_NVS_INVALID_LENGTH);
                }

                let mut buf = vec![0u8; size];
                let ret = unsafe {
                    nvs_get_blob(
                        handle,
                        key.as_ptr() as *const _,
                        buf.as_mut_ptr() as *mut _,
                        &mut size,
                    )
                };
                if ret != ESP_OK {
                    return Err(ret);
                }
                Ok(buf)
            });

            match result {
                Ok(bytes) => {
                    let cfg: DeviceConfig =
                        postcard::from_bytes(&bytes).map_err(|_| ConfigError::Corrupted)?;
                    info!("NvsAdapter: loaded config from NVS ({} bytes)", bytes.len());
                    Ok(cfg)
                }
                Err(e) if e == ESP_ERR_NVS_NOT_FOUND => Err(ConfigError::NotFound),
                Err(e) if e == ESP_ERR_NVS_INVALID_LENGTH => Err(ConfigError::Corrupted),
                Err(e) => {
                    warn!("NvsAdapter: NVS read error {}", e);
                    Err(ConfigError::IoError)
                }
            }
        }
    }

    fn save(&self, config: &DeviceConfig) -> Result<(), ConfigError> {
        validate_config(config)?;
        let bytes = postcard::to_allocvec(config).map_err(|_| ConfigError::IoError)?;

        #[cfg(not(target_os = "espidf"))]
        {
            let len = bytes.len();
            self.put(CONFIG_KEY, Value::Blob(bytes))
                .map_err(|_| ConfigError::IoError)?;
            info!("NvsAdapter: config saved (simulation, {} bytes)", len);
            Ok(())
        }

        #[cfg(target_os = "espidf")]
        {
            Self::write_commit(CONFIG_KEY, |handle, key| unsafe {
                nvs_set_blob(handle, key, bytes.as_ptr() as *const _, bytes.len())
            })
            .map_err(|e| match e {
                StorageError::Full => ConfigError::StorageFull,
                _ => ConfigError::IoError,
            })?;
            info!("NvsAdapter: config saved to NVS ({} bytes)", bytes.len());
            Ok(())
        }
    }
}

// ── KvStore ───────────────────────────────────────────────────

#[cfg(not(target_os = "espidf"))]
impl KvStore for NvsAdapter {
    fn get_int(&self, key: &str, default: i32) -> i32 {
        match self.get(key) {
            Some(Value::Int(v)) => v,
            _ => default,
        }
    }

    fn get_string(&self, key: &str, default: &str) -> heapless::String<64> {
        let value = match self.get(key) {
            Some(Value::Str(s)) => s,
            _ => default.to_owned(),
        };
        truncate_to_fit(&value)
    }

    fn get_bool(&self, key: &str, default: bool) -> bool {
        match self.get(key) {
            Some(Value::Bool(v)) => v,
            _ => default,
        }
    }

    fn set_int(&mut self, key: &str, value: i32) -> Result<(), StorageError> {
        self.put(key, Value::Int(value))
    }

    fn set_string(&mut self, key: &str, value: &str) -> Result<(), StorageError> {
        self.put(key, Value::Str(value.to_owned()))
    }

    fn set_bool(&mut self, key: &str, value: bool) -> Result<(), StorageError> {
        self.put(key, Value::Bool(value))
    }

    fn has_key(&self, key: &str) -> bool {
        self.store.borrow().contains_key(key)
    }

    fn remove(&mut self, key: &str) -> Result<(), StorageError> {
        check_key(key)?;
        self.store.borrow_mut().remove(key);
        Ok(())
    }
}

#[cfg(target_os = "espidf")]
impl KvStore for NvsAdapter {
    fn get_int(&self, key: &str, default: i32) -> i32 {
        let Ok(k) = c_key(key) else { return default };
        Self::with_nvs_handle(false, |handle| {
            let mut v: i32 = 0;
            let ret = unsafe { nvs_get_i32(handle, k.as_ptr() as *const _, &mut v) };
            if ret == ESP_OK { Ok(v) } else { Err(ret) }
        })
        .unwrap_or(default)
    }

    fn get_string(&self, key: &str, default: &str) -> heapless::String<64> {
        let fallback = || truncate_to_fit(default);
        let Ok(k) = c_key(key) else { return fallback() };
        let result = Self::with_nvs_handle(false, |handle| {
            let mut buf = [0u8; 65];
            let mut len = buf.len();
            let ret = unsafe {
                nvs_get_str(handle, k.as_ptr() as *const _, buf.as_mut_ptr() as *mut _, &mut len)
            };
            if ret != ESP_OK {
                return Err(ret);
            }
            // `len` includes the terminating NUL.
            let text = core::str::from_utf8(&buf[..len.saturating_sub(1)])
                .map_err(|_| ESP_ERR_NVS_INVALID_LENGTH)?;
            let mut s = heapless::String::new();
            s.push_str(text).map_err(|_| ESP_ERR_NVS_INVALID_LENGTH)?;
            Ok(s)
        });
        result.unwrap_or_else(|_| fallback())
    }

    fn get_bool(&self, key: &str, default: bool) -> bool {
        let Ok(k) = c_key(key) else { return default };
        Self::with_nvs_handle(false, |handle| {
            let mut v: u8 = 0;
            let ret = unsafe { nvs_get_u8(handle, k.as_ptr() as *const _, &mut v) };
            if ret == ESP_OK { Ok(v != 0) } else { Err(ret) }
        })
        .unwrap_or(default)
    }

    fn set_int(&mut self, key: &str, value: i32) -> Result<(), StorageError> {
        Self::write_commit(key, |handle, k| unsafe { nvs_set_i32(handle, k, value) })
    }

    fn set_string(&mut self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut buf = [0u8; 65];
        let len = value.len().min(64);
        buf[..len].copy_from_slice(&value.as_bytes()[..len]);
        Self::write_commit(key, |handle, k| unsafe {
            nvs_set_str(handle, k, buf.as_ptr() as *const _)
        })
    }

    fn set_bool(&mut self, key: &str, value: bool) -> Result<(), StorageError> {
        Self::write_commit(key, |handle, k| unsafe { nvs_set_u8(handle, k, u8::from(value)) })
    }

    fn has_key(&self, key: &str) -> bool {
        let Ok(k) = c_key(key) else { return false };
        Self::with_nvs_handle(false, |handle| {
            let ret = unsafe { nvs_find_key(handle, k.as_ptr() as *const _, core::ptr::null_mut()) };
            Ok(ret == ESP_OK)
        })
        .unwrap_or(false)
    }

    fn remove(&mut self, key: &str) -> Result<(), StorageError> {
        Self::write_commit(key, |handle, k| {
            let ret = unsafe { nvs_erase_key(handle, k) };
            if ret == ESP_ERR_NVS_NOT_FOUND { ESP_OK } else { ret }
        })
    }
}

impl Default for NvsAdapter {
    fn default() -> Self {
        // Falls back to an unusable-but-safe adapter if NVS is unavailable.
        Self::new().unwrap_or_else(|_| Self {
            #[cfg(not(target_os = "espidf"))]
            store: std::cell::RefCell::new(HashMap::new()),
        })
    }
}
