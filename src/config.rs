// src/config.rs

//! Configuration context
//!
//! Loaded from a JSON file, overridden with `key=value` pairs from the
//! command line. The engine reads the install root, database path and the
//! transaction/verify flag names from here.

use crate::error::{Error, Result};
use crate::ts::{ProblemFilter, TransactionFlags, VerifyFlags};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Strings accepted as boolean true
pub const TRUE_NAMES: &[&str] = &["1", "yes", "true", "on"];

/// Strings accepted as boolean false
pub const FALSE_NAMES: &[&str] = &["0", "no", "false", "off"];

/// Parse a boolean using explicit tables of accepted names
pub fn parse_bool(value: &str, true_names: &[&str], false_names: &[&str]) -> Option<bool> {
    let value = value.trim();
    if true_names.iter().any(|n| n.eq_ignore_ascii_case(value)) {
        Some(true)
    } else if false_names.iter().any(|n| n.eq_ignore_ascii_case(value)) {
        Some(false)
    } else {
        None
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split([',', ' '])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub installroot: PathBuf,
    /// Database directory, relative to the install root
    pub dbpath: PathBuf,
    /// Transaction flag names (`test`, `noscripts`, `justdb`)
    pub tsflags: Vec<String>,
    /// Verify flag names (`nodigests`, `nofiledigest`)
    pub vsflags: Vec<String>,
    /// Install packages built for other architectures
    pub ignorearch: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            installroot: PathBuf::from("/"),
            dbpath: PathBuf::from("/var/lib/pkgtx"),
            tsflags: Vec::new(),
            vsflags: Vec::new(),
            ignorearch: false,
        }
    }
}

impl Config {
    /// Load a configuration file; missing keys keep their defaults
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        serde_json::from_str(&text).map_err(|e| {
            Error::ConfigurationError(format!("{}: {}", path.display(), e))
        })
    }

    pub fn installroot(&self) -> &Path {
        &self.installroot
    }

    /// Override one option by name
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "installroot" => self.installroot = PathBuf::from(value),
            "dbpath" => self.dbpath = PathBuf::from(value),
            "tsflags" => self.tsflags = split_list(value),
            "vsflags" => self.vsflags = split_list(value),
            "ignorearch" => {
                self.ignorearch = parse_bool(value, TRUE_NAMES, FALSE_NAMES).ok_or_else(|| {
                    Error::ConfigurationError(format!("invalid boolean for {}: {}", key, value))
                })?
            }
            _ => {
                return Err(Error::ConfigurationError(format!(
                    "unknown configuration option: {}",
                    key
                )));
            }
        }
        Ok(())
    }

    pub fn transaction_flags(&self) -> Result<TransactionFlags> {
        TransactionFlags::from_names(&self.tsflags, TransactionFlags::NAMES)
            .map_err(|name| Error::ConfigurationError(format!("unknown tsflag: {}", name)))
    }

    pub fn verify_flags(&self) -> Result<VerifyFlags> {
        VerifyFlags::from_names(&self.vsflags, VerifyFlags::NAMES)
            .map_err(|name| Error::ConfigurationError(format!("unknown vsflag: {}", name)))
    }

    /// Problem kinds the configuration tells `run()` to ignore
    pub fn problem_filter(&self) -> ProblemFilter {
        if self.ignorearch {
            ProblemFilter::IGNORE_ARCH
        } else {
            ProblemFilter::empty()
        }
    }
}
