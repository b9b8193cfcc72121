// Copyright © 2020 Intel Corporation
//
// SPDX-License-Identifier: Apache-2.0
//

//! Flat string-keyed scenario parameters.
//!
//! Values are kept as strings exactly as loaded and only coerced at the
//! point of use, either through the typed getters on [`TestParams`] or
//! through a per-scenario struct implementing [`FromParams`].

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use log::debug;
use serde_json::Value;
use thiserror::Error;

mod private_trait {
    // Dispatches to `FromStr::from_str` on externally-defined types and to
    // custom parsing code for `Toggle`.
    pub trait Parseable
    where
        Self: Sized,
    {
        type Err;
        fn from_str(input: &str) -> Result<Self, <Self as Parseable>::Err>;
    }
}
use private_trait::Parseable;

#[derive(Error, Debug)]
pub enum Error {
    #[error("missing required parameter: {0}")]
    Missing(String),
    #[error("unable to convert {1:?} for {0}")]
    Conversion(String /* key */, String /* value */),
    #[error("invalid syntax in {origin} line {line}: {content}")]
    InvalidSyntax {
        origin: String,
        line: usize,
        content: String,
    },
    #[error("invalid parameter override, expected key=value: {0}")]
    InvalidOverride(String),
    #[error("failed to read params file {1}")]
    ReadFile(#[source] std::io::Error, String),
    #[error("failed to parse JSON params file {1}")]
    ParseJson(#[source] serde_json::Error, String),
    #[error("JSON params file {0} must hold an object of scalar values")]
    InvalidJson(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// A scenario configuration struct built from [`TestParams`] once, at the
/// scenario entry point.
pub trait FromParams: Sized {
    fn from_params(params: &TestParams) -> Result<Self>;
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TestParams {
    params: BTreeMap<String, String>,
}

impl TestParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            params: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Loads a params file into the store, overriding keys already present.
    /// Files ending in `.json` must hold a flat object, anything else is
    /// read as `key = value` lines.
    pub fn load_file<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let path = path.as_ref();
        let origin = path.display().to_string();
        let content =
            fs::read_to_string(path).map_err(|e| Error::ReadFile(e, origin.clone()))?;

        if path.extension().is_some_and(|ext| ext == "json") {
            self.parse_json(&content, &origin)
        } else {
            self.parse_str(&content, &origin)
        }
    }

    pub fn parse_str(&mut self, content: &str, origin: &str) -> Result<()> {
        for (idx, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let Some((key, value)) = line.split_once('=') else {
                return Err(Error::InvalidSyntax {
                    origin: origin.to_owned(),
                    line: idx + 1,
                    content: line.to_owned(),
                });
            };
            let key = key.trim();
            if key.is_empty() {
                return Err(Error::InvalidSyntax {
                    origin: origin.to_owned(),
                    line: idx + 1,
                    content: line.to_owned(),
                });
            }

            self.set(key, dequote(value.trim()));
        }

        Ok(())
    }

    fn parse_json(&mut self, content: &str, origin: &str) -> Result<()> {
        let v: Value =
            serde_json::from_str(content).map_err(|e| Error::ParseJson(e, origin.to_owned()))?;
        let Value::Object(map) = v else {
            return Err(Error::InvalidJson(origin.to_owned()));
        };

        for (key, value) in map {
            let value = match value {
                Value::String(s) => s,
                Value::Bool(true) => "yes".to_owned(),
                Value::Bool(false) => "no".to_owned(),
                Value::Number(n) => n.to_string(),
                Value::Null => String::new(),
                Value::Array(_) | Value::Object(_) => {
                    return Err(Error::InvalidJson(origin.to_owned()))
                }
            };
            self.set(key, value);
        }

        Ok(())
    }

    /// Applies a `key=value` override as given on the command line.
    pub fn apply_override(&mut self, input: &str) -> Result<()> {
        match input.split_once('=') {
            Some((key, value)) if !key.trim().is_empty() => {
                debug!("Overriding parameter {}={}", key.trim(), value.trim());
                self.set(key.trim(), dequote(value.trim()));
                Ok(())
            }
            _ => Err(Error::InvalidOverride(input.to_owned())),
        }
    }

    pub fn set<K: Into<String>, V: Into<String>>(&mut self, key: K, value: V) {
        self.params.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    pub fn get_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.get(key).unwrap_or(default)
    }

    pub fn require(&self, key: &str) -> Result<&str> {
        self.get(key).ok_or_else(|| Error::Missing(key.to_owned()))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.params.contains_key(key)
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.params.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// "yes"/"no" style flag. An absent or empty value yields `default`.
    pub fn get_bool(&self, key: &str, default: bool) -> Result<bool> {
        Ok(self.convert::<Toggle>(key)?.map_or(default, |t| t.0))
    }

    pub fn get_num<T: FromStr>(&self, key: &str, default: T) -> Result<T> {
        Ok(self.convert::<T>(key)?.unwrap_or(default))
    }

    pub fn convert<T: Parseable>(&self, key: &str) -> Result<Option<T>> {
        match self.get(key) {
            None => Ok(None),
            Some(v) if v.trim().is_empty() => Ok(None),
            Some(v) => Parseable::from_str(v.trim())
                .map(Some)
                .map_err(|_| Error::Conversion(key.to_owned(), v.to_owned())),
        }
    }
}

pub struct Toggle(pub bool);

#[derive(Error, Debug)]
pub enum ToggleParseError {
    #[error("invalid value: {0}")]
    InvalidValue(String),
}

impl Parseable for Toggle {
    type Err = ToggleParseError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "" => Ok(Toggle(false)),
            "yes" | "on" | "true" | "1" => Ok(Toggle(true)),
            "no" | "off" | "false" | "0" => Ok(Toggle(false)),
            _ => Err(ToggleParseError::InvalidValue(s.to_owned())),
        }
    }
}

impl<T> Parseable for T
where
    T: FromStr + Sized,
{
    type Err = <T as FromStr>::Err;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        s.parse()
    }
}

// Strips one pair of surrounding double or single quotes.
fn dequote(s: &str) -> String {
    for q in ['"', '\''] {
        if s.len() >= 2 && s.starts_with(q) && s.ends_with(q) {
            return s[1..s.len() - 1].to_owned();
        }
    }
    s.to_owned()
}
