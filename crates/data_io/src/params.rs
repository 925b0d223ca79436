//! Parsing of the ordered `(key, value)` configuration every `init` accepts.
//!
//! [`Params`] wraps the raw key-value list for one component. Each `take_*`
//! call consumes a key; [`Params::finish`] rejects whatever is left so typos
//! surface at `init` time. Decorators consume their own keys and hand the
//! remainder to the wrapped component with [`Params::rest`].
//!
//! Duplicate keys are last-wins: every occurrence is consumed and the final
//! value is the one parsed.
//!
//! ```ignore
//! let mut params = Params::new("BatchLoader", kwargs);
//! let batch_size: usize = params.require("batch_size")?;
//! let round_batch = params.take_flag("round_batch")?.unwrap_or(true);
//! base.init(&params.rest())?;
//! ```

use crate::error::DataError;
use anyhow::Result;
use std::fmt::Display;
use std::str::FromStr;
use tch::Kind;

/// One configuration entry.
pub type KwArg = (String, String);

/// Builds an owned kwargs list from string pairs.
pub fn kwargs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Vec<KwArg>
where
    K: Into<String>,
    V: Into<String>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}

#[derive(Debug)]
pub struct Params<'a> {
    component: &'static str,
    entries: &'a [KwArg],
    consumed: Vec<bool>,
}

impl<'a> Params<'a> {
    pub fn new(component: &'static str, entries: &'a [KwArg]) -> Self {
        Self {
            component,
            entries,
            consumed: vec![false; entries.len()],
        }
    }

    /// Consumes every occurrence of `key` and returns the last raw value.
    pub fn take_raw(&mut self, key: &str) -> Option<&'a str> {
        let mut found = None;
        for (i, (k, v)) in self.entries.iter().enumerate() {
            if k == key {
                self.consumed[i] = true;
                found = Some(v.as_str());
            }
        }
        found
    }

    /// Consumes and parses `key`, if present.
    pub fn take<T>(&mut self, key: &str) -> Result<Option<T>>
    where
        T: FromStr,
        T::Err: Display,
    {
        let component = self.component;
        self.take_raw(key)
            .map(|raw| {
                raw.trim().parse::<T>().map_err(|e| {
                    anyhow::Error::from(DataError::config(
                        component,
                        format!("invalid value '{}' for '{}': {}", raw, key, e),
                    ))
                })
            })
            .transpose()
    }

    /// Consumes and parses a mandatory key.
    pub fn require<T>(&mut self, key: &str) -> Result<T>
    where
        T: FromStr,
        T::Err: Display,
    {
        match self.take(key)? {
            Some(value) => Ok(value),
            None => Err(DataError::config(
                self.component,
                format!("missing required parameter '{}'", key),
            )
            .into()),
        }
    }

    /// Boolean flag accepting `true/false/1/0` (case-insensitive).
    pub fn take_flag(&mut self, key: &str) -> Result<Option<bool>> {
        let component = self.component;
        self.take_raw(key)
            .map(|raw| match raw.trim().to_ascii_lowercase().as_str() {
                "true" | "1" => Ok(true),
                "false" | "0" => Ok(false),
                _ => Err(anyhow::Error::from(DataError::config(
                    component,
                    format!("invalid flag '{}' for '{}' (expected true/false/1/0)", raw, key),
                ))),
            })
            .transpose()
    }

    /// Comma-separated list; empty items are rejected.
    pub fn take_list<T>(&mut self, key: &str) -> Result<Option<Vec<T>>>
    where
        T: FromStr,
        T::Err: Display,
    {
        let component = self.component;
        let Some(raw) = self.take_raw(key) else {
            return Ok(None);
        };
        raw.split(',')
            .map(|item| {
                let item = item.trim();
                item.parse::<T>().map_err(|e| {
                    anyhow::Error::from(DataError::config(
                        component,
                        format!("invalid list item '{}' for '{}': {}", item, key, e),
                    ))
                })
            })
            .collect::<Result<Vec<T>>>()
            .map(Some)
    }

    /// Element type for casts, e.g. `dtype=float32`.
    pub fn take_kind(&mut self, key: &str) -> Result<Option<Kind>> {
        let component = self.component;
        self.take_raw(key)
            .map(|raw| {
                parse_kind(raw).ok_or_else(|| {
                    anyhow::Error::from(DataError::config(
                        component,
                        format!("unknown dtype '{}' for '{}'", raw, key),
                    ))
                })
            })
            .transpose()
    }

    /// Consumes every `prefix.<key>` entry and returns them with the prefix stripped.
    pub fn take_scoped(&mut self, prefix: &str) -> Vec<KwArg> {
        let mut scoped = Vec::new();
        for (i, (k, v)) in self.entries.iter().enumerate() {
            if let Some(inner) = k
                .strip_prefix(prefix)
                .and_then(|rest| rest.strip_prefix('.'))
            {
                self.consumed[i] = true;
                scoped.push((inner.to_string(), v.clone()));
            }
        }
        scoped
    }

    /// Entries not consumed so far, in their original order.
    pub fn rest(&self) -> Vec<KwArg> {
        self.entries
            .iter()
            .zip(&self.consumed)
            .filter(|(_, &used)| !used)
            .map(|(kv, _)| kv.clone())
            .collect()
    }

    /// Fails if any key was not consumed.
    pub fn finish(self) -> Result<()> {
        let unknown: Vec<&str> = self
            .entries
            .iter()
            .zip(&self.consumed)
            .filter(|(_, &used)| !used)
            .map(|((k, _), _)| k.as_str())
            .collect();
        if unknown.is_empty() {
            Ok(())
        } else {
            Err(DataError::config(
                self.component,
                format!("unknown parameter(s): {}", unknown.join(", ")),
            )
            .into())
        }
    }
}

/// Maps a dtype name to a tensor element kind.
pub fn parse_kind(name: &str) -> Option<Kind> {
    let kind = match name.trim().to_ascii_lowercase().as_str() {
        "float16" | "half" => Kind::Half,
        "float32" | "float" => Kind::Float,
        "float64" | "double" => Kind::Double,
        "int8" => Kind::Int8,
        "uint8" => Kind::Uint8,
        "int32" | "int" => Kind::Int,
        "int64" | "long" => Kind::Int64,
        "bool" => Kind::Bool,
        _ => return None,
    };
    Some(kind)
}
