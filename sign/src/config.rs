// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as
// published by the Free Software Foundation, either version 3 of the
// License, or (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

//! The `[sign]` configuration subtree: `max-ttl`, `default-type`,
//! `allowed-types`. Validated once, at context/engine construction.

use serde_derive::Deserialize;

use crate::error::Error;
use crate::mechanism::known_mechanism;

/// Sentinel accepted in place of a positive `max-ttl` to disable expiry
/// entirely. Any other non-positive value is a configuration error.
pub const NO_EXPIRY: i64 = -100;

/// The subtree as it comes off the wire, before validation. A non-string
/// entry in `allowed-types` is already rejected at this stage by serde
/// (a TOML array of mixed types fails to deserialize into `Vec<String>`)
/// — `Config::validate` only has to check emptiness and mechanism names.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawConfig {
    #[serde(rename = "max-ttl")]
    pub max_ttl: i64,
    #[serde(rename = "default-type")]
    pub default_type: String,
    #[serde(rename = "allowed-types")]
    pub allowed_types: Vec<String>,
}

/// The validated subtree. Constructed only via [`Config::validate`], so
/// a `Config` in hand is always policy-consistent.
#[derive(Debug, Clone)]
pub struct Config {
    pub max_ttl: i64,
    pub default_type: String,
    pub allowed_types: Vec<String>,
}

impl Config {
    pub fn validate(raw: RawConfig) -> Result<Config, Error> {
        if raw.max_ttl <= 0 && raw.max_ttl != NO_EXPIRY {
            return Err(Error::ConfigInvalid(format!(
                "max-ttl must be positive or {} to disable expiry, got {}",
                NO_EXPIRY, raw.max_ttl
            )));
        }
        if raw.allowed_types.is_empty() {
            return Err(Error::ConfigInvalid("allowed-types must not be empty".to_string()));
        }
        for mechanism in &raw.allowed_types {
            if !known_mechanism(mechanism) {
                return Err(Error::ConfigInvalid(format!("allowed-types names unknown mechanism '{}'", mechanism)));
            }
        }
        if !known_mechanism(&raw.default_type) {
            return Err(Error::ConfigInvalid(format!("default-type '{}' is not a known mechanism", raw.default_type)));
        }
        Ok(Config {
            max_ttl: raw.max_ttl,
            default_type: raw.default_type,
            allowed_types: raw.allowed_types,
        })
    }

    pub fn from_toml_str(s: &str) -> Result<Config, Error> {
        let raw: RawConfig = toml::from_str(s)?;
        Config::validate(raw)
    }

    pub fn is_allowed(&self, mechanism: &str) -> bool {
        self.allowed_types.iter().any(|m| m == mechanism)
    }
}

/// Resolves `glob_pattern` against the filesystem, reads every match in
/// sorted path order, and merges the parsed TOML tables shallowly —
/// later files' top-level keys (e.g. `[sign]`, `[exec]`) overwrite
/// earlier ones wholesale rather than being deep-merged field by field.
/// This lets a site drop a single override file alongside a package's
/// base configuration without needing to know the base file's name.
pub fn load_merged_toml(glob_pattern: &str) -> Result<toml::Value, Error> {
    let mut paths: Vec<_> = glob::glob(glob_pattern)
        .map_err(|e| Error::ConfigInvalid(format!("invalid config glob '{}': {}", glob_pattern, e)))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| Error::ConfigInvalid(format!("error walking config glob '{}': {}", glob_pattern, e)))?;
    paths.sort();

    if paths.is_empty() {
        return Err(Error::ConfigInvalid(format!("no configuration files matched '{}'", glob_pattern)));
    }

    let mut merged = toml::value::Table::new();
    for path in paths {
        let contents = std::fs::read_to_string(&path)?;
        let parsed: toml::Value = toml::from_str(&contents)?;
        match parsed {
            toml::Value::Table(table) => {
                for (key, value) in table {
                    merged.insert(key, value);
                }
            }
            _ => {
                return Err(Error::ConfigInvalid(format!("{} does not contain a TOML table at its root", path.display())))
            }
        }
    }
    Ok(toml::Value::Table(merged))
}

/// Extracts and validates the `[sign]` subtree from an already-merged
/// configuration document.
pub fn sign_subtree(merged: &toml::Value) -> Result<Config, Error> {
    let raw = merged
        .get("sign")
        .ok_or_else(|| Error::ConfigInvalid("configuration is missing a [sign] table".to_string()))?
        .clone();
    let raw: RawConfig = raw.try_into().map_err(|e: toml::de::Error| Error::ConfigInvalid(e.to_string()))?;
    Config::validate(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(max_ttl: i64, default_type: &str, allowed_types: &[&str]) -> RawConfig {
        RawConfig {
            max_ttl,
            default_type: default_type.to_string(),
            allowed_types: allowed_types.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn accepts_positive_ttl() {
        assert!(Config::validate(raw(30, "none", &["none"])).is_ok());
    }

    #[test]
    fn accepts_no_expiry_sentinel() {
        assert!(Config::validate(raw(NO_EXPIRY, "none", &["none"])).is_ok());
    }

    #[test]
    fn rejects_zero_ttl() {
        assert!(Config::validate(raw(0, "none", &["none"])).is_err());
    }

    #[test]
    fn rejects_negative_ttl_other_than_sentinel() {
        assert!(Config::validate(raw(-5, "none", &["none"])).is_err());
    }

    #[test]
    fn rejects_empty_allowed_types() {
        assert!(Config::validate(raw(30, "none", &[])).is_err());
    }

    #[test]
    fn rejects_unknown_mechanism_in_allowed_types() {
        assert!(Config::validate(raw(30, "none", &["none", "bogus"])).is_err());
    }

    #[test]
    fn rejects_unknown_default_type() {
        assert!(Config::validate(raw(30, "bogus", &["none"])).is_err());
    }

    #[test]
    fn rejects_non_string_allowed_type_entry_at_parse_time() {
        let toml_str = "max-ttl = 30\ndefault-type = \"none\"\nallowed-types = [\"none\", 1]\n";
        assert!(Config::from_toml_str(toml_str).is_err());
    }
}
