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

//! The `[exec]` configuration subtree and the glob-resolved, merged TOML
//! document both subtrees are read from. `[sign]` is owned and
//! validated by `flux_sign::config`; this module only adds the IMP's
//! own `[exec]` policy on top of the same merged document.

use std::env;

use serde_derive::Deserialize;

use flux_sign::config::{load_merged_toml, sign_subtree, Config as SignConfig};

const DEFAULT_CONFIG_PATTERN: &str = "/etc/flux-security/imp*.toml";

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExecConfig {
    #[serde(rename = "allowed-users")]
    pub allowed_users: Vec<String>,
    #[serde(rename = "allowed-shells")]
    pub allowed_shells: Vec<String>,
    #[serde(rename = "allow-unprivileged-exec", default)]
    pub allow_unprivileged_exec: bool,
    #[serde(rename = "pam-support", default)]
    pub pam_support: bool,
    /// When set, the privileged parent calls `setsid()` in the job-shell
    /// child and forwards signals to `-pid` instead of `pid`, so a shell
    /// that spawns its own children still receives them as a group.
    #[serde(rename = "kill-process-group", default)]
    pub kill_process_group: bool,
}

pub struct LoadedConfig {
    pub sign: SignConfig,
    pub exec: ExecConfig,
}

fn config_pattern() -> String {
    env::var("FLUX_IMP_CONFIG_PATTERN").unwrap_or_else(|_| DEFAULT_CONFIG_PATTERN.to_string())
}

pub fn load() -> Result<LoadedConfig, String> {
    let pattern = config_pattern();
    let merged = load_merged_toml(&pattern).map_err(|e| e.to_string())?;
    let sign = sign_subtree(&merged).map_err(|e| e.to_string())?;
    let exec = exec_subtree(&merged)?;
    Ok(LoadedConfig {
        sign,
        exec,
    })
}

fn exec_subtree(merged: &toml::Value) -> Result<ExecConfig, String> {
    let raw = merged.get("exec").ok_or_else(|| "configuration is missing an [exec] table".to_string())?.clone();
    raw.try_into().map_err(|e: toml::de::Error| format!("invalid [exec] configuration: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_exec_subtree_with_defaults() {
        let doc: toml::Value = toml::from_str(
            r#"
            [sign]
            max-ttl = 30
            default-type = "none"
            allowed-types = ["none"]

            [exec]
            allowed-users = ["alice"]
            allowed-shells = ["/bin/bash"]
            "#,
        )
        .unwrap();
        let cfg = exec_subtree(&doc).unwrap();
        assert_eq!(cfg.allowed_users, vec!["alice".to_string()]);
        assert!(!cfg.allow_unprivileged_exec);
        assert!(!cfg.pam_support);
        assert!(!cfg.kill_process_group);
    }

    #[test]
    fn rejects_unknown_exec_fields() {
        let doc: toml::Value = toml::from_str(
            r#"
            [exec]
            allowed-users = []
            allowed-shells = []
            bogus-field = true
            "#,
        )
        .unwrap();
        assert!(exec_subtree(&doc).is_err());
    }
}
