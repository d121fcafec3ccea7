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

//! `sign`: reads a payload from stdin, wraps it for the current user
//! under the configured `[sign]` policy, writes one envelope line to
//! stdout.
//!
//! Stdin is read to EOF with a growable buffer rather than a fixed-size
//! one, so there is no reason to die on a payload one byte over an
//! arbitrary limit.

use std::env;
use std::io::{self, Read, Write};

use flux_sign::config::{load_merged_toml, sign_subtree, Config};
use flux_sign::SignEngine;

const DEFAULT_CONFIG_PATTERN: &str = "/etc/flux-security/sign.toml";

fn main() {
    env_logger::init();

    if let Err(err) = run() {
        eprintln!("sign: {}", err);
        std::process::exit(1);
    }
}

fn run() -> Result<(), String> {
    let config = load_config()?;

    let mut payload = Vec::new();
    io::stdin().read_to_end(&mut payload).map_err(|e| format!("failed to read stdin: {}", e))?;

    let mut engine = SignEngine::new(config);
    let envelope = match engine.wrap_current(&payload, None, 0) {
        Ok(s) => s.to_string(),
        Err(e) => return Err(engine.last_error().unwrap_or_else(|| e.to_string())),
    };

    let stdout = io::stdout();
    let mut handle = stdout.lock();
    writeln!(handle, "{}", envelope).map_err(|e| format!("failed to write envelope: {}", e))?;
    Ok(())
}

fn load_config() -> Result<Config, String> {
    let pattern = env::var("FLUX_IMP_CONFIG_PATTERN").unwrap_or_else(|_| DEFAULT_CONFIG_PATTERN.to_string());
    let merged = load_merged_toml(&pattern).map_err(|e| e.to_string())?;
    sign_subtree(&merged).map_err(|e| e.to_string())
}
