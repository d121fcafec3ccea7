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

//! Argument parsing for `flux-imp`. One subcommand today (`exec`); more
//! IMP operations (key rotation, diagnostics) would land as additional
//! subcommands alongside it.

use clap::{App, AppSettings, Arg, ArgMatches, SubCommand};

pub fn build_cli<'a, 'b>() -> App<'a, 'b> {
    App::new("flux-imp")
        .about("Privilege-separated job-shell launcher for flux-security")
        .setting(AppSettings::SubcommandRequiredElseHelp)
        .subcommand(
            SubCommand::with_name("exec")
                .about("verify an attested launch request and exec a job shell as the attested user")
                .arg(Arg::with_name("shell_path").required(true).help("absolute path to the job shell binary"))
                .arg(Arg::with_name("args").multiple(true).help("arguments passed through to the job shell")),
        )
}

pub struct ExecArgs {
    pub shell_path: String,
    pub args: Vec<String>,
}

pub fn exec_args(matches: &ArgMatches) -> ExecArgs {
    let shell_path = matches.value_of("shell_path").expect("shell_path is required").to_string();
    let args = matches
        .values_of("args")
        .map(|vals| vals.map(str::to_string).collect())
        .unwrap_or_else(Vec::new);
    ExecArgs {
        shell_path,
        args,
    }
}
