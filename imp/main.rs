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

//! `flux-imp`: the setuid privilege-separated job-shell launcher.
//!
//! Deliberately thin: parse argv, install the panic hook and logger,
//! load configuration, and hand off to [`exec::run`]. Everything
//! security-relevant lives in `exec`, `sign`, `privsep`, and `cgroup` —
//! not here.

mod cli;
mod config;
mod exec;
mod pam;
mod signal;
mod users;

fn main() {
    panic_hook::set();
    env_logger::init();

    let exit_code = run();
    std::process::exit(exit_code);
}

fn run() -> i32 {
    let matches = cli::build_cli().get_matches();

    match matches.subcommand() {
        ("exec", Some(sub_matches)) => {
            let args = cli::exec_args(sub_matches);
            let loaded = match config::load() {
                Ok(c) => c,
                Err(e) => {
                    log::error!("{}", e);
                    return 1;
                }
            };
            let argv: Vec<String> = std::iter::once(args.shell_path.clone()).chain(args.args.into_iter()).collect();
            exec::run(&args.shell_path, &argv, loaded)
        }
        _ => {
            eprintln!("flux-imp: no subcommand given, see --help");
            1
        }
    }
}
