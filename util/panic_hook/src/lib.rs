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

//! Custom panic hook for the IMP process.
//!
//! The IMP runs setuid and must never let a panic unwind into anything
//! other than a clean process exit: there is no caller above it that can
//! meaningfully recover from a half-initialized privileged context.

use backtrace::Backtrace;
use std::panic::{self, PanicInfo};
use std::thread;

/// Install the panic hook. Call once, before any privileged work begins.
pub fn set() {
    panic::set_hook(Box::new(panic_hook));
}

fn panic_hook(info: &PanicInfo) {
    let message = panic_message(info);
    eprintln!("{}", message);
    std::process::exit(1);
}

fn panic_message(info: &PanicInfo) -> String {
    let location = info.location();
    let file = location.as_ref().map(|l| l.file()).unwrap_or("<unknown>");
    let line = location.as_ref().map(|l| l.line()).unwrap_or(0);

    let msg = match info.payload().downcast_ref::<&'static str>() {
        Some(s) => *s,
        None => match info.payload().downcast_ref::<String>() {
            Some(s) => &s[..],
            None => "Box<Any>",
        },
    };

    let thread = thread::current();
    let name = thread.name().unwrap_or("<unnamed>");
    let backtrace = Backtrace::new();

    let lines = [
        "".to_string(),
        "====================".to_string(),
        "".to_string(),
        format!("{:?}", backtrace),
        "".to_string(),
        format!("Thread '{}' panicked at '{}', {}:{}", name, msg, file, line),
    ];

    lines.join("\n")
}
