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

//! PAM session bracket for the target user, opened only when
//! `[exec].pam-support` is set. Built on `pam-client`, feature-gated
//! behind this crate's `pam` feature since most dev/test environments
//! have no PAM stack to link against.
//!
//! The session is closed via `scope_finally::finally`, an RAII
//! scope-guard, so it is torn down on every exit path out of the
//! privileged half (normal return, `?`, or early `return`) without
//! duplicating the close call at each site.

#[cfg(feature = "pam")]
pub struct PamSession {
    _session: pam_client::Session<'static, pam_client::conv_mock::Conversation>,
}

#[cfg(feature = "pam")]
pub fn open_session(username: &str) -> Result<PamSession, String> {
    use pam_client::conv_mock::Conversation;
    use pam_client::{Context, Flag};

    // The IMP is already root at this point (it opens the session before
    // switching uid) and the target user has already been authenticated
    // by the envelope's signature, not by PAM — so this is a
    // non-interactive conversation, never a password prompt.
    let mut context = Context::new("flux-imp", Some(username), Conversation::new())
        .map_err(|e| format!("PAM context init failed: {}", e))?;
    context.acct_mgmt(Flag::NONE).map_err(|e| format!("PAM account management failed: {}", e))?;
    // `Session` borrows the `Context` that opened it. The IMP is a
    // one-shot process that exits shortly after the job shell does, so
    // leak the context for `'static` rather than make this struct
    // self-referential; the allocation is reclaimed when the process
    // exits regardless.
    let context: &'static mut Context<Conversation> = Box::leak(Box::new(context));
    let session = context.open_session(Flag::NONE).map_err(|e| format!("PAM session open failed: {}", e))?;
    Ok(PamSession {
        _session: session,
    })
}

#[cfg(not(feature = "pam"))]
pub struct PamSession;

#[cfg(not(feature = "pam"))]
pub fn open_session(_username: &str) -> Result<PamSession, String> {
    Err("this flux-imp build was compiled without PAM support".to_string())
}
