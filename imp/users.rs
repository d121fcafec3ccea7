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

//! `/etc/passwd` lookups, reached through a narrow trait so the exec
//! pipeline never calls libc `getpwnam`/`getpwuid` directly.

use std::path::PathBuf;

/// What the privileged half needs to know about the target user before
/// it can irrevocably switch to them: uid, primary gid, name (for
/// `initgroups`, which derives the supplementary group list from the
/// passwd/group database itself), and a home directory for PAM (the job
/// shell itself always `chdir`s to `/`).
#[derive(Debug, Clone, PartialEq)]
pub struct TargetUser {
    pub uid: u32,
    pub gid: u32,
    pub name: String,
    pub home: PathBuf,
}

pub trait UserLookup {
    fn uid_for_name(&self, name: &str) -> Option<u32>;
    fn lookup_uid(&self, uid: u32) -> Option<TargetUser>;
}

pub struct SystemUsers;

impl UserLookup for SystemUsers {
    fn uid_for_name(&self, name: &str) -> Option<u32> {
        users::get_user_by_name(name).map(|u| u.uid())
    }

    fn lookup_uid(&self, uid: u32) -> Option<TargetUser> {
        let user = users::get_user_by_uid(uid)?;
        let name = user.name().to_string_lossy().to_string();
        Some(TargetUser {
            uid: user.uid(),
            gid: user.primary_group_id(),
            name,
            home: user.home_dir().to_path_buf(),
        })
    }
}

/// True if `caller_uid` resolves to a username present in
/// `allowed_users`. A uid with no passwd entry never matches — an
/// unresolvable caller identity is never implicitly trusted.
pub fn caller_is_allowed(users: &dyn UserLookup, caller_uid: u32, allowed_users: &[String]) -> bool {
    allowed_users.iter().any(|name| users.uid_for_name(name) == Some(caller_uid))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct FakeUsers(HashMap<String, u32>);

    impl UserLookup for FakeUsers {
        fn uid_for_name(&self, name: &str) -> Option<u32> {
            self.0.get(name).copied()
        }

        fn lookup_uid(&self, uid: u32) -> Option<TargetUser> {
            self.0.iter().find(|(_, &v)| v == uid).map(|(name, &uid)| TargetUser {
                uid,
                gid: uid,
                name: name.clone(),
                home: PathBuf::from(format!("/home/{}", name)),
            })
        }
    }

    #[test]
    fn caller_matches_by_resolved_uid() {
        let mut map = HashMap::new();
        map.insert("alice".to_string(), 1000);
        let users = FakeUsers(map);
        assert!(caller_is_allowed(&users, 1000, &["alice".to_string()]));
        assert!(!caller_is_allowed(&users, 1001, &["alice".to_string()]));
    }

    #[test]
    fn unresolvable_username_in_allowed_users_never_matches() {
        let users = FakeUsers(HashMap::new());
        assert!(!caller_is_allowed(&users, 1000, &["ghost".to_string()]));
    }
}
