use serde::{Deserialize, Serialize};

/// Position of a key set in a folder's access hierarchy
///
/// `Creator > Owner > Admin > Editor ≈ Viewer`, with `Appender` off to the
/// side: it may write but has no read access. Everything but `Viewer` may
/// write, everything but `Appender` may read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Creator,
    Owner,
    Admin,
    Editor,
    Viewer,
    Appender,
}

impl Role {
    pub const ALL: [Role; 6] = [
        Role::Creator,
        Role::Owner,
        Role::Admin,
        Role::Editor,
        Role::Viewer,
        Role::Appender,
    ];

    /// Coarse privilege level, used to pick the strongest of several roles
    fn rank(&self) -> u8 {
        match self {
            Role::Creator => 5,
            Role::Owner => 4,
            Role::Admin => 3,
            Role::Editor => 2,
            Role::Viewer => 1,
            Role::Appender => 0,
        }
    }

    pub fn has_read_access(&self) -> bool {
        !matches!(self, Role::Appender)
    }

    pub fn has_write_access(&self) -> bool {
        !matches!(self, Role::Viewer)
    }

    /// Admin or above: may change access and record deletions
    pub fn is_admin_or_above(&self) -> bool {
        matches!(self, Role::Creator | Role::Owner | Role::Admin)
    }

    /// Owner or above: may accept other writers' items
    pub fn is_owner_or_above(&self) -> bool {
        matches!(self, Role::Creator | Role::Owner)
    }

    /// Roles this role may grant, change or revoke
    pub fn manageable_roles(&self) -> &'static [Role] {
        match self {
            Role::Creator => &[
                Role::Owner,
                Role::Admin,
                Role::Editor,
                Role::Viewer,
                Role::Appender,
            ],
            Role::Owner => &[Role::Owner, Role::Admin, Role::Editor, Role::Viewer],
            Role::Admin => &[Role::Editor, Role::Viewer],
            Role::Editor | Role::Viewer | Role::Appender => &[],
        }
    }

    pub fn can_manage(&self, target: Role) -> bool {
        self.manageable_roles().contains(&target)
    }

    pub fn strongest(roles: impl IntoIterator<Item = Role>) -> Option<Role> {
        roles.into_iter().max_by_key(|role| role.rank())
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Role::Creator => "creator",
            Role::Owner => "owner",
            Role::Admin => "admin",
            Role::Editor => "editor",
            Role::Viewer => "viewer",
            Role::Appender => "appender",
        };
        f.write_str(name)
    }
}

impl std::str::FromStr for Role {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Role::ALL
            .into_iter()
            .find(|role| role.to_string() == s.to_ascii_lowercase())
            .ok_or_else(|| format!("unknown role: {s}"))
    }
}
