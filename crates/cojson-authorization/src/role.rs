//! Roles a principal can hold in a group (§3, §4.5).

use serde::{Deserialize, Serialize};

/// A role granted to an account (or `everyone`) within a group.
///
/// Ranked for the purposes of parent-group inheritance (`min(parent, child)`,
/// §4.5); the ranking is *not* a claim that every pair of roles is
/// comparable by rights alone (`writeOnly` and `reader` grant disjoint
/// rights), only that this total order is the one the inheritance rule uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    Revoked,
    Reader,
    WriteOnly,
    Writer,
    Admin,
}

impl Role {
    fn rank(self) -> u8 {
        match self {
            Role::Revoked => 0,
            Role::Reader => 1,
            Role::WriteOnly => 2,
            Role::Writer => 3,
            Role::Admin => 4,
        }
    }

    /// `writer` or higher may append any change (§4.4 pt.2).
    pub fn can_write(self) -> bool {
        matches!(self, Role::Writer | Role::Admin | Role::WriteOnly)
    }

    /// Only readers, writers, and admins may read others' private
    /// transactions; `writeOnly` may append but not read (§4.4 pt.2).
    pub fn can_read(self) -> bool {
        matches!(self, Role::Reader | Role::Writer | Role::Admin)
    }

    /// Only `admin` may change group membership (§4.4 pt.2).
    pub fn can_admin(self) -> bool {
        matches!(self, Role::Admin)
    }
}

impl PartialOrd for Role {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Role {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.rank().cmp(&other.rank())
    }
}

/// Parent-group inheritance uses intersection semantics: the effective role
/// is the minimum of the parent's role and any child-level override.
pub fn min_role(a: Role, b: Role) -> Role {
    if a < b {
        a
    } else {
        b
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, String> {
        match s {
            "reader" => Ok(Role::Reader),
            "writer" => Ok(Role::Writer),
            "admin" => Ok(Role::Admin),
            "writeOnly" => Ok(Role::WriteOnly),
            "revoked" => Ok(Role::Revoked),
            other => Err(format!("unrecognized role {other:?}")),
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Role::Reader => "reader",
            Role::Writer => "writer",
            Role::Admin => "admin",
            Role::WriteOnly => "writeOnly",
            Role::Revoked => "revoked",
        };
        write!(f, "{s}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admin_outranks_writer() {
        assert!(Role::Admin > Role::Writer);
    }

    #[test]
    fn min_role_picks_lower() {
        assert_eq!(min_role(Role::Admin, Role::Reader), Role::Reader);
    }

    #[test]
    fn revoked_cannot_read_or_write() {
        assert!(!Role::Revoked.can_read());
        assert!(!Role::Revoked.can_write());
    }

    #[test]
    fn write_only_can_write_not_read() {
        assert!(Role::WriteOnly.can_write());
        assert!(!Role::WriteOnly.can_read());
    }
}
