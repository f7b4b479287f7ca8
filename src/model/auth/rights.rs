use std::fmt::Display;

use serde::{Deserialize, Serialize};

/// The two privilege classes. These are disjoint namespaces: a principal is
/// always a `(Rights, id)` pair, so a regular user whose ID happens to be
/// `admin` is still just a regular user.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Rights {
    Regular,
    Admin,
}

impl Rights {
    const fn bit(self) -> u8 {
        match self {
            Self::Regular => RightsMask::REGULAR.0,
            Self::Admin => RightsMask::ADMIN.0,
        }
    }
}

impl Display for Rights {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            formatter,
            "{}",
            match self {
                Self::Regular => "regular",
                Self::Admin => "admin",
            }
        )
    }
}

/// A set of privilege classes that are accepted by some operation.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct RightsMask(u8);

impl RightsMask {
    pub const REGULAR: Self = Self(1 << 0);
    pub const ADMIN: Self = Self(1 << 1);
    pub const ANY: Self = Self(Self::REGULAR.0 | Self::ADMIN.0);

    pub const fn contains(self, rights: Rights) -> bool {
        self.0 & rights.bit() != 0
    }
}

/// The identifier carried by every admin token.
pub const ADMIN_ID: &str = "admin";

/// An authenticated identity, only ever recovered from a validated token.
#[derive(Debug, PartialEq, Eq, Clone, Hash, Serialize, Deserialize)]
pub struct Principal {
    #[serde(rename = "rgt")]
    pub rights: Rights,
    #[serde(rename = "sub")]
    pub id: String,
}

impl Principal {
    pub fn regular(id: impl Into<String>) -> Self {
        Self {
            rights: Rights::Regular,
            id: id.into(),
        }
    }

    pub fn admin() -> Self {
        Self {
            rights: Rights::Admin,
            id: ADMIN_ID.to_string(),
        }
    }

    pub fn is_admin(&self) -> bool {
        self.rights == Rights::Admin
    }
}

/// Names the privilege classes a route accepts, for use as the type parameter
/// of [`super::AuthToken`].
pub trait RequiredRights {
    const MASK: RightsMask;
}

/// Only regular users.
pub enum Regular {}

/// Only admins.
pub enum Admin {}

/// Either class.
pub enum AnyRights {}

impl RequiredRights for Regular {
    const MASK: RightsMask = RightsMask::REGULAR;
}

impl RequiredRights for Admin {
    const MASK: RightsMask = RightsMask::ADMIN;
}

impl RequiredRights for AnyRights {
    const MASK: RightsMask = RightsMask::ANY;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn masks() {
        assert!(RightsMask::REGULAR.contains(Rights::Regular));
        assert!(!RightsMask::REGULAR.contains(Rights::Admin));
        assert!(RightsMask::ADMIN.contains(Rights::Admin));
        assert!(!RightsMask::ADMIN.contains(Rights::Regular));
        assert!(RightsMask::ANY.contains(Rights::Regular));
        assert!(RightsMask::ANY.contains(Rights::Admin));
    }
}
