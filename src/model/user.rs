use argon2::Config;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Users are identified by their membership (student) ID.
pub type UserId = String;

/// The longest display name we accept, in characters.
pub const MAX_NAME_LEN: usize = 64;

/// The longest user ID we accept, in characters. IDs double as the initial
/// display name, so they obey the same bound.
pub const MAX_USER_ID_LEN: usize = MAX_NAME_LEN;

/// A registered member, as stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: UserId,
    pub name: String,
    pub password_hash: String,
}

impl User {
    /// Register a new user, hashing their password. The display name starts
    /// out as the user's ID.
    pub fn register(id: impl Into<UserId>, password: &str) -> Result<Self> {
        let id = id.into();
        check_user_id(&id)?;
        let name = normalise_name(&id)?;
        // 16 bytes is the recommended salt length for Argon2.
        let mut salt = [0_u8; 16];
        rand::thread_rng().fill(&mut salt);
        let password_hash = argon2::hash_encoded(password.as_bytes(), &salt, &Config::default())
            .map_err(|e| Error::Internal(format!("Failed to hash password: {e}")))?;
        Ok(Self {
            id,
            name,
            password_hash,
        })
    }

    /// Check whether the given password is correct.
    pub fn verify_password<T: AsRef<[u8]>>(&self, password: T) -> bool {
        // A malformed hash can never match anything.
        argon2::verify_encoded(&self.password_hash, password.as_ref()).unwrap_or(false)
    }

    pub fn desc(&self) -> UserDesc {
        UserDesc {
            id: self.id.clone(),
            name: self.name.clone(),
        }
    }
}

/// The public view of a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserDesc {
    pub id: UserId,
    pub name: String,
}

/// Check that a user ID is usable as given. Unlike display names, IDs are
/// never trimmed: `" 1234567"` and `"1234567"` would be different principals.
pub fn check_user_id(id: &str) -> Result<()> {
    if id.trim().is_empty() {
        return Err(Error::Validation("User ID cannot be empty".to_string()));
    }
    if id.trim() != id {
        return Err(Error::Validation(
            "User ID cannot start or end with whitespace".to_string(),
        ));
    }
    if id.chars().count() > MAX_USER_ID_LEN {
        return Err(Error::Validation(format!(
            "User ID cannot be longer than {MAX_USER_ID_LEN} characters"
        )));
    }
    Ok(())
}

/// Trim a requested display name and check it is acceptable.
pub fn normalise_name(name: &str) -> Result<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(Error::Validation("Name cannot be empty".to_string()));
    }
    if name.chars().count() > MAX_NAME_LEN {
        return Err(Error::Validation(format!(
            "Name cannot be longer than {MAX_NAME_LEN} characters"
        )));
    }
    Ok(name.to_string())
}
