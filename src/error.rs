use rocket::{
    http::{Cookie, Status},
    response::{Responder, Result as ResponseResult},
    Request,
};
use thiserror::Error;

use crate::model::{auth::AUTH_TOKEN_COOKIE, store::StoreError};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// No valid session, or the session's user no longer exists.
    #[error("Not logged in")]
    Unauthenticated,
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Validation(String),
    /// A failure the client can do nothing about. The detail is logged, never
    /// sent.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn not_found(what: impl std::fmt::Display) -> Self {
        Self::NotFound(format!("{what} not found"))
    }

    pub fn status(&self) -> Status {
        match self {
            Self::Unauthenticated => Status::Unauthorized,
            Self::Forbidden(_) => Status::Forbidden,
            Self::Conflict(_) => Status::Conflict,
            Self::NotFound(_) => Status::NotFound,
            Self::Validation(_) => Status::BadRequest,
            Self::Internal(_) => Status::InternalServerError,
        }
    }
}

/// Uniqueness violations and write conflicts mean a concurrent request won a
/// race, which the client can retry. Anything else is a real failure.
impl From<StoreError> for Error {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Duplicate | StoreError::WriteConflict => {
                Self::conflict("A concurrent change got there first, try again")
            }
            other => Self::Internal(other.to_string()),
        }
    }
}

impl<'r, 'o: 'r> Responder<'r, 'o> for Error {
    fn respond_to(self, req: &'r Request<'_>) -> ResponseResult<'o> {
        let status = self.status();
        let body = match &self {
            Self::Internal(detail) => {
                error!("{detail}");
                status.reason_lossy().to_string()
            }
            Self::Unauthenticated => {
                // Whatever the client holds is useless, so make it forget it.
                req.cookies().remove(Cookie::named(AUTH_TOKEN_COOKIE));
                self.to_string()
            }
            _ => self.to_string(),
        };
        (status, body).respond_to(req)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses() {
        assert_eq!(Error::Unauthenticated.status(), Status::Unauthorized);
        assert_eq!(Error::Forbidden(String::new()).status(), Status::Forbidden);
        assert_eq!(Error::conflict("x").status(), Status::Conflict);
        assert_eq!(Error::not_found("Election 1").status(), Status::NotFound);
        assert_eq!(Error::Validation(String::new()).status(), Status::BadRequest);
        assert_eq!(
            Error::Internal(String::new()).status(),
            Status::InternalServerError
        );
    }

    #[test]
    fn store_races_are_conflicts() {
        assert_eq!(Error::from(StoreError::WriteConflict).status(), Status::Conflict);
        assert_eq!(Error::from(StoreError::Duplicate).status(), Status::Conflict);
        assert_eq!(
            Error::from(StoreError::NotFound).status(),
            Status::InternalServerError
        );
        assert_eq!(
            Error::from(StoreError::Other("disk on fire".to_string())).status(),
            Status::InternalServerError
        );
    }

    #[test]
    fn messages() {
        assert_eq!(Error::not_found("Election 7").to_string(), "Election 7 not found");
        assert_eq!(Error::conflict("Nope").to_string(), "Nope");
    }
}
