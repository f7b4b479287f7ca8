//! For some reason, the mongodb crate doesn't provide error code constants.
//! This module fills in the gaps.

use mongodb::error::{Error as DbError, ErrorKind, WriteFailure};

use crate::model::store::StoreError;

pub const DUPLICATE_KEY: i32 = 11000;
pub const WRITE_CONFLICT: i32 = 112;

const TRANSIENT_TRANSACTION_ERROR: &str = "TransientTransactionError";

/// The server error code carried by the error, if any.
pub fn error_code(err: &DbError) -> Option<i32> {
    match err.kind.as_ref() {
        ErrorKind::Write(WriteFailure::WriteError(e)) => Some(e.code),
        ErrorKind::Write(WriteFailure::WriteConcernError(e)) => Some(e.code),
        ErrorKind::Command(e) => Some(e.code),
        _ => None,
    }
}

/// Classify a driver error. Unique index violations become `Duplicate`, and
/// anything the server says is worth retrying becomes `WriteConflict`.
pub fn translate(err: DbError) -> StoreError {
    match error_code(&err) {
        Some(DUPLICATE_KEY) => StoreError::Duplicate,
        Some(WRITE_CONFLICT) => StoreError::WriteConflict,
        _ if err.contains_label(TRANSIENT_TRANSACTION_ERROR) => StoreError::WriteConflict,
        _ => StoreError::Db(err),
    }
}
