use sqlx::error::ErrorKind;

use crate::application::repos::RepoError;

/// `invalid_text_representation`, raised for malformed literals such as UUIDs.
const SQLSTATE_INVALID_TEXT: &str = "22P02";
/// `query_canceled`, raised when `statement_timeout` fires.
const SQLSTATE_QUERY_CANCELED: &str = "57014";

pub fn map_sqlx_error(err: sqlx::Error) -> RepoError {
    let db = match err {
        sqlx::Error::RowNotFound => return RepoError::NotFound,
        sqlx::Error::PoolTimedOut => return RepoError::Timeout,
        sqlx::Error::Database(db) => db,
        other => return RepoError::from_persistence(other),
    };

    let message = db.message().to_string();
    match db.kind() {
        ErrorKind::UniqueViolation => RepoError::AlreadyExists {
            constraint: db.constraint().unwrap_or("unknown").to_string(),
        },
        ErrorKind::ForeignKeyViolation | ErrorKind::NotNullViolation => {
            RepoError::InvalidInput { message }
        }
        ErrorKind::CheckViolation => RepoError::Constraint { message },
        _ => match db.code().as_deref() {
            Some(SQLSTATE_INVALID_TEXT) => RepoError::InvalidInput { message },
            Some(SQLSTATE_QUERY_CANCELED) => RepoError::Timeout,
            _ => RepoError::from_persistence(message),
        },
    }
}

pub(super) fn convert_count(value: i64) -> Result<u64, RepoError> {
    value
        .try_into()
        .map_err(|_| RepoError::from_persistence("count exceeds supported range"))
}

pub(super) fn convert_bound(name: &str, value: u64) -> Result<i64, RepoError> {
    i64::try_from(value).map_err(|_| RepoError::invalid_input(format!("{name} is too large")))
}
