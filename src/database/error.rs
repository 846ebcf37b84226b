//! Database error type shared by all repositories.

use thiserror::Error;

#[derive(Debug, Clone, Error)]
#[error("{kind}")]
pub struct DatabaseError {
    kind: DatabaseErrorKind,
}

#[derive(Debug, Clone, Error)]
pub enum DatabaseErrorKind {
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    #[error("duplicate key: {message}")]
    Duplicate { message: String },

    #[error("database unavailable: {message}")]
    Connection { message: String },

    #[error("invalid input: {message}")]
    Invalid { message: String },

    #[error("query failed: {message}")]
    Query { message: String },
}

impl DatabaseError {
    pub fn new(kind: DatabaseErrorKind) -> Self {
        Self { kind }
    }

    pub fn not_found(entity: impl Into<String>, id: impl std::fmt::Display) -> Self {
        Self::new(DatabaseErrorKind::NotFound {
            entity: entity.into(),
            id: id.to_string(),
        })
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::new(DatabaseErrorKind::Invalid {
            message: message.into(),
        })
    }

    pub fn from_sqlx(err: sqlx::Error) -> Self {
        let kind = match &err {
            sqlx::Error::RowNotFound => DatabaseErrorKind::NotFound {
                entity: "row".to_string(),
                id: String::new(),
            },
            sqlx::Error::Database(db) if db.is_unique_violation() => DatabaseErrorKind::Duplicate {
                message: db.message().to_string(),
            },
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                DatabaseErrorKind::Connection {
                    message: err.to_string(),
                }
            }
            _ => DatabaseErrorKind::Query {
                message: err.to_string(),
            },
        };
        Self { kind }
    }

    pub fn kind(&self) -> &DatabaseErrorKind {
        &self.kind
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self.kind, DatabaseErrorKind::NotFound { .. })
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self.kind, DatabaseErrorKind::Duplicate { .. })
    }

    pub fn is_invalid(&self) -> bool {
        matches!(self.kind, DatabaseErrorKind::Invalid { .. })
    }

    /// Transient faults are safe to retry; the ingestion path maps them to a
    /// 5xx so the provider re-delivers.
    pub fn is_transient(&self) -> bool {
        matches!(
            self.kind,
            DatabaseErrorKind::Connection { .. } | DatabaseErrorKind::Query { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_not_found_maps_to_not_found() {
        let err = DatabaseError::from_sqlx(sqlx::Error::RowNotFound);
        assert!(err.is_not_found());
        assert!(!err.is_transient());
    }

    #[test]
    fn pool_timeout_is_transient() {
        let err = DatabaseError::from_sqlx(sqlx::Error::PoolTimedOut);
        assert!(err.is_transient());
    }

    #[test]
    fn not_found_constructor_formats_entity() {
        let err = DatabaseError::not_found("Tenant", 42);
        assert_eq!(err.to_string(), "Tenant not found: 42");
    }
}
