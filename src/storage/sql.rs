//! Shared pieces of the SQL backends.

use crate::error::{StorageError, StorageResult};

/// Dialect-specific statements for one lock table.
///
/// Every statement evaluates "now" with the database clock.
#[derive(Debug, Clone)]
pub struct Statements {
    /// Create the row (or, for upsert dialects, reclaim an expired one).
    pub insert: String,
    /// Claim an existing expired row.
    pub update: String,
    /// Shorten the lease to `max(now, locked_at + lock_at_least_for)`.
    pub unlock: String,
    /// Renew a live lease owned by the caller.
    pub extend: String,
    /// Read one row.
    pub find: String,
    /// Idempotent table creation.
    pub create_table: String,
}

/// Table names are spliced into SQL, so only plain (optionally
/// schema-qualified) identifiers are accepted.
pub fn validate_table_name(table: &str) -> StorageResult<()> {
    let valid = !table.is_empty()
        && table.split('.').all(|part| {
            let mut chars = part.chars();
            chars
                .next()
                .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        });

    if valid {
        Ok(())
    } else {
        Err(StorageError::Query(format!("invalid table name '{table}'")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_names() {
        assert!(validate_table_name("shedlock").is_ok());
        assert!(validate_table_name("scheduling.shed_lock").is_ok());
        assert!(validate_table_name("").is_err());
        assert!(validate_table_name("1locks").is_err());
        assert!(validate_table_name("locks; DROP TABLE x").is_err());
        assert!(validate_table_name("schema.").is_err());
    }
}
