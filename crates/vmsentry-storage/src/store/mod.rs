use std::path::Path;
use std::str::FromStr;

use chrono::{DateTime, FixedOffset, Utc};
use migration::{Migrator, MigratorTrait};
use sea_orm::{ConnectionTrait, Database, DatabaseConnection};

use crate::error::{Result, StorageError};

pub mod incident;
pub mod metric;
pub mod repository;
pub mod rule;
pub mod vm;

pub use incident::IncidentStats;
pub use rule::{NewCondition, RuleDraft};

/// Unified access to the alerting database.
///
/// All methods are `async`; the backend is SeaORM over SQLite.
pub struct AlertStore {
    db: DatabaseConnection,
}

impl AlertStore {
    /// Connects and brings the schema up to date.
    ///
    /// `db_url` example: `sqlite://data/vmsentry.db?mode=rwc`. The parent
    /// directory of a SQLite file is created when missing.
    pub async fn connect(db_url: &str) -> Result<Self> {
        if let Some(dir) = sqlite_parent_dir(db_url) {
            std::fs::create_dir_all(dir)?;
        }
        let db = Database::connect(db_url).await?;

        if db_url.starts_with("sqlite:") && !db_url.contains(":memory:") {
            db.execute_unprepared("PRAGMA journal_mode=WAL;").await?;
        }

        Migrator::up(&db, None).await?;
        tracing::info!(db_url = %db_url, "Alert store initialized");
        Ok(Self { db })
    }

    pub(crate) fn db(&self) -> &DatabaseConnection {
        &self.db
    }
}

fn sqlite_parent_dir(db_url: &str) -> Option<&Path> {
    let rest = db_url
        .strip_prefix("sqlite://")
        .or_else(|| db_url.strip_prefix("sqlite:"))?;
    let path = rest.split('?').next()?;
    if path.is_empty() || path.contains(":memory:") {
        return None;
    }
    Path::new(path).parent().filter(|p| !p.as_os_str().is_empty())
}

pub(crate) fn to_db_time(at: DateTime<Utc>) -> DateTime<FixedOffset> {
    at.fixed_offset()
}

pub(crate) fn from_db_time(at: DateTime<FixedOffset>) -> DateTime<Utc> {
    at.with_timezone(&Utc)
}

/// Parses an enum column, reporting the column name on failure.
pub(crate) fn parse_column<T>(column: &'static str, value: &str) -> Result<T>
where
    T: FromStr<Err = String>,
{
    value
        .parse()
        .map_err(|reason| StorageError::InvalidColumn { column, reason })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sqlite_parent_dir_from_url() {
        assert_eq!(
            sqlite_parent_dir("sqlite://data/vmsentry.db?mode=rwc"),
            Some(Path::new("data"))
        );
        assert_eq!(sqlite_parent_dir("sqlite://vmsentry.db"), None);
        assert_eq!(sqlite_parent_dir("sqlite::memory:"), None);
        assert_eq!(sqlite_parent_dir("postgres://localhost/db"), None);
    }
}
