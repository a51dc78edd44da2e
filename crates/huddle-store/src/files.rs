//! Ephemeral upload records.
//!
//! Only metadata lives here; the bytes are kept by the server's upload
//! store under `filename`. Records past `expires_at` are removed in bulk by
//! [`Database::delete_expired_files`].

use chrono::{DateTime, Utc};
use rusqlite::params;
use uuid::Uuid;

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::FileRecord;
use crate::row::{not_found, opt_uuid_col, ts_col, ts_param, uuid_col};

const FILE_COLUMNS: &str =
    "id, message_id, filename, original_name, size, mime_type, uploaded_at, expires_at";

impl Database {
    pub fn insert_file(&self, file: &FileRecord) -> Result<()> {
        self.conn().execute(
            "INSERT INTO files (id, message_id, filename, original_name, size, mime_type,
                                uploaded_at, expires_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                file.id.to_string(),
                file.message_id.map(|id| id.to_string()),
                file.filename,
                file.original_name,
                file.size,
                file.mime_type,
                ts_param(&file.uploaded_at),
                ts_param(&file.expires_at),
            ],
        )?;
        Ok(())
    }

    pub fn get_file(&self, id: Uuid) -> Result<FileRecord> {
        self.conn()
            .query_row(
                &format!("SELECT {FILE_COLUMNS} FROM files WHERE id = ?1"),
                params![id.to_string()],
                row_to_file,
            )
            .map_err(not_found)
    }

    pub fn list_files(&self) -> Result<Vec<FileRecord>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {FILE_COLUMNS} FROM files ORDER BY uploaded_at DESC"
        ))?;
        let rows = stmt.query_map([], row_to_file)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(StoreError::Sqlite)
    }

    /// Delete every record with `expires_at < now` and return them so the
    /// caller can remove the stored bytes.
    pub fn delete_expired_files(&self, now: DateTime<Utc>) -> Result<Vec<FileRecord>> {
        let cutoff = ts_param(&now);
        let tx = self.conn().unchecked_transaction()?;

        let expired = {
            let mut stmt = tx.prepare(&format!(
                "SELECT {FILE_COLUMNS} FROM files WHERE expires_at < ?1"
            ))?;
            let rows = stmt.query_map(params![cutoff], row_to_file)?;
            rows.collect::<std::result::Result<Vec<_>, _>>()?
        };
        tx.execute("DELETE FROM files WHERE expires_at < ?1", params![cutoff])?;
        tx.commit()?;

        if !expired.is_empty() {
            tracing::info!(count = expired.len(), "expired file records removed");
        }
        Ok(expired)
    }
}

fn row_to_file(row: &rusqlite::Row<'_>) -> rusqlite::Result<FileRecord> {
    Ok(FileRecord {
        id: uuid_col(row, 0)?,
        message_id: opt_uuid_col(row, 1)?,
        filename: row.get(2)?,
        original_name: row.get(3)?,
        size: row.get(4)?,
        mime_type: row.get(5)?,
        uploaded_at: ts_col(row, 6)?,
        expires_at: ts_col(row, 7)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn record(uploaded_at: DateTime<Utc>, ttl: Duration) -> FileRecord {
        let id = Uuid::new_v4();
        FileRecord {
            id,
            message_id: None,
            filename: id.to_string(),
            original_name: "notes.txt".into(),
            size: 12,
            mime_type: "text/plain".into(),
            uploaded_at,
            expires_at: uploaded_at + ttl,
        }
    }

    #[test]
    fn insert_and_get() {
        let db = Database::open_in_memory().unwrap();
        let file = record(Utc::now(), Duration::hours(3));
        db.insert_file(&file).unwrap();

        assert_eq!(db.get_file(file.id).unwrap().original_name, "notes.txt");
        assert!(matches!(db.get_file(Uuid::new_v4()), Err(StoreError::NotFound)));
    }

    #[test]
    fn sweep_removes_only_expired() {
        let db = Database::open_in_memory().unwrap();
        let now = Utc::now();
        let old = record(now - Duration::hours(4), Duration::hours(3));
        let fresh = record(now - Duration::hours(1), Duration::hours(3));
        db.insert_file(&old).unwrap();
        db.insert_file(&fresh).unwrap();

        assert!(old.is_expired(now));
        assert!(!fresh.is_expired(now));

        let swept = db.delete_expired_files(now).unwrap();
        assert_eq!(swept.len(), 1);
        assert_eq!(swept[0].id, old.id);

        let left: Vec<Uuid> = db.list_files().unwrap().iter().map(|f| f.id).collect();
        assert_eq!(left, vec![fresh.id]);

        assert!(db.delete_expired_files(now).unwrap().is_empty());
    }
}
