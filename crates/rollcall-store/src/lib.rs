//! rollcall-store: SQLite roster storage.
//!
//! Schema shared with the attendance backend:
//!
//! ```text
//! students(id INTEGER PRIMARY KEY, name TEXT NOT NULL, face_encoding BLOB)
//! student_encodings(id INTEGER PRIMARY KEY, student_id INTEGER NOT NULL,
//!                   face_encoding BLOB NOT NULL, created_at DATETIME)
//! ```
//!
//! Encodings are little-endian `f64` byte strings. `students.face_encoding`
//! is the primary encoding; `student_encodings` holds any number of extra
//! enrollment photos.

use rollcall_core::roster::{RosterEntry, RosterSource};
use rollcall_core::{Embedding, IdentityId};
use rusqlite::types::ValueRef;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use serde::Serialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("student {0} does not exist")]
    UnknownStudent(IdentityId),
    #[error("refusing to store an empty encoding")]
    EmptyEncoding,
    #[error("encoding has {actual} dimensions, stored encodings have {stored}")]
    DimensionMismatch { stored: usize, actual: usize },
}

/// Result of [`SqliteRosterStore::add_encoding`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddedEncoding {
    /// Row id in `student_encodings`.
    pub encoding_id: i64,
    /// Whether the student's primary encoding was empty and got filled in.
    pub backfilled_primary: bool,
}

/// Per-student encoding counts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EncodingCensus {
    pub student_id: IdentityId,
    pub name: String,
    pub has_primary: bool,
    pub auxiliary_count: u32,
}

/// Roster store backed by one SQLite database file.
///
/// Reads open the file read-only, so a missing database is an error rather
/// than a freshly created empty one. Writes create the file and schema on demand.
#[derive(Debug, Clone)]
pub struct SqliteRosterStore {
    path: PathBuf,
}

impl SqliteRosterStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open_read_only(&self) -> Result<Connection, StoreError> {
        let conn = Connection::open_with_flags(
            &self.path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        Ok(conn)
    }

    fn open_writable(&self) -> Result<Connection, StoreError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(&self.path)?;
        init_schema(&conn)?;
        Ok(conn)
    }

    /// Insert a student row. Enrollment normally targets students created by
    /// the backend; this exists for standalone setups.
    pub fn add_student(&self, name: &str) -> Result<IdentityId, StoreError> {
        let conn = self.open_writable()?;
        conn.execute("INSERT INTO students (name) VALUES (?1)", params![name])?;
        let id = conn.last_insert_rowid();
        tracing::info!(student_id = id, name, "student added");
        Ok(id)
    }

    /// Append an encoding for `student_id`, filling in the primary encoding
    /// when the student has none yet. Runs in a single transaction.
    ///
    /// The encoding must have the same dimension as those already stored.
    pub fn add_encoding(
        &self,
        student_id: IdentityId,
        embedding: &Embedding,
    ) -> Result<AddedEncoding, StoreError> {
        if embedding.dimension() == 0 {
            return Err(StoreError::EmptyEncoding);
        }
        let bytes = embedding.to_f64_le_bytes();

        let mut conn = self.open_writable()?;
        let tx = conn.transaction()?;

        let exists = tx
            .query_row(
                "SELECT 1 FROM students WHERE id = ?1",
                params![student_id],
                |_| Ok(()),
            )
            .optional()?
            .is_some();
        if !exists {
            return Err(StoreError::UnknownStudent(student_id));
        }
        if let Some(stored) = stored_dimension(&tx)? {
            if stored != embedding.dimension() {
                return Err(StoreError::DimensionMismatch {
                    stored,
                    actual: embedding.dimension(),
                });
            }
        }

        tx.execute(
            "INSERT INTO student_encodings (student_id, face_encoding, created_at)
             VALUES (?1, ?2, CURRENT_TIMESTAMP)",
            params![student_id, bytes],
        )?;
        let encoding_id = tx.last_insert_rowid();

        let backfilled = tx.execute(
            "UPDATE students SET face_encoding = ?2
             WHERE id = ?1 AND (typeof(face_encoding) != 'blob' OR length(face_encoding) = 0)",
            params![student_id, bytes],
        )?;
        tx.commit()?;

        tracing::info!(
            student_id,
            encoding_id,
            dimension = embedding.dimension(),
            backfilled_primary = backfilled > 0,
            "encoding stored"
        );
        Ok(AddedEncoding {
            encoding_id,
            backfilled_primary: backfilled > 0,
        })
    }

    /// Encoding counts for every student, ordered by id.
    pub fn encoding_census(&self) -> Result<Vec<EncodingCensus>, StoreError> {
        let conn = self.open_read_only()?;
        let aux = table_exists(&conn, "student_encodings")?;
        let sql = if aux {
            "SELECT s.id, s.name,
                    typeof(s.face_encoding) = 'blob' AND length(s.face_encoding) > 0,
                    (SELECT COUNT(*) FROM student_encodings e WHERE e.student_id = s.id)
             FROM students s ORDER BY s.id"
        } else {
            "SELECT s.id, s.name,
                    typeof(s.face_encoding) = 'blob' AND length(s.face_encoding) > 0,
                    0
             FROM students s ORDER BY s.id"
        };

        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map([], |row| {
            Ok(EncodingCensus {
                student_id: row.get(0)?,
                name: row.get(1)?,
                has_primary: row.get(2)?,
                auxiliary_count: row.get(3)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }
}

impl RosterSource for SqliteRosterStore {
    type Error = StoreError;

    /// Primary encodings ordered by student id, then auxiliary encodings
    /// ordered by row id. Unusable rows are skipped.
    fn fetch_entries(&self) -> Result<Vec<RosterEntry>, StoreError> {
        let conn = self.open_read_only()?;
        let mut entries = Vec::new();

        let mut stmt = conn.prepare(
            "SELECT id, name, face_encoding FROM students
             WHERE face_encoding IS NOT NULL ORDER BY id",
        )?;
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            let id: IdentityId = row.get(0)?;
            let name: String = row.get(1)?;
            if let Some(blob) = encoding_blob(row.get_ref(2)?, id, "primary") {
                push_decoded(&mut entries, id, name, blob, "primary");
            }
        }

        if !table_exists(&conn, "student_encodings")? {
            tracing::debug!("no student_encodings table; primary encodings only");
            return Ok(entries);
        }

        let mut stmt = conn.prepare(
            "SELECT e.id, e.student_id, s.name, e.face_encoding
             FROM student_encodings e LEFT JOIN students s ON s.id = e.student_id
             ORDER BY e.id",
        )?;
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            let row_id: i64 = row.get(0)?;
            let student_id: IdentityId = row.get(1)?;
            let Some(name) = row.get::<_, Option<String>>(2)? else {
                tracing::warn!(row_id, student_id, "skipping encoding of unknown student");
                continue;
            };
            if let Some(blob) = encoding_blob(row.get_ref(3)?, student_id, "auxiliary") {
                push_decoded(&mut entries, student_id, name, blob, "auxiliary");
            }
        }

        Ok(entries)
    }
}

/// The bytes of a `face_encoding` cell; NULL and non-BLOB values yield `None`.
fn encoding_blob<'a>(value: ValueRef<'a>, student_id: IdentityId, kind: &'static str) -> Option<&'a [u8]> {
    match value {
        ValueRef::Blob(bytes) => Some(bytes),
        ValueRef::Null => None,
        other => {
            tracing::warn!(student_id, kind, column_type = %other.data_type(), "skipping encoding stored as non-blob");
            None
        }
    }
}

/// Dimension of the first well-formed stored encoding, primaries first.
fn stored_dimension(conn: &Connection) -> Result<Option<usize>, StoreError> {
    const WELL_FORMED: &str = "typeof(face_encoding) = 'blob'
         AND length(face_encoding) > 0 AND length(face_encoding) % 8 = 0";

    let primary: Option<i64> = conn
        .query_row(
            &format!("SELECT length(face_encoding) FROM students WHERE {WELL_FORMED} ORDER BY id LIMIT 1"),
            [],
            |r| r.get(0),
        )
        .optional()?;
    let bytes = match primary {
        Some(b) => Some(b),
        None => conn
            .query_row(
                &format!(
                    "SELECT length(face_encoding) FROM student_encodings WHERE {WELL_FORMED} ORDER BY id LIMIT 1"
                ),
                [],
                |r| r.get(0),
            )
            .optional()?,
    };
    Ok(bytes.map(|b| b as usize / 8))
}

fn push_decoded(
    entries: &mut Vec<RosterEntry>,
    identity_id: IdentityId,
    display_name: String,
    blob: &[u8],
    kind: &'static str,
) {
    if blob.is_empty() {
        return;
    }
    match Embedding::from_f64_le_bytes(blob) {
        Ok(embedding) => entries.push(RosterEntry {
            identity_id,
            display_name,
            embedding,
        }),
        Err(e) => tracing::warn!(student_id = identity_id, kind, error = %e, "skipping unreadable encoding"),
    }
}

fn table_exists(conn: &Connection, table: &str) -> Result<bool, StoreError> {
    let found = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
            params![table],
            |_| Ok(()),
        )
        .optional()?;
    Ok(found.is_some())
}

/// Create the roster tables when absent.
pub fn init_schema(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS students (
             id INTEGER PRIMARY KEY,
             name TEXT NOT NULL,
             face_encoding BLOB
         );
         CREATE TABLE IF NOT EXISTS student_encodings (
             id INTEGER PRIMARY KEY,
             student_id INTEGER NOT NULL,
             face_encoding BLOB NOT NULL,
             created_at DATETIME
         );
         CREATE INDEX IF NOT EXISTS idx_student_encodings_student
             ON student_encodings(student_id);",
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rollcall_core::Roster;
    use tempfile::TempDir;

    fn store() -> (TempDir, SqliteRosterStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteRosterStore::new(dir.path().join("db").join("attendance.db"));
        (dir, store)
    }

    fn emb(values: &[f32]) -> Embedding {
        Embedding::new(values.to_vec())
    }

    fn raw_conn(store: &SqliteRosterStore) -> Connection {
        Connection::open(store.path()).unwrap()
    }

    #[test]
    fn test_missing_database_is_load_error() {
        let (_dir, store) = store();
        assert!(store.fetch_entries().is_err());
        assert!(Roster::load(&store).is_empty());
        // A read never creates the file.
        assert!(!store.path().exists());
    }

    #[test]
    fn test_add_encoding_backfills_primary_once() {
        let (_dir, store) = store();
        let alice = store.add_student("Alice").unwrap();

        let first = store.add_encoding(alice, &emb(&[0.5, -0.25])).unwrap();
        assert!(first.backfilled_primary);
        let second = store.add_encoding(alice, &emb(&[1.0, 1.0])).unwrap();
        assert!(!second.backfilled_primary);

        let primary: Vec<u8> = raw_conn(&store)
            .query_row("SELECT face_encoding FROM students WHERE id = ?1", [alice], |r| r.get(0))
            .unwrap();
        assert_eq!(Embedding::from_f64_le_bytes(&primary).unwrap().values, vec![0.5, -0.25]);
    }

    #[test]
    fn test_add_encoding_backfills_empty_blob() {
        let (_dir, store) = store();
        let bob = store.add_student("Bob").unwrap();
        raw_conn(&store)
            .execute("UPDATE students SET face_encoding = x'' WHERE id = ?1", [bob])
            .unwrap();
        assert!(store.add_encoding(bob, &emb(&[1.0])).unwrap().backfilled_primary);
    }

    #[test]
    fn test_add_encoding_unknown_student_writes_nothing() {
        let (_dir, store) = store();
        store.add_student("Alice").unwrap();
        assert!(matches!(
            store.add_encoding(42, &emb(&[1.0])),
            Err(StoreError::UnknownStudent(42))
        ));
        let count: i64 = raw_conn(&store)
            .query_row("SELECT COUNT(*) FROM student_encodings", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_empty_encoding_rejected() {
        let (_dir, store) = store();
        let id = store.add_student("Alice").unwrap();
        assert!(matches!(store.add_encoding(id, &emb(&[])), Err(StoreError::EmptyEncoding)));
    }

    #[test]
    fn test_fetch_primary_then_auxiliary_order() {
        let (_dir, store) = store();
        let alice = store.add_student("Alice").unwrap();
        let bob = store.add_student("Bob").unwrap();
        store.add_encoding(bob, &emb(&[2.0, 0.0])).unwrap();
        store.add_encoding(alice, &emb(&[1.0, 0.0])).unwrap();
        store.add_encoding(alice, &emb(&[1.5, 0.0])).unwrap();

        let entries = store.fetch_entries().unwrap();
        let got: Vec<(IdentityId, f32)> = entries
            .iter()
            .map(|e| (e.identity_id, e.embedding.values[0]))
            .collect();
        assert_eq!(
            got,
            vec![
                (alice, 1.0), // primaries by student id
                (bob, 2.0),
                (bob, 2.0), // auxiliaries by row id
                (alice, 1.0),
                (alice, 1.5),
            ]
        );
        assert_eq!(entries[0].display_name, "Alice");
    }

    #[test]
    fn test_fetch_skips_corrupt_and_orphan_rows() {
        let (_dir, store) = store();
        let alice = store.add_student("Alice").unwrap();
        store.add_encoding(alice, &emb(&[1.0, 0.0])).unwrap();
        let conn = raw_conn(&store);
        conn.execute(
            "INSERT INTO student_encodings (student_id, face_encoding) VALUES (?1, ?2)",
            params![alice, vec![0u8; 12]],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO student_encodings (student_id, face_encoding) VALUES (99, ?1)",
            params![emb(&[3.0, 3.0]).to_f64_le_bytes()],
        )
        .unwrap();

        let entries = store.fetch_entries().unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().all(|e| e.identity_id == alice));
    }

    #[test]
    fn test_fetch_skips_non_blob_encodings() {
        let (_dir, store) = store();
        let alice = store.add_student("Alice").unwrap();
        store.add_encoding(alice, &emb(&[1.0, 0.0])).unwrap();
        let conn = raw_conn(&store);
        conn.execute("INSERT INTO students (name, face_encoding) VALUES ('Bob', '0.1,0.2')", [])
            .unwrap();
        let bob = conn.last_insert_rowid();
        conn.execute(
            "INSERT INTO student_encodings (student_id, face_encoding) VALUES (?1, '[0.1, 0.2]')",
            params![bob],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO student_encodings (student_id, face_encoding) VALUES (?1, 42)",
            params![alice],
        )
        .unwrap();

        let entries = store.fetch_entries().unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().all(|e| e.identity_id == alice));
        assert_eq!(Roster::load(&store).len(), 2);

        let census = store.encoding_census().unwrap();
        assert!(!census[1].has_primary);
    }

    #[test]
    fn test_text_primary_is_backfilled() {
        let (_dir, store) = store();
        store.add_student("Carol").unwrap();
        let conn = raw_conn(&store);
        conn.execute("INSERT INTO students (name, face_encoding) VALUES ('Bob', '0.1,0.2')", [])
            .unwrap();
        let bob = conn.last_insert_rowid();
        assert!(store.add_encoding(bob, &emb(&[0.5, 0.5])).unwrap().backfilled_primary);
        assert_eq!(store.fetch_entries().unwrap()[0].identity_id, bob);
    }

    #[test]
    fn test_add_encoding_rejects_other_dimension() {
        let (_dir, store) = store();
        let alice = store.add_student("Alice").unwrap();
        let bob = store.add_student("Bob").unwrap();
        store.add_encoding(alice, &emb(&[0.1; 4])).unwrap();

        assert!(matches!(
            store.add_encoding(bob, &emb(&[0.2; 8])),
            Err(StoreError::DimensionMismatch { stored: 4, actual: 8 })
        ));
        let count: i64 = raw_conn(&store)
            .query_row("SELECT COUNT(*) FROM student_encodings", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 1);

        store.add_encoding(bob, &emb(&[0.2; 4])).unwrap();
    }

    #[test]
    fn test_roster_expecting_extractor_dimension_skips_legacy_rows() {
        let (_dir, store) = store();
        let alice = store.add_student("Alice").unwrap();
        let bob = store.add_student("Bob").unwrap();
        store.add_encoding(alice, &emb(&[0.1; 4])).unwrap();
        // A newer 8-d encoding written past the store's check.
        raw_conn(&store)
            .execute(
                "INSERT INTO student_encodings (student_id, face_encoding) VALUES (?1, ?2)",
                params![bob, emb(&[0.2; 8]).to_f64_le_bytes()],
            )
            .unwrap();

        let roster = Roster::load_expecting(&store, Some(8));
        assert_eq!(roster.dimension(), Some(8));
        assert_eq!(roster.len(), 1);
        assert_eq!(roster.entries()[0].identity_id, bob);
    }

    #[test]
    fn test_fetch_without_auxiliary_table() {
        let (_dir, store) = store();
        std::fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        let conn = raw_conn(&store);
        conn.execute_batch(
            "CREATE TABLE students (id INTEGER PRIMARY KEY, name TEXT NOT NULL, face_encoding BLOB);",
        )
        .unwrap();
        conn.execute(
            "INSERT INTO students (id, name, face_encoding) VALUES (7, 'Gina', ?1)",
            params![emb(&[0.1, 0.2]).to_f64_le_bytes()],
        )
        .unwrap();
        conn.execute("INSERT INTO students (id, name) VALUES (8, 'Hugo')", []).unwrap();

        let roster = Roster::load(&store);
        assert_eq!(roster.len(), 1);
        assert_eq!(roster.entries()[0].identity_id, 7);

        let census = store.encoding_census().unwrap();
        assert_eq!(census.len(), 2);
        assert!(census[0].has_primary);
        assert!(!census[1].has_primary);
    }

    #[test]
    fn test_encoding_census() {
        let (_dir, store) = store();
        let alice = store.add_student("Alice").unwrap();
        let bob = store.add_student("Bob").unwrap();
        store.add_encoding(alice, &emb(&[1.0])).unwrap();
        store.add_encoding(alice, &emb(&[2.0])).unwrap();

        assert_eq!(
            store.encoding_census().unwrap(),
            vec![
                EncodingCensus { student_id: alice, name: "Alice".into(), has_primary: true, auxiliary_count: 2 },
                EncodingCensus { student_id: bob, name: "Bob".into(), has_primary: false, auxiliary_count: 0 },
            ]
        );
    }
}
