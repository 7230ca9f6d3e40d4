//! SQLite-backed persistence for annotations and their locations.
//!
//! An annotation is an opaque text blob; an annotation location binds it to
//! a `(workspace, path, line)` coordinate. The store owns both tables and
//! their invariants: at most one location per coordinate, and every
//! location references an existing annotation (enforced by a unique index
//! and a cascading foreign key).

use std::path::Path;

use rusqlite::{Connection, OptionalExtension, Transaction, params};

/// Separator placed between annotation contents merged by a deletion edit.
///
/// External contract: editor-side tooling splits merged annotations on this
/// exact byte sequence.
pub const MERGE_SEPARATOR: &str = "\n--\n";

/// Error type for store operations.
///
/// `Usage` marks caller mistakes (maps to a JSON-RPC invalid-params error);
/// everything else is internal.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{0}")]
    Usage(String),
    #[error("expected to touch at most {expected} row(s), touched {actual}")]
    RowCount { expected: usize, actual: usize },
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// A single annotation as returned by [`AnnotationStore::list`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ann {
    /// Zero-based line the annotation is attached to.
    pub line: u32,
    pub content: String,
}

/// Handle to the annotation database.
pub struct AnnotationStore {
    conn: Connection,
}

impl AnnotationStore {
    const SCHEMA: &'static str = r"
        CREATE TABLE annotations (
            id      INTEGER PRIMARY KEY AUTOINCREMENT,
            content TEXT NOT NULL
        );

        CREATE TABLE annotation_locations (
            id        INTEGER PRIMARY KEY AUTOINCREMENT,
            workspace TEXT NOT NULL,
            path      TEXT NOT NULL,
            line      INTEGER,
            ann_id    INTEGER,

            FOREIGN KEY (ann_id) REFERENCES annotations (id)
                ON DELETE CASCADE
        );

        CREATE UNIQUE INDEX annotation_locations_by_file
            ON annotation_locations (workspace, path, line);
    ";

    /// Open (or create) the store at `path`.
    ///
    /// The parent directory is created when missing. A file that did not
    /// exist before the call gets the schema; an existing file is assumed
    /// to carry it already.
    pub fn open(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent)?;
        }
        let fresh = !path.exists();
        let conn = Connection::open(path)?;
        Self::initialize(conn, fresh)
    }

    /// Open a store that lives only in memory. Always gets a fresh schema.
    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::initialize(conn, true)
    }

    fn initialize(conn: Connection, fresh: bool) -> StoreResult<Self> {
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        let store = Self { conn };
        if fresh {
            store.create_schema()?;
        }
        Ok(store)
    }

    /// Create the empty schema. Fails when the tables already exist.
    pub fn create_schema(&self) -> StoreResult<()> {
        self.conn.execute_batch(Self::SCHEMA)?;
        Ok(())
    }

    /// Insert an annotation at `(ws, path, line)`, replacing the binding of
    /// an existing location at that coordinate. The replaced annotation row
    /// is left behind unreferenced.
    pub fn insert_or_update(
        &mut self,
        ws: &str,
        path: &str,
        line: u32,
        text: &str,
    ) -> StoreResult<()> {
        tracing::debug!(ws, path, line, "store: insert_or_update");
        let tx = self.conn.transaction()?;
        tx.execute("INSERT INTO annotations (content) VALUES (?1)", [text])?;
        let ann_id = tx.last_insert_rowid();
        tx.execute(
            "INSERT INTO annotation_locations (workspace, path, line, ann_id)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (workspace, path, line) DO UPDATE SET ann_id = excluded.ann_id",
            params![ws, path, line, ann_id],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Delete the annotation at `(ws, path, line)`. A missing location is a
    /// silent success; touching more than one row is an internal error.
    pub fn delete(&mut self, ws: &str, path: &str, line: u32) -> StoreResult<()> {
        tracing::debug!(ws, path, line, "store: delete");
        let affected = self.conn.execute(
            "DELETE FROM annotation_locations
             WHERE workspace = ?1 AND path = ?2 AND line = ?3",
            params![ws, path, line],
        )?;
        if affected > 1 {
            return Err(StoreError::RowCount {
                expected: 1,
                actual: affected,
            });
        }
        Ok(())
    }

    /// Relocate a single annotation, possibly into a different file.
    /// Exactly one row must match.
    pub fn move_to(
        &mut self,
        ws: &str,
        path: &str,
        line: u32,
        new_path: &str,
        new_line: u32,
    ) -> StoreResult<()> {
        tracing::debug!(ws, path, line, new_path, new_line, "store: move_to");
        let affected = self.conn.execute(
            "UPDATE annotation_locations
             SET path = ?1, line = ?2
             WHERE workspace = ?3 AND path = ?4 AND line = ?5",
            params![new_path, new_line, ws, path, line],
        )?;
        if affected != 1 {
            return Err(StoreError::RowCount {
                expected: 1,
                actual: affected,
            });
        }
        Ok(())
    }

    /// Shift every location with `line >= from_line` by `delta`.
    pub fn bulk_shift(
        &mut self,
        ws: &str,
        path: &str,
        from_line: u32,
        delta: i32,
    ) -> StoreResult<()> {
        tracing::debug!(ws, path, from_line, delta, "store: bulk_shift");
        let tx = self.conn.transaction()?;
        shift_rows(&tx, ws, path, from_line, delta)?;
        tx.commit()?;
        Ok(())
    }

    /// Merge-on-delete over `[first, last]`, then close the hole by `delta`
    /// (callers pass `delta < 0`). Runs in its own transaction; see
    /// [`AnnotationStore::merge_in_tx`] for the steps.
    pub fn bulk_append_merge(
        &mut self,
        ws: &str,
        path: &str,
        first: u32,
        last: u32,
        delta: i32,
    ) -> StoreResult<()> {
        let tx = self.conn.transaction()?;
        Self::merge_in_tx(&tx, ws, path, first, last, delta)?;
        tx.commit()?;
        Ok(())
    }

    /// The deletion core, scheduled into a caller-supplied transaction:
    ///
    /// 1. Concatenate the contents of locations with `line ∈ [first, last]`
    ///    in ascending line order, separated by [`MERGE_SEPARATOR`], and
    ///    insert the result as a new annotation (skipped for an empty set).
    /// 2. Delete all locations in `[first, last]`.
    /// 3. Bind the merged annotation, if any, at `(ws, path, first)`.
    /// 4. Shift locations with `line >= last` by `delta`.
    pub fn merge_in_tx(
        tx: &Transaction<'_>,
        ws: &str,
        path: &str,
        first: u32,
        last: u32,
        delta: i32,
    ) -> StoreResult<()> {
        tracing::debug!(ws, path, first, last, delta, "store: merge_in_tx");
        if first > last {
            return Err(StoreError::Usage(format!(
                "inverted merge range: first={first}, last={last}"
            )));
        }

        let merged = {
            let mut stmt = tx.prepare(
                "SELECT a.content
                 FROM annotation_locations l
                 INNER JOIN annotations a ON l.ann_id = a.id
                 WHERE l.workspace = ?1 AND l.path = ?2
                   AND l.line >= ?3 AND l.line <= ?4
                 ORDER BY l.line",
            )?;
            let contents = stmt
                .query_map(params![ws, path, first, last], |row| {
                    row.get::<_, String>(0)
                })?
                .collect::<Result<Vec<_>, _>>()?;
            contents
        };
        let merged_id = if merged.is_empty() {
            None
        } else {
            tx.execute(
                "INSERT INTO annotations (content) VALUES (?1)",
                [merged.join(MERGE_SEPARATOR)],
            )?;
            Some(tx.last_insert_rowid())
        };

        tx.execute(
            "DELETE FROM annotation_locations
             WHERE workspace = ?1 AND path = ?2 AND line >= ?3 AND line <= ?4",
            params![ws, path, first, last],
        )?;

        if let Some(ann_id) = merged_id {
            tx.execute(
                "INSERT OR REPLACE INTO annotation_locations (workspace, path, line, ann_id)
                 VALUES (?1, ?2, ?3, ?4)",
                params![ws, path, first, ann_id],
            )?;
        }

        shift_rows(tx, ws, path, last, delta)
    }

    /// Content of the annotation at `(ws, path, line)`, or an empty string
    /// when there is none.
    pub fn get(&self, ws: &str, path: &str, line: u32) -> StoreResult<String> {
        check_keys(ws, path)?;
        let content: Option<String> = self
            .conn
            .query_row(
                "SELECT a.content
                 FROM annotation_locations l
                 INNER JOIN annotations a ON l.ann_id = a.id
                 WHERE l.workspace = ?1 AND l.path = ?2 AND l.line = ?3",
                params![ws, path, line],
                |row| row.get(0),
            )
            .optional()?;
        match content {
            Some(content) => Ok(content),
            None => {
                tracing::debug!(ws, path, line, "store: no annotation at line");
                Ok(String::new())
            }
        }
    }

    /// All annotations for `(ws, path)`, ascending by line.
    pub fn list(&self, ws: &str, path: &str) -> StoreResult<Vec<Ann>> {
        check_keys(ws, path)?;
        let mut stmt = self.conn.prepare(
            "SELECT l.line, a.content
             FROM annotation_locations l
             INNER JOIN annotations a ON l.ann_id = a.id
             WHERE l.workspace = ?1 AND l.path = ?2
             ORDER BY l.line",
        )?;
        let anns = stmt
            .query_map(params![ws, path], |row| {
                Ok(Ann {
                    line: row.get(0)?,
                    content: row.get(1)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(anns)
    }
}

fn check_keys(ws: &str, path: &str) -> StoreResult<()> {
    if ws.is_empty() || path.is_empty() {
        return Err(StoreError::Usage(format!(
            "empty workspace or path: ws={ws:?}, path={path:?}"
        )));
    }
    Ok(())
}

/// Shift `line >= from_line` by `delta` within `tx`.
///
/// Two passes through negative line numbers, so no intermediate state can
/// collide with the unique `(workspace, path, line)` index while rows move
/// past each other.
fn shift_rows(
    tx: &Transaction<'_>,
    ws: &str,
    path: &str,
    from_line: u32,
    delta: i32,
) -> StoreResult<()> {
    tx.execute(
        "UPDATE annotation_locations
         SET line = -(line + ?1) - 1
         WHERE workspace = ?2 AND path = ?3 AND line >= ?4",
        params![delta, ws, path, from_line],
    )?;
    tx.execute(
        "UPDATE annotation_locations
         SET line = -line - 1
         WHERE workspace = ?1 AND path = ?2 AND line < 0",
        params![ws, path],
    )?;
    Ok(())
}
