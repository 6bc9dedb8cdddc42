//! # SQLite Batch Store
//!
//! [`RouteStore`] over a single SQLite database.
//!
//! Records are stored as MessagePack blobs next to the columns needed to
//! select them (batch, authority, activity). Every write runs in one
//! transaction, so a failed insert or replacement leaves the previous state
//! untouched.

use chrono::{DateTime, Utc};
use log::{debug, info};
use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::batch::{BatchId, BatchKind, BatchSummary};
use crate::error::StoreError;
use crate::store::{group_by_batch, BatchGroup, RouteStore};
use crate::{ActivityType, CuratedRoute, InfrastructureSegment};

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Backend {
            message: e.to_string(),
        }
    }
}

/// Batch store backed by SQLite.
pub struct SqliteStore {
    conn: Connection,
    path: String,
}

impl SqliteStore {
    /// Open (or create) a database file.
    pub fn open(path: &str) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        Self::init_schema(&conn)?;
        info!("[SqliteStore] Opened {}", path);
        Ok(Self {
            conn,
            path: path.to_string(),
        })
    }

    /// Create an in-memory database (for testing).
    pub fn in_memory() -> Result<Self, StoreError> {
        Self::open(":memory:")
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
        conn.execute_batch(
            r#"
            PRAGMA foreign_keys = ON;

            -- One row per bulk write
            CREATE TABLE IF NOT EXISTS batches (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                batch_id TEXT NOT NULL UNIQUE,
                source_name TEXT NOT NULL,
                authority_id TEXT NOT NULL,
                activity_type TEXT,
                kind TEXT NOT NULL,
                record_count INTEGER NOT NULL,
                created_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS segments (
                id TEXT NOT NULL,
                batch_id TEXT NOT NULL REFERENCES batches(batch_id),
                authority_id TEXT NOT NULL,
                mode TEXT NOT NULL,
                length_meters REAL NOT NULL,
                data BLOB NOT NULL
            );

            CREATE TABLE IF NOT EXISTS routes (
                id TEXT NOT NULL,
                batch_id TEXT NOT NULL REFERENCES batches(batch_id),
                authority_id TEXT NOT NULL,
                activity_type TEXT NOT NULL,
                tier TEXT NOT NULL,
                distance_meters REAL NOT NULL,
                is_hybrid INTEGER NOT NULL,
                data BLOB NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_segments_batch ON segments(batch_id);
            CREATE INDEX IF NOT EXISTS idx_segments_authority ON segments(authority_id);
            CREATE INDEX IF NOT EXISTS idx_routes_batch ON routes(batch_id);
            CREATE INDEX IF NOT EXISTS idx_routes_owner ON routes(authority_id, activity_type);
            "#,
        )
    }
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, StoreError> {
    rmp_serde::to_vec_named(value).map_err(|e| StoreError::Codec {
        message: e.to_string(),
    })
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, StoreError> {
    rmp_serde::from_slice(bytes).map_err(|e| StoreError::Codec {
        message: e.to_string(),
    })
}

/// Create or extend batch rows, rejecting a kind that differs from an
/// existing row with the same id.
fn register_batches(
    conn: &Connection,
    groups: &[BatchGroup],
    kind: BatchKind,
) -> Result<(), StoreError> {
    let now = Utc::now().timestamp_millis();
    for group in groups {
        let existing: Option<String> = conn
            .query_row(
                "SELECT kind FROM batches WHERE batch_id = ?",
                params![group.batch_id.as_str()],
                |row| row.get(0),
            )
            .optional()?;

        match existing {
            Some(existing_kind) if existing_kind != kind.as_str() => {
                return Err(StoreError::InvalidRecord {
                    message: format!("batch {} already holds {}", group.batch_id, existing_kind),
                });
            }
            Some(_) => {
                conn.execute(
                    "UPDATE batches SET record_count = record_count + ? WHERE batch_id = ?",
                    params![group.count as i64, group.batch_id.as_str()],
                )?;
            }
            None => {
                conn.execute(
                    "INSERT INTO batches (batch_id, source_name, authority_id, activity_type, kind, record_count, created_at)
                     VALUES (?, ?, ?, ?, ?, ?, ?)",
                    params![
                        group.batch_id.as_str(),
                        group.source_name,
                        group.authority_id,
                        group.activity_type.map(|a| a.as_str()),
                        kind.as_str(),
                        group.count as i64,
                        now,
                    ],
                )?;
            }
        }
    }
    Ok(())
}

fn write_segments(conn: &Connection, segments: &[InfrastructureSegment]) -> Result<usize, StoreError> {
    let groups = group_by_batch(segments)?;
    register_batches(conn, &groups, BatchKind::Segments)?;

    let mut stmt = conn.prepare(
        "INSERT INTO segments (id, batch_id, authority_id, mode, length_meters, data)
         VALUES (?, ?, ?, ?, ?, ?)",
    )?;
    for segment in segments {
        let batch_id = segment
            .import_batch_id
            .as_ref()
            .map(BatchId::as_str)
            .unwrap_or_default();
        stmt.execute(params![
            segment.id,
            batch_id,
            segment.authority_id,
            segment.mode.as_str(),
            segment.length_meters,
            encode(segment)?,
        ])?;
    }
    Ok(segments.len())
}

fn write_routes(conn: &Connection, routes: &[CuratedRoute]) -> Result<usize, StoreError> {
    let groups = group_by_batch(routes)?;
    register_batches(conn, &groups, BatchKind::Routes)?;

    let mut stmt = conn.prepare(
        "INSERT INTO routes (id, batch_id, authority_id, activity_type, tier, distance_meters, is_hybrid, data)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    )?;
    for route in routes {
        let batch_id = route
            .import_batch_id
            .as_ref()
            .map(BatchId::as_str)
            .unwrap_or_default();
        stmt.execute(params![
            route.id,
            batch_id,
            route.authority_id,
            route.activity_type.as_str(),
            route.tier,
            route.distance_meters,
            route.is_hybrid,
            encode(route)?,
        ])?;
    }
    Ok(routes.len())
}

fn remove_batch(conn: &Connection, batch_id: &BatchId) -> Result<usize, StoreError> {
    let segments = conn.execute(
        "DELETE FROM segments WHERE batch_id = ?",
        params![batch_id.as_str()],
    )?;
    let routes = conn.execute(
        "DELETE FROM routes WHERE batch_id = ?",
        params![batch_id.as_str()],
    )?;
    conn.execute(
        "DELETE FROM batches WHERE batch_id = ?",
        params![batch_id.as_str()],
    )?;
    Ok(segments + routes)
}

fn parse_kind(value: &str) -> Result<BatchKind, StoreError> {
    match value {
        "segments" => Ok(BatchKind::Segments),
        "routes" => Ok(BatchKind::Routes),
        other => Err(StoreError::Codec {
            message: format!("unknown batch kind '{}'", other),
        }),
    }
}

fn parse_activity(value: Option<String>) -> Result<Option<ActivityType>, StoreError> {
    value
        .map(|v| {
            v.parse::<ActivityType>().map_err(|e| StoreError::Codec {
                message: e.to_string(),
            })
        })
        .transpose()
}

impl RouteStore for SqliteStore {
    fn insert_segments(&mut self, segments: &[InfrastructureSegment]) -> Result<usize, StoreError> {
        let tx = self.conn.transaction()?;
        let inserted = write_segments(&tx, segments)?;
        tx.commit()?;
        debug!("[SqliteStore] Inserted {} segments", inserted);
        Ok(inserted)
    }

    fn insert_routes(&mut self, routes: &[CuratedRoute]) -> Result<usize, StoreError> {
        let tx = self.conn.transaction()?;
        let inserted = write_routes(&tx, routes)?;
        tx.commit()?;
        debug!("[SqliteStore] Inserted {} routes", inserted);
        Ok(inserted)
    }

    fn list_batches(&self) -> Result<Vec<BatchSummary>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT batch_id, source_name, authority_id, activity_type, kind, record_count, created_at
             FROM batches ORDER BY seq",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, i64>(5)?,
                    row.get::<_, i64>(6)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        rows.into_iter()
            .map(
                |(batch_id, source_name, authority_id, activity, kind, count, created_ms)| {
                    let created_at = DateTime::<Utc>::from_timestamp_millis(created_ms)
                        .ok_or_else(|| StoreError::Codec {
                            message: format!("invalid timestamp {}", created_ms),
                        })?;
                    Ok(BatchSummary {
                        batch_id: BatchId::from(batch_id),
                        source_name,
                        authority_id,
                        activity_type: parse_activity(activity)?,
                        kind: parse_kind(&kind)?,
                        record_count: count.max(0) as usize,
                        created_at,
                    })
                },
            )
            .collect()
    }

    fn delete_batch(&mut self, batch_id: &BatchId) -> Result<usize, StoreError> {
        let tx = self.conn.transaction()?;
        let removed = remove_batch(&tx, batch_id)?;
        tx.commit()?;
        info!("[SqliteStore] Deleted batch {} ({} records)", batch_id, removed);
        Ok(removed)
    }

    fn routes_for(
        &self,
        authority_id: &str,
        activity: ActivityType,
    ) -> Result<Vec<CuratedRoute>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT data FROM routes WHERE authority_id = ? AND activity_type = ? ORDER BY rowid",
        )?;
        let blobs = stmt
            .query_map(params![authority_id, activity.as_str()], |row| {
                row.get::<_, Vec<u8>>(0)
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        blobs.iter().map(|blob| decode(blob)).collect()
    }

    fn segments_for(&self, authority_id: &str) -> Result<Vec<InfrastructureSegment>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT data FROM segments WHERE authority_id = ? ORDER BY rowid")?;
        let blobs = stmt
            .query_map(params![authority_id], |row| row.get::<_, Vec<u8>>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        blobs.iter().map(|blob| decode(blob)).collect()
    }

    /// Delete and insert in one transaction.
    fn replace_routes(
        &mut self,
        authority_id: &str,
        activity: ActivityType,
        routes: &[CuratedRoute],
    ) -> Result<usize, StoreError> {
        if let Some(stray) = routes
            .iter()
            .find(|r| r.authority_id != authority_id || r.activity_type != activity)
        {
            return Err(StoreError::InvalidRecord {
                message: format!(
                    "route {} belongs to {}/{}, not {}/{}",
                    stray.id, stray.authority_id, stray.activity_type, authority_id, activity
                ),
            });
        }

        let tx = self.conn.transaction()?;
        let previous: Vec<String> = {
            let mut stmt = tx.prepare(
                "SELECT batch_id FROM batches WHERE kind = 'routes' AND authority_id = ? AND activity_type = ?",
            )?;
            let ids = stmt
                .query_map(params![authority_id, activity.as_str()], |row| row.get(0))?
                .collect::<rusqlite::Result<Vec<String>>>()?;
            ids
        };

        let mut deleted = 0;
        for batch_id in &previous {
            deleted += remove_batch(&tx, &BatchId::from(batch_id.as_str()))?;
        }
        write_routes(&tx, routes)?;
        tx.commit()?;

        info!(
            "[SqliteStore] Replaced {} routes in {} batches for {}/{} with {}",
            deleted,
            previous.len(),
            authority_id,
            activity,
            routes.len()
        );
        Ok(deleted)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::tag_batch;
    use crate::{GeoPoint, HybridType, InfrastructureMode};

    fn segment(id: &str) -> InfrastructureSegment {
        InfrastructureSegment::new(
            id,
            "auth",
            vec![GeoPoint::new(51.5, -0.13), GeoPoint::new(51.501, -0.13)],
            InfrastructureMode::Cycling,
        )
        .unwrap()
    }

    fn route(id: &str) -> CuratedRoute {
        CuratedRoute {
            id: id.to_string(),
            name: "Short Cycling Loop 1".to_string(),
            authority_id: "auth".to_string(),
            activity_type: ActivityType::Cycling,
            path: vec![
                GeoPoint::new(51.5, -0.13),
                GeoPoint::new(51.51, -0.13),
                GeoPoint::new(51.5, -0.13),
            ],
            distance_meters: 2224.0,
            tier: "short".to_string(),
            tier_target_meters: 1500.0,
            is_hybrid: true,
            hybrid_type: HybridType::Tertiary,
            facility_stops: Vec::new(),
            infrastructure_mode: InfrastructureMode::Shared,
            segment_ids: vec!["a".to_string(), "a".to_string()],
            import_batch_id: None,
            source_name: String::new(),
        }
    }

    #[test]
    fn test_create_store() {
        let store = SqliteStore::in_memory().unwrap();
        assert!(store.list_batches().unwrap().is_empty());
    }

    #[test]
    fn test_segments_round_trip_and_delete() {
        let mut store = SqliteStore::in_memory().unwrap();
        let mut first = vec![segment("a"), segment("b")];
        tag_batch(&mut first, &BatchId::from("one"), "lanes");
        let mut second = vec![segment("c")];
        tag_batch(&mut second, &BatchId::from("two"), "lanes");

        store.insert_segments(&first).unwrap();
        store.insert_segments(&second).unwrap();
        assert_eq!(store.segments_for("auth").unwrap(), [first.clone(), second].concat());

        let batches = store.list_batches().unwrap();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].batch_id.as_str(), "one");
        assert_eq!(batches[0].record_count, 2);
        assert_eq!(batches[0].activity_type, None);

        assert_eq!(store.delete_batch(&BatchId::from("two")).unwrap(), 1);
        assert_eq!(store.segments_for("auth").unwrap(), first);
    }

    #[test]
    fn test_replace_routes() {
        let mut store = SqliteStore::in_memory().unwrap();
        let mut first = vec![route("r1"), route("r2")];
        tag_batch(&mut first, &BatchId::from("gen-1"), "generated");
        store
            .replace_routes("auth", ActivityType::Cycling, &first)
            .unwrap();

        let mut second = vec![route("r1")];
        tag_batch(&mut second, &BatchId::from("gen-2"), "generated");
        let deleted = store
            .replace_routes("auth", ActivityType::Cycling, &second)
            .unwrap();
        assert_eq!(deleted, 2);

        let stored = store.routes_for("auth", ActivityType::Cycling).unwrap();
        assert_eq!(stored, second);
        let batches = store.list_batches().unwrap();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].activity_type, Some(ActivityType::Cycling));
        assert_eq!(batches[0].kind, BatchKind::Routes);
    }

    #[test]
    fn test_failed_insert_rolls_back() {
        let mut store = SqliteStore::in_memory().unwrap();
        let mut tagged = segment("a");
        tagged.import_batch_id = Some(BatchId::from("b"));
        let untagged = segment("b");

        assert!(store.insert_segments(&[tagged, untagged]).is_err());
        assert!(store.list_batches().unwrap().is_empty());
        assert!(store.segments_for("auth").unwrap().is_empty());
    }

    #[test]
    fn test_persistence() {
        let tmp = tempfile::TempDir::new().unwrap();
        let db_path = tmp.path().join("routes.db");
        let path = db_path.to_str().unwrap();

        {
            let mut store = SqliteStore::open(path).unwrap();
            let mut routes = vec![route("r1")];
            tag_batch(&mut routes, &BatchId::from("gen"), "generated");
            store.insert_routes(&routes).unwrap();
        }

        {
            let store = SqliteStore::open(path).unwrap();
            assert_eq!(store.path(), path);
            assert_eq!(store.routes_for("auth", ActivityType::Cycling).unwrap().len(), 1);
            assert_eq!(store.list_batches().unwrap()[0].source_name, "generated");
        }
    }
}
