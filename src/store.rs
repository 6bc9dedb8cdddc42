//! Batch store contract and the in-memory implementation.
//!
//! Generated route sets follow "replace, not merge": storing a new set for an
//! (authority, activity) pair removes every earlier route batch for that pair
//! first. Records must be tagged with a batch id before they are inserted.

use std::collections::BTreeMap;

use chrono::Utc;
use log::info;

use crate::batch::{BatchId, BatchKind, BatchSummary, Batched};
use crate::error::StoreError;
use crate::{ActivityType, CuratedRoute, InfrastructureSegment};

/// Persistence contract for segments, routes and their batches.
pub trait RouteStore {
    /// Store tagged segments. Returns the number inserted.
    fn insert_segments(&mut self, segments: &[InfrastructureSegment]) -> Result<usize, StoreError>;

    /// Store tagged routes. Returns the number inserted.
    fn insert_routes(&mut self, routes: &[CuratedRoute]) -> Result<usize, StoreError>;

    /// All batches, oldest first.
    fn list_batches(&self) -> Result<Vec<BatchSummary>, StoreError>;

    /// Remove every record of a batch. Returns the number of records removed.
    fn delete_batch(&mut self, batch_id: &BatchId) -> Result<usize, StoreError>;

    fn routes_for(
        &self,
        authority_id: &str,
        activity: ActivityType,
    ) -> Result<Vec<CuratedRoute>, StoreError>;

    fn segments_for(&self, authority_id: &str) -> Result<Vec<InfrastructureSegment>, StoreError>;

    /// Swap the stored route set for `(authority_id, activity)`.
    ///
    /// `routes` are checked first (tagged, and not reusing a segment batch
    /// id), so a rejected set leaves the stored one untouched. Earlier route
    /// batches for the pair are then deleted before `routes` are inserted.
    /// Returns the number of routes deleted.
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

        let batches = self.list_batches()?;
        for group in group_by_batch(routes)? {
            if let Some(existing) = batches
                .iter()
                .find(|b| b.batch_id == group.batch_id && b.kind != BatchKind::Routes)
            {
                return Err(StoreError::InvalidRecord {
                    message: format!(
                        "batch {} already holds {}",
                        group.batch_id,
                        existing.kind.as_str()
                    ),
                });
            }
        }

        let previous: Vec<BatchId> = batches
            .into_iter()
            .filter(|b| {
                b.kind == BatchKind::Routes
                    && b.authority_id == authority_id
                    && b.activity_type == Some(activity)
            })
            .map(|b| b.batch_id)
            .collect();

        let mut deleted = 0;
        for batch_id in &previous {
            deleted += self.delete_batch(batch_id)?;
        }
        self.insert_routes(routes)?;

        info!(
            "[Store] Replaced {} routes in {} batches for {}/{} with {}",
            deleted,
            previous.len(),
            authority_id,
            activity,
            routes.len()
        );
        Ok(deleted)
    }
}

/// One batch's share of an insert.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct BatchGroup {
    pub batch_id: BatchId,
    pub source_name: String,
    pub authority_id: String,
    pub activity_type: Option<ActivityType>,
    pub count: usize,
}

/// Records that belong to a batch listing.
pub(crate) trait BatchRecord: Batched {
    fn source_name(&self) -> &str;
    fn authority_id(&self) -> &str;
    fn activity_type(&self) -> Option<ActivityType>;
    fn record_id(&self) -> &str;
}

impl BatchRecord for InfrastructureSegment {
    fn source_name(&self) -> &str {
        &self.source_name
    }
    fn authority_id(&self) -> &str {
        &self.authority_id
    }
    fn activity_type(&self) -> Option<ActivityType> {
        None
    }
    fn record_id(&self) -> &str {
        &self.id
    }
}

impl BatchRecord for CuratedRoute {
    fn source_name(&self) -> &str {
        &self.source_name
    }
    fn authority_id(&self) -> &str {
        &self.authority_id
    }
    fn activity_type(&self) -> Option<ActivityType> {
        Some(self.activity_type)
    }
    fn record_id(&self) -> &str {
        &self.id
    }
}

/// Group records by batch, in first-seen order. Untagged records are rejected.
pub(crate) fn group_by_batch<T: BatchRecord>(records: &[T]) -> Result<Vec<BatchGroup>, StoreError> {
    let mut groups: Vec<BatchGroup> = Vec::new();
    for record in records {
        let batch_id = record.batch_id().ok_or_else(|| StoreError::InvalidRecord {
            message: format!("{} has no import batch id", record.record_id()),
        })?;
        match groups.iter_mut().find(|g| &g.batch_id == batch_id) {
            Some(group) => group.count += 1,
            None => groups.push(BatchGroup {
                batch_id: batch_id.clone(),
                source_name: record.source_name().to_string(),
                authority_id: record.authority_id().to_string(),
                activity_type: record.activity_type(),
                count: 1,
            }),
        }
    }
    Ok(groups)
}

/// Store held entirely in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    segments: Vec<InfrastructureSegment>,
    routes: Vec<CuratedRoute>,
    batches: BTreeMap<BatchId, BatchSummary>,
    /// Insertion order of batch ids
    order: Vec<BatchId>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    pub fn route_count(&self) -> usize {
        self.routes.len()
    }

    /// Register batch groups, checking kinds agree with earlier inserts.
    fn record_batches(&mut self, groups: Vec<BatchGroup>, kind: BatchKind) -> Result<(), StoreError> {
        for group in &groups {
            if let Some(existing) = self.batches.get(&group.batch_id) {
                if existing.kind != kind {
                    return Err(StoreError::InvalidRecord {
                        message: format!(
                            "batch {} already holds {}",
                            group.batch_id,
                            existing.kind.as_str()
                        ),
                    });
                }
            }
        }
        for group in groups {
            match self.batches.get_mut(&group.batch_id) {
                Some(existing) => existing.record_count += group.count,
                None => {
                    self.order.push(group.batch_id.clone());
                    self.batches.insert(
                        group.batch_id.clone(),
                        BatchSummary {
                            batch_id: group.batch_id,
                            source_name: group.source_name,
                            authority_id: group.authority_id,
                            activity_type: group.activity_type,
                            kind,
                            record_count: group.count,
                            created_at: Utc::now(),
                        },
                    );
                }
            }
        }
        Ok(())
    }
}

impl RouteStore for MemoryStore {
    fn insert_segments(&mut self, segments: &[InfrastructureSegment]) -> Result<usize, StoreError> {
        let groups = group_by_batch(segments)?;
        self.record_batches(groups, BatchKind::Segments)?;
        self.segments.extend_from_slice(segments);
        Ok(segments.len())
    }

    fn insert_routes(&mut self, routes: &[CuratedRoute]) -> Result<usize, StoreError> {
        let groups = group_by_batch(routes)?;
        self.record_batches(groups, BatchKind::Routes)?;
        self.routes.extend_from_slice(routes);
        Ok(routes.len())
    }

    fn list_batches(&self) -> Result<Vec<BatchSummary>, StoreError> {
        Ok(self
            .order
            .iter()
            .filter_map(|id| self.batches.get(id).cloned())
            .collect())
    }

    fn delete_batch(&mut self, batch_id: &BatchId) -> Result<usize, StoreError> {
        let before = self.segments.len() + self.routes.len();
        self.segments
            .retain(|s| s.import_batch_id.as_ref() != Some(batch_id));
        self.routes
            .retain(|r| r.import_batch_id.as_ref() != Some(batch_id));
        self.batches.remove(batch_id);
        self.order.retain(|id| id != batch_id);
        Ok(before - (self.segments.len() + self.routes.len()))
    }

    fn routes_for(
        &self,
        authority_id: &str,
        activity: ActivityType,
    ) -> Result<Vec<CuratedRoute>, StoreError> {
        Ok(self
            .routes
            .iter()
            .filter(|r| r.authority_id == authority_id && r.activity_type == activity)
            .cloned()
            .collect())
    }

    fn segments_for(&self, authority_id: &str) -> Result<Vec<InfrastructureSegment>, StoreError> {
        Ok(self
            .segments
            .iter()
            .filter(|s| s.authority_id == authority_id)
            .cloned()
            .collect())
    }
}
