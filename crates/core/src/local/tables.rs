use std::sync::Arc;

use chrono::{DateTime, Utc};
use clientkey_common::error::{CommonError, CommonResult};
use clientkey_domain::constants::{local_table_key, ACTIVITIES_RESOURCE, MAX_ACTIVITIES_PER_CLIENT};
use clientkey_domain::{generate_id, Record};
use serde_json::Value;
use tracing::debug;

use crate::ports::LocalStore;
use crate::records::{field_str, record_timestamp};

/// Per-resource record arrays over a [`LocalStore`]
///
/// Writes are read-modify-write of the whole array with no isolation between
/// concurrent writers; the last write wins.
#[derive(Clone)]
pub struct LocalTables {
    store: Arc<dyn LocalStore>,
    activity_cap: usize,
}

impl std::fmt::Debug for LocalTables {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalTables").field("activity_cap", &self.activity_cap).finish()
    }
}

impl LocalTables {
    pub fn new(store: Arc<dyn LocalStore>) -> Self {
        Self { store, activity_cap: MAX_ACTIVITIES_PER_CLIENT }
    }

    /// Keep at most `cap` activities per client
    pub fn with_activity_cap(mut self, cap: usize) -> Self {
        self.activity_cap = cap;
        self
    }

    pub fn store(&self) -> &Arc<dyn LocalStore> {
        &self.store
    }

    pub fn load(&self, resource: &str) -> CommonResult<Vec<Record>> {
        match self.store.get_item(&local_table_key(resource))? {
            Some(raw) => serde_json::from_str(&raw).map_err(|e| {
                CommonError::serialization_format(
                    "json",
                    format!("corrupt local table {resource}: {e}"),
                )
            }),
            None => Ok(Vec::new()),
        }
    }

    pub fn save(&self, resource: &str, records: &[Record]) -> CommonResult<()> {
        let raw = serde_json::to_string(records)?;
        self.store.set_item(&local_table_key(resource), &raw)
    }

    /// Append a record, filling in `id` and timestamps the caller left out
    pub fn insert(&self, resource: &str, mut record: Record, now: DateTime<Utc>) -> CommonResult<Record> {
        if field_str(&record, "id").is_none() {
            record.insert("id".into(), Value::String(generate_id()));
        }
        let stamp = Value::String(now.to_rfc3339());
        record.entry("created_at").or_insert_with(|| stamp.clone());
        record.entry("updated_at").or_insert(stamp);

        let mut records = self.load(resource)?;
        records.push(record.clone());
        if resource == ACTIVITIES_RESOURCE {
            if let Some(client_id) = field_str(&record, "client_id") {
                self.prune_activities(&mut records, client_id);
            }
        }
        self.save(resource, &records)?;
        Ok(record)
    }

    /// Merge `changes` into the record with `id`
    pub fn update(
        &self,
        resource: &str,
        id: &str,
        changes: &Record,
        now: DateTime<Utc>,
    ) -> CommonResult<Record> {
        let mut records = self.load(resource)?;
        let record = records
            .iter_mut()
            .find(|r| field_str(r, "id") == Some(id))
            .ok_or_else(|| CommonError::not_found_with_id(resource, id))?;

        for (key, value) in changes {
            if key != "id" {
                record.insert(key.clone(), value.clone());
            }
        }
        record.insert("updated_at".into(), Value::String(now.to_rfc3339()));
        let updated = record.clone();

        self.save(resource, &records)?;
        Ok(updated)
    }

    /// Remove the record with `id`; returns whether one was removed
    pub fn delete(&self, resource: &str, id: &str) -> CommonResult<bool> {
        let mut records = self.load(resource)?;
        let before = records.len();
        records.retain(|r| field_str(r, "id") != Some(id));
        let removed = records.len() != before;
        if removed {
            self.save(resource, &records)?;
        }
        Ok(removed)
    }

    fn prune_activities(&self, records: &mut Vec<Record>, client_id: &str) {
        let mut owned: Vec<(usize, Option<DateTime<Utc>>)> = records
            .iter()
            .enumerate()
            .filter(|(_, r)| field_str(r, "client_id") == Some(client_id))
            .map(|(pos, r)| (pos, record_timestamp(r)))
            .collect();

        let excess = owned.len().saturating_sub(self.activity_cap);
        if excess == 0 {
            return;
        }

        owned.sort_by_key(|(_, ts)| *ts);
        let mut doomed: Vec<usize> = owned.into_iter().take(excess).map(|(pos, _)| pos).collect();
        doomed.sort_unstable_by(|a, b| b.cmp(a));
        for pos in doomed {
            records.remove(pos);
        }
        debug!(client_id, dropped = excess, "Pruned oldest activities");
    }
}
