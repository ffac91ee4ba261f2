//! Entity store - mutable instance repository with point-in-time snapshots
//!
//! The store is plain data: one `BTreeMap` per entity type keyed by
//! instance id. Each verification trial owns its own store; nothing here
//! is shared between trials, so no locking is needed.
//!
//! # Snapshots
//!
//! [`EntityStore::snapshot`] performs a full deep copy. The live store and a
//! snapshot never share backing memory, so mutating the live store after
//! snapshotting is invisible through the snapshot. `old(expr)` reads the
//! snapshot object directly; [`EntityStore::restore`] only resets live
//! state between independent trials.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::value::Value;

/// Instances of every entity type, keyed by entity name then instance id
pub type EntityMap = BTreeMap<String, BTreeMap<String, EntityInstance>>;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StoreError {
    #[error("{entity} '{id}' not found")]
    NotFound { entity: String, id: String },

    #[error("{entity} '{id}' already exists")]
    Duplicate { entity: String, id: String },

    #[error("invalid {entity} instance: {reason}")]
    InvalidInstance { entity: String, reason: String },
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

// ── Instances ─────────────────────────────────────────────

/// One live record of an entity type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityInstance {
    pub id: String,
    pub entity: String,
    pub fields: BTreeMap<String, Value>,
}

impl EntityInstance {
    /// Object view used by the evaluator; always carries the `id` field
    pub fn to_value(&self) -> Value {
        let mut fields = self.fields.clone();
        fields
            .entry("id".to_string())
            .or_insert_with(|| Value::String(self.id.clone()));
        Value::Object(fields)
    }

    /// Partial equality filter: every criterion must equal the field
    ///
    /// `id` is matched against the canonical string id, so `5` and `"5"`
    /// both find an instance created with `id: 5`.
    pub fn matches(&self, criteria: &BTreeMap<String, Value>) -> bool {
        criteria.iter().all(|(key, expected)| {
            if key == "id" {
                match expected {
                    Value::String(s) => return *s == self.id,
                    Value::Integer(i) => return i.to_string() == self.id,
                    _ => {}
                }
            }
            self.fields
                .get(key)
                .is_some_and(|actual| actual.loose_eq(expected))
        })
    }
}

// ── Read access ───────────────────────────────────────────

/// Read-only queries shared by the live store and its snapshots
pub trait EntitySource {
    fn entity_map(&self) -> &EntityMap;

    /// Every instance of `entity`, in id order
    fn get_all(&self, entity: &str) -> Vec<&EntityInstance> {
        self.entity_map()
            .get(entity)
            .map(|instances| instances.values().collect())
            .unwrap_or_default()
    }

    fn get(&self, entity: &str, id: &str) -> Option<&EntityInstance> {
        self.entity_map().get(entity).and_then(|m| m.get(id))
    }

    fn exists(&self, entity: &str, criteria: &BTreeMap<String, Value>) -> bool {
        self.lookup(entity, criteria).is_some()
    }

    /// First instance (in id order) matching the criteria
    fn lookup(&self, entity: &str, criteria: &BTreeMap<String, Value>) -> Option<&EntityInstance> {
        self.entity_map()
            .get(entity)
            .and_then(|m| m.values().find(|inst| inst.matches(criteria)))
    }

    fn count(&self, entity: &str, criteria: &BTreeMap<String, Value>) -> usize {
        self.entity_map()
            .get(entity)
            .map(|m| m.values().filter(|inst| inst.matches(criteria)).count())
            .unwrap_or(0)
    }

    /// Total number of instances across all entity types
    fn len(&self) -> usize {
        self.entity_map().values().map(|m| m.len()).sum()
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ── Live store ────────────────────────────────────────────

/// Mutable, typed instance repository
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntityStore {
    entities: EntityMap,
    next_id: u64,
}

impl EntitySource for EntityStore {
    fn entity_map(&self) -> &EntityMap {
        &self.entities
    }
}

impl EntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an instance. The id comes from the `id` field when present,
    /// otherwise one is generated as `<entity>-<n>`.
    pub fn create(
        &mut self,
        entity: &str,
        mut fields: BTreeMap<String, Value>,
    ) -> StoreResult<EntityInstance> {
        let id = match fields.get("id") {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Integer(i)) => i.to_string(),
            Some(other) => {
                return Err(StoreError::InvalidInstance {
                    entity: entity.to_string(),
                    reason: format!("id must be a String or Integer, found {}", other.type_name()),
                })
            }
            None => {
                self.next_id += 1;
                let id = format!("{}-{}", entity.to_lowercase(), self.next_id);
                fields.insert("id".to_string(), Value::String(id.clone()));
                id
            }
        };

        let instances = self.entities.entry(entity.to_string()).or_default();
        if instances.contains_key(&id) {
            return Err(StoreError::Duplicate {
                entity: entity.to_string(),
                id,
            });
        }

        let instance = EntityInstance {
            id: id.clone(),
            entity: entity.to_string(),
            fields,
        };
        instances.insert(id, instance.clone());
        Ok(instance)
    }

    /// Create an instance from an object value
    pub fn insert_value(&mut self, entity: &str, value: Value) -> StoreResult<EntityInstance> {
        match value {
            Value::Object(fields) => self.create(entity, fields),
            other => Err(StoreError::InvalidInstance {
                entity: entity.to_string(),
                reason: format!("expected Object, found {}", other.type_name()),
            }),
        }
    }

    /// Merge `changes` into an existing instance. A missing id is an error,
    /// never a silent no-op.
    pub fn update(
        &mut self,
        entity: &str,
        id: &str,
        changes: BTreeMap<String, Value>,
    ) -> StoreResult<EntityInstance> {
        let instance = self
            .entities
            .get_mut(entity)
            .and_then(|m| m.get_mut(id))
            .ok_or_else(|| StoreError::NotFound {
                entity: entity.to_string(),
                id: id.to_string(),
            })?;
        for (key, value) in changes {
            if key == "id" {
                continue;
            }
            instance.fields.insert(key, value);
        }
        Ok(instance.clone())
    }

    pub fn delete(&mut self, entity: &str, id: &str) -> StoreResult<EntityInstance> {
        self.entities
            .get_mut(entity)
            .and_then(|m| m.remove(id))
            .ok_or_else(|| StoreError::NotFound {
                entity: entity.to_string(),
                id: id.to_string(),
            })
    }

    /// Entity type names with at least one map allocated, in order
    pub fn entity_names(&self) -> Vec<&str> {
        self.entities.keys().map(String::as_str).collect()
    }

    /// Deep structural copy of every entity map
    pub fn snapshot(&self) -> EntityStoreSnapshot {
        EntityStoreSnapshot {
            entities: self.entities.clone(),
            taken_at: Utc::now(),
        }
    }

    /// Replace live state wholesale with the snapshot's contents
    pub fn restore(&mut self, snapshot: &EntityStoreSnapshot) {
        self.entities = snapshot.entities.clone();
    }

    /// Per-instance changes between `before` and the live store
    pub fn diff(&self, before: &EntityStoreSnapshot) -> Vec<StoreChange> {
        let mut changes = Vec::new();
        let empty = BTreeMap::new();

        for (entity, old_instances) in &before.entities {
            let new_instances = self.entities.get(entity).unwrap_or(&empty);
            for (id, old) in old_instances {
                match new_instances.get(id) {
                    Some(new) if new != old => changes.push(StoreChange {
                        entity: entity.clone(),
                        id: id.clone(),
                        kind: ChangeKind::Updated,
                        before: Some(old.to_value()),
                        after: Some(new.to_value()),
                    }),
                    None => changes.push(StoreChange {
                        entity: entity.clone(),
                        id: id.clone(),
                        kind: ChangeKind::Deleted,
                        before: Some(old.to_value()),
                        after: None,
                    }),
                    _ => {}
                }
            }
        }

        for (entity, new_instances) in &self.entities {
            let old_instances = before.entities.get(entity).unwrap_or(&empty);
            for (id, new) in new_instances {
                if !old_instances.contains_key(id) {
                    changes.push(StoreChange {
                        entity: entity.clone(),
                        id: id.clone(),
                        kind: ChangeKind::Created,
                        before: None,
                        after: Some(new.to_value()),
                    });
                }
            }
        }

        changes
    }
}

// ── Snapshots ─────────────────────────────────────────────

/// Point-in-time deep copy of the store, used to resolve `old(expr)`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityStoreSnapshot {
    entities: EntityMap,
    pub taken_at: DateTime<Utc>,
}

impl EntitySource for EntityStoreSnapshot {
    fn entity_map(&self) -> &EntityMap {
        &self.entities
    }
}

impl EntityStoreSnapshot {
    /// JSON view `{ entity: { id: fields } }` for traces and reports
    pub fn to_json(&self) -> serde_json::Value {
        let entities: serde_json::Map<String, serde_json::Value> = self
            .entities
            .iter()
            .map(|(entity, instances)| {
                let by_id: serde_json::Map<String, serde_json::Value> = instances
                    .iter()
                    .map(|(id, inst)| (id.clone(), inst.to_value().to_json()))
                    .collect();
                (entity.clone(), serde_json::Value::Object(by_id))
            })
            .collect();
        serde_json::Value::Object(entities)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Created,
    Updated,
    Deleted,
}

/// A single instance change between a snapshot and the live store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreChange {
    pub entity: String,
    pub id: String,
    pub kind: ChangeKind,
    pub before: Option<Value>,
    pub after: Option<Value>,
}
