//! Keyed, subscriber-based cache of query results and UI state.
//!
//! The store is pure data: no business rules, no transport. All mutation goes
//! through the narrow named operations here so cache invariants stay
//! auditable. The engine and the UI share one store via the clone-able
//! [`SharedCache`] handle; there is no ambient singleton.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::grouping::GroupingMode;
use crate::models::{Emne, Entity, EntityKind, Group};

/// Which conceptual entity kinds a cached list holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScopeKind {
    Krav,
    Tiltak,
    /// Heterogeneous requirement-and-measure list.
    Combined,
}

/// Identifies one cached entity list: the kinds it holds and the project it
/// is scoped to (`None` for the global lists).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntityScope {
    pub kind: ScopeKind,
    pub project_id: Option<i64>,
}

impl EntityScope {
    pub fn krav(project_id: Option<i64>) -> Self {
        Self { kind: ScopeKind::Krav, project_id }
    }

    pub fn tiltak(project_id: Option<i64>) -> Self {
        Self { kind: ScopeKind::Tiltak, project_id }
    }

    pub fn combined(project_id: Option<i64>) -> Self {
        Self { kind: ScopeKind::Combined, project_id }
    }

    /// True when entities of `kind` belong in this scope's list.
    pub fn contains_kind(&self, kind: EntityKind) -> bool {
        match self.kind {
            ScopeKind::Krav => kind.is_requirement(),
            ScopeKind::Tiltak => kind.is_measure(),
            ScopeKind::Combined => true,
        }
    }

    /// True when `entity` belongs in this scope's list.
    pub fn admits(&self, entity: &Entity) -> bool {
        self.contains_kind(entity.kind) && self.project_id == entity.project_id
    }

    /// The entity kind every record in a single-kind scope carries, used to
    /// normalize wire records. Combined scopes keep what the wire said.
    pub fn uniform_kind(&self) -> Option<EntityKind> {
        match (self.kind, self.project_id) {
            (ScopeKind::Krav, None) => Some(EntityKind::Krav),
            (ScopeKind::Krav, Some(_)) => Some(EntityKind::ProsjektKrav),
            (ScopeKind::Tiltak, None) => Some(EntityKind::Tiltak),
            (ScopeKind::Tiltak, Some(_)) => Some(EntityKind::ProsjektTiltak),
            (ScopeKind::Combined, _) => None,
        }
    }

    /// Server list path for this scope.
    pub fn path(&self, base: &str) -> String {
        let segment = match self.kind {
            ScopeKind::Krav => "krav",
            ScopeKind::Tiltak => "tiltak",
            ScopeKind::Combined => "kravTiltak",
        };
        match self.project_id {
            Some(project) => format!("{}/prosjekt/{}/{}", base, project, segment),
            None => format!("{}/{}", base, segment),
        }
    }
}

/// Addresses one cached value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    /// A flat entity list for a scope.
    Entities(EntityScope),
    /// The topic list for a project (`None` for the global list).
    Topics(Option<i64>),
    /// A derived grouped view over a scope's entity list.
    Grouped(EntityScope, GroupingMode),
    /// Simple scalar UI state.
    Scalar(String),
}

/// A cached value.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheValue {
    Entities(Vec<Entity>),
    Topics(Vec<Emne>),
    Groups(Vec<Group>),
    Scalar(Value),
}

impl CacheValue {
    pub fn as_entities(&self) -> Option<&Vec<Entity>> {
        match self {
            CacheValue::Entities(list) => Some(list),
            _ => None,
        }
    }

    pub fn into_entities(self) -> Option<Vec<Entity>> {
        match self {
            CacheValue::Entities(list) => Some(list),
            _ => None,
        }
    }

    pub fn as_topics(&self) -> Option<&Vec<Emne>> {
        match self {
            CacheValue::Topics(list) => Some(list),
            _ => None,
        }
    }

    pub fn as_groups(&self) -> Option<&Vec<Group>> {
        match self {
            CacheValue::Groups(list) => Some(list),
            _ => None,
        }
    }
}

/// Notification delivered to subscribers of a key.
#[derive(Debug, Clone)]
pub enum CacheEvent {
    Updated(CacheValue),
    Invalidated,
}

/// Handle returned by [`SharedCache::subscribe`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Callback = Arc<dyn Fn(&CacheEvent) + Send + Sync>;

#[derive(Default)]
struct CacheStore {
    entries: HashMap<CacheKey, CacheValue>,
    subscribers: HashMap<CacheKey, Vec<(SubscriptionId, Callback)>>,
    subscription_keys: HashMap<SubscriptionId, CacheKey>,
    next_subscription: u64,
}

/// Clone-able handle to one shared cache store.
#[derive(Clone, Default)]
pub struct SharedCache {
    inner: Arc<Mutex<CacheStore>>,
}

impl SharedCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a callback invoked on every update or invalidation of `key`.
    pub fn subscribe<F>(&self, key: CacheKey, callback: F) -> SubscriptionId
    where
        F: Fn(&CacheEvent) + Send + Sync + 'static,
    {
        let mut store = self.inner.lock().unwrap();
        store.next_subscription += 1;
        let id = SubscriptionId(store.next_subscription);
        store.subscription_keys.insert(id, key.clone());
        store
            .subscribers
            .entry(key)
            .or_default()
            .push((id, Arc::new(callback)));
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        let mut store = self.inner.lock().unwrap();
        if let Some(key) = store.subscription_keys.remove(&id) {
            if let Some(list) = store.subscribers.get_mut(&key) {
                list.retain(|(sub, _)| *sub != id);
            }
        }
    }

    /// Returns a clone of the current value under `key`.
    pub fn get_snapshot(&self, key: &CacheKey) -> Option<CacheValue> {
        self.inner.lock().unwrap().entries.get(key).cloned()
    }

    /// Writes `value` under `key` and notifies subscribers.
    pub fn set_snapshot(&self, key: CacheKey, value: CacheValue) {
        let callbacks = {
            let mut store = self.inner.lock().unwrap();
            store.entries.insert(key.clone(), value.clone());
            store.callbacks_for(&key)
        };
        let event = CacheEvent::Updated(value);
        for callback in callbacks {
            callback(&event);
        }
    }

    /// Drops the value under `key` and notifies subscribers.
    pub fn invalidate(&self, key: &CacheKey) {
        let (existed, callbacks) = {
            let mut store = self.inner.lock().unwrap();
            let existed = store.entries.remove(key).is_some();
            (existed, store.callbacks_for(key))
        };
        if existed {
            let event = CacheEvent::Invalidated;
            for callback in callbacks {
                callback(&event);
            }
        }
    }

    /// All keys currently holding a value.
    pub fn keys(&self) -> Vec<CacheKey> {
        self.inner.lock().unwrap().entries.keys().cloned().collect()
    }

    /// The cached entity list under `key`, if `key` is an entity list.
    pub fn entities(&self, key: &CacheKey) -> Option<Vec<Entity>> {
        self.get_snapshot(key).and_then(CacheValue::into_entities)
    }
}

impl CacheStore {
    /// Callbacks for `key`, cloned out so they can run without the lock held.
    fn callbacks_for(&self, key: &CacheKey) -> Vec<Callback> {
        self.subscribers
            .get(key)
            .map(|list| list.iter().map(|(_, cb)| Arc::clone(cb)).collect())
            .unwrap_or_default()
    }
}
