//! Optimistic mutation against the cache with server reconciliation.
//!
//! Every mutation applies its speculative effect to the cache synchronously,
//! before the transport is called, and either reconciles with the
//! authoritative server response or restores the exact pre-mutation snapshot
//! on failure. Grouped views derived from a mutated list are re-derived in
//! the same step, so subscribers never observe a list and its grouping out of
//! sync.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::cache::{CacheKey, CacheValue, EntityScope, SharedCache};
use crate::config::EngineConfig;
use crate::grouping::{regroup_by_topic, GroupingMode};
use crate::models::{
    same_logical_entity, Emne, Entity, EntityDraft, EntityKind, EntityPatch, Group, LogicalKind,
};
use crate::transport::{entity_list_from, single_value_from, topic_list_from, Transport};

use super::SyncError;

type RevisionMap = Arc<Mutex<HashMap<(LogicalKind, i64), u64>>>;

/// The synchronization engine: optimistic mutations, query loading, and
/// derived-view maintenance over one shared cache.
///
/// The cache handle and the transport capability are injected; the engine
/// holds no ambient state beyond per-entity revision markers and the list of
/// scheduled authoritative refreshes.
pub struct SyncEngine {
    cache: SharedCache,
    transport: Arc<dyn Transport>,
    config: EngineConfig,
    revisions: RevisionMap,
    scheduled_refresh: Vec<CacheKey>,
}

impl SyncEngine {
    pub fn new(cache: SharedCache, transport: Arc<dyn Transport>, config: EngineConfig) -> Self {
        Self {
            cache,
            transport,
            config,
            revisions: Arc::new(Mutex::new(HashMap::new())),
            scheduled_refresh: Vec::new(),
        }
    }

    pub fn cache(&self) -> &SharedCache {
        &self.cache
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub(crate) fn transport(&self) -> &dyn Transport {
        self.transport.as_ref()
    }

    // =========================================================================
    // Query loading
    // =========================================================================

    /// Fetches the entity list for a scope, writes it into the cache, and
    /// re-derives every grouped view over it.
    pub fn load_entities(&mut self, scope: EntityScope) -> Result<Vec<Entity>, SyncError> {
        let path = scope.path(&self.config.api_base);
        let response = self.transport.get(&path)?;
        let entities = entity_list_from(&response.data, scope.uniform_kind());
        self.cache
            .set_snapshot(CacheKey::Entities(scope), CacheValue::Entities(entities.clone()));
        self.refresh_groups(scope);
        Ok(entities)
    }

    /// Fetches the topic list for a project (`None` for the global list) and
    /// re-derives grouped views in that project, whose order depends on it.
    pub fn load_topics(&mut self, project_id: Option<i64>) -> Result<Vec<Emne>, SyncError> {
        let path = match project_id {
            Some(project) => format!("{}/prosjekt/{}/emne", self.config.api_base, project),
            None => format!("{}/emne", self.config.api_base),
        };
        let response = self.transport.get(&path)?;
        let topics = topic_list_from(&response.data);
        self.cache
            .set_snapshot(CacheKey::Topics(project_id), CacheValue::Topics(topics.clone()));
        for scope in self.cached_scopes() {
            if scope.project_id == project_id {
                self.refresh_groups(scope);
            }
        }
        Ok(topics)
    }

    /// Read-through access to a grouped view: returns the cached derivation,
    /// deriving (and caching) it from the backing list first if absent. The
    /// backing list is loaded from the server when it is not cached either.
    pub fn grouped(
        &mut self,
        scope: EntityScope,
        mode: GroupingMode,
    ) -> Result<Vec<Group>, SyncError> {
        let key = CacheKey::Grouped(scope, mode);
        if let Some(CacheValue::Groups(groups)) = self.cache.get_snapshot(&key) {
            return Ok(groups);
        }
        let entities = match self.cache.entities(&CacheKey::Entities(scope)) {
            Some(entities) => entities,
            None => self.load_entities(scope)?,
        };
        let groups = regroup_by_topic(&entities, &self.topics_for(scope.project_id), mode);
        self.cache.set_snapshot(key, CacheValue::Groups(groups.clone()));
        Ok(groups)
    }

    // =========================================================================
    // Optimistic mutations
    // =========================================================================

    /// Creates an entity: a speculative record is inserted into every cached
    /// list in scope before the request, then replaced by the confirmed
    /// server record. On failure the speculative record is removed so that no
    /// partial state remains.
    pub fn create(&mut self, kind: EntityKind, draft: &EntityDraft) -> Result<Entity, SyncError> {
        if draft.title.trim().is_empty() {
            return Err(SyncError::Validation("title must not be empty".into()));
        }

        let marker = Uuid::new_v4();
        let speculative = Entity::speculative(kind, draft, marker);

        let targets: Vec<CacheKey> = self
            .entity_list_keys()
            .into_iter()
            .filter(|(_, scope)| scope.admits(&speculative))
            .map(|(key, _)| key)
            .collect();

        for key in &targets {
            if let Some(mut list) = self.cache.entities(key) {
                list.push(speculative.clone());
                self.cache.set_snapshot(key.clone(), CacheValue::Entities(list));
            }
        }
        self.refresh_groups_for_keys(&targets);

        let path = self.entity_path(kind, draft.project_id, None);
        let body = serde_json::to_value(draft)
            .map_err(|err| SyncError::InvalidResponse(err.to_string()))?;

        let response = match self.transport.post(&path, &body) {
            Ok(response) => response,
            Err(err) => {
                self.remove_speculative(&targets, marker);
                self.refresh_groups_for_keys(&targets);
                return Err(err.into());
            }
        };

        let confirmed = match parse_entity(&response.data, kind) {
            Ok(entity) => entity,
            Err(err) => {
                self.remove_speculative(&targets, marker);
                self.refresh_groups_for_keys(&targets);
                return Err(err);
            }
        };

        let mut replaced = false;
        for key in &targets {
            if let Some(mut list) = self.cache.entities(key) {
                for entry in list.iter_mut() {
                    if entry.pending == Some(marker) {
                        *entry = confirmed.clone();
                        replaced = true;
                    }
                }
                self.cache.set_snapshot(key.clone(), CacheValue::Entities(list));
            }
        }
        if !replaced && !targets.is_empty() {
            warn!(
                kind = %kind,
                id = ?confirmed.id,
                "created entity matched no speculative record"
            );
            return Err(SyncError::ReconciliationConflict {
                kind: kind.logical(),
                id: confirmed.id,
            });
        }

        if let Some(id) = confirmed.id {
            self.bump_revision(kind.logical(), id);
        }
        self.refresh_groups_for_keys(&targets);
        Ok(confirmed)
    }

    /// Updates an entity: the patch is merged into every cached occurrence
    /// before the request; the server response is merged over the
    /// speculative state (server wins) unless a newer local write has
    /// superseded it. On failure every touched list is restored to its exact
    /// prior snapshot.
    pub fn update(
        &mut self,
        kind: EntityKind,
        id: i64,
        patch: &EntityPatch,
    ) -> Result<Entity, SyncError> {
        let logical = kind.logical();
        let probe = probe_entity(kind, id);

        let occurrences: Vec<CacheKey> = self
            .entity_list_keys()
            .into_iter()
            .filter(|(key, _)| self.list_contains(key, &probe))
            .map(|(key, _)| key)
            .collect();

        // Not cached anywhere: nothing to speculate on or roll back.
        let Some(prior) = self.first_match(&occurrences, &probe) else {
            debug!(kind = %kind, id, "updating entity absent from cache");
            let path = self.entity_path(kind, None, Some(id));
            let response = self.transport.put(&path, &patch.to_body())?;
            return parse_entity(&response.data, kind);
        };
        let prior_topic = prior.topic_id;

        // Dependent measures acquire their topic from this entity; if its
        // topic changes they are speculatively retopiced and their backing
        // lists scheduled for an authoritative refresh.
        let topic_change = patch.topic_change(prior_topic);
        let dependent_keys = match topic_change {
            Some(_) => self.dependent_keys(id, prior_topic, &probe),
            None => Vec::new(),
        };

        let mut touched = occurrences.clone();
        for key in &dependent_keys {
            if !touched.contains(key) {
                touched.push(key.clone());
            }
        }
        let snapshots = self.snapshot_lists(&touched);

        for key in &occurrences {
            if let Some(mut list) = self.cache.entities(key) {
                for entry in list.iter_mut() {
                    if same_logical_entity(entry, &probe) {
                        patch.apply_to(entry);
                    }
                }
                self.cache.set_snapshot(key.clone(), CacheValue::Entities(list));
            }
        }
        if let Some(new_topic) = topic_change {
            self.retopic_dependents(&dependent_keys, id, prior_topic, new_topic, &probe);
            if self.config.dependent_refresh {
                for key in &dependent_keys {
                    if !self.scheduled_refresh.contains(key) {
                        self.scheduled_refresh.push(key.clone());
                    }
                }
            }
        }
        let revision = self.bump_revision(logical, id);
        self.refresh_groups_for_keys(&touched);

        let path = self.entity_path(kind, prior.project_id, Some(id));
        let response = match self.transport.put(&path, &patch.to_body()) {
            Ok(response) => response,
            Err(err) => {
                self.restore_lists(snapshots);
                self.refresh_groups_for_keys(&touched);
                return Err(err.into());
            }
        };
        let confirmed = parse_entity(&response.data, kind)?;

        // Staleness guard: a response that no longer matches the latest
        // local revision must not overwrite newer speculative state.
        if self.revision_of(logical, id) != revision {
            debug!(kind = %kind, id, "dropping stale reconciliation");
            return Ok(confirmed);
        }

        let mut matched = false;
        for key in &occurrences {
            if let Some(mut list) = self.cache.entities(key) {
                for entry in list.iter_mut() {
                    if same_logical_entity(entry, &confirmed) {
                        *entry = confirmed.clone();
                        matched = true;
                    }
                }
                self.cache.set_snapshot(key.clone(), CacheValue::Entities(list));
            }
        }
        if !matched {
            warn!(kind = %kind, id, "server response matched no cached entity");
            return Err(SyncError::ReconciliationConflict {
                kind: logical,
                id: confirmed.id,
            });
        }

        self.refresh_groups_for_keys(&touched);
        Ok(confirmed)
    }

    /// Deletes an entity: removed from every cached list before the request;
    /// on failure each list is restored wholesale, which puts the record
    /// back at its original position rather than appending it.
    pub fn remove(&mut self, kind: EntityKind, id: i64) -> Result<(), SyncError> {
        let probe = probe_entity(kind, id);

        let occurrences: Vec<CacheKey> = self
            .entity_list_keys()
            .into_iter()
            .filter(|(key, _)| self.list_contains(key, &probe))
            .map(|(key, _)| key)
            .collect();

        let project_id = self
            .first_match(&occurrences, &probe)
            .and_then(|entity| entity.project_id);
        let snapshots = self.snapshot_lists(&occurrences);

        for key in &occurrences {
            if let Some(mut list) = self.cache.entities(key) {
                list.retain(|entry| !same_logical_entity(entry, &probe));
                self.cache.set_snapshot(key.clone(), CacheValue::Entities(list));
            }
        }
        self.refresh_groups_for_keys(&occurrences);

        let path = self.entity_path(kind, project_id, Some(id));
        if let Err(err) = self.transport.delete(&path) {
            self.restore_lists(snapshots);
            self.refresh_groups_for_keys(&occurrences);
            return Err(err.into());
        }

        self.revisions.lock().unwrap().remove(&(kind.logical(), id));
        Ok(())
    }

    // =========================================================================
    // Revision markers and scheduled refreshes
    // =========================================================================

    /// Records an out-of-band modification of an entity (server push, a
    /// second engine instance). Any in-flight reconciliation for it becomes
    /// stale and will not be merged.
    pub fn mark_externally_modified(&self, kind: EntityKind, id: i64) {
        let mut revisions = self.revisions.lock().unwrap();
        *revisions.entry((kind.logical(), id)).or_insert(0) += 1;
    }

    /// Drains the cache keys whose authoritative refresh was scheduled by a
    /// topic-change side effect. The host performs the refreshes at its
    /// convenience via [`SyncEngine::load_entities`].
    pub fn take_scheduled_refreshes(&mut self) -> Vec<CacheKey> {
        std::mem::take(&mut self.scheduled_refresh)
    }

    #[cfg(test)]
    pub(crate) fn revisions_handle(&self) -> RevisionMap {
        Arc::clone(&self.revisions)
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn bump_revision(&self, logical: LogicalKind, id: i64) -> u64 {
        let mut revisions = self.revisions.lock().unwrap();
        let entry = revisions.entry((logical, id)).or_insert(0);
        *entry += 1;
        *entry
    }

    fn revision_of(&self, logical: LogicalKind, id: i64) -> u64 {
        self.revisions
            .lock()
            .unwrap()
            .get(&(logical, id))
            .copied()
            .unwrap_or(0)
    }

    fn entity_path(&self, kind: EntityKind, project_id: Option<i64>, id: Option<i64>) -> String {
        let mut path = match project_id {
            Some(project) => format!(
                "{}/prosjekt/{}/{}",
                self.config.api_base,
                project,
                kind.endpoint()
            ),
            None => format!("{}/{}", self.config.api_base, kind.endpoint()),
        };
        if let Some(id) = id {
            path.push_str(&format!("/{}", id));
        }
        path
    }

    /// All cached entity-list keys with their scopes.
    fn entity_list_keys(&self) -> Vec<(CacheKey, EntityScope)> {
        self.cache
            .keys()
            .into_iter()
            .filter_map(|key| match key {
                CacheKey::Entities(scope) => Some((key, scope)),
                _ => None,
            })
            .collect()
    }

    fn cached_scopes(&self) -> Vec<EntityScope> {
        self.entity_list_keys()
            .into_iter()
            .map(|(_, scope)| scope)
            .collect()
    }

    fn list_contains(&self, key: &CacheKey, probe: &Entity) -> bool {
        self.cache
            .entities(key)
            .map(|list| list.iter().any(|entry| same_logical_entity(entry, probe)))
            .unwrap_or(false)
    }

    fn first_match(&self, keys: &[CacheKey], probe: &Entity) -> Option<Entity> {
        for key in keys {
            if let Some(list) = self.cache.entities(key) {
                if let Some(entity) = list.iter().find(|entry| same_logical_entity(entry, probe)) {
                    return Some(entity.clone());
                }
            }
        }
        None
    }

    fn snapshot_lists(&self, keys: &[CacheKey]) -> Vec<(CacheKey, Vec<Entity>)> {
        keys.iter()
            .filter_map(|key| self.cache.entities(key).map(|list| (key.clone(), list)))
            .collect()
    }

    fn restore_lists(&self, snapshots: Vec<(CacheKey, Vec<Entity>)>) {
        for (key, list) in snapshots {
            self.cache.set_snapshot(key, CacheValue::Entities(list));
        }
    }

    fn remove_speculative(&self, keys: &[CacheKey], marker: Uuid) {
        for key in keys {
            if let Some(mut list) = self.cache.entities(key) {
                list.retain(|entry| entry.pending != Some(marker));
                self.cache.set_snapshot(key.clone(), CacheValue::Entities(list));
            }
        }
    }

    /// Keys of cached lists holding measures that derive their topic from
    /// entity `id`: they reference it as parent or first linked entity, and
    /// their topic still equals the inherited value (an explicit override
    /// would differ).
    fn dependent_keys(&self, id: i64, prior_topic: Option<i64>, probe: &Entity) -> Vec<CacheKey> {
        self.entity_list_keys()
            .into_iter()
            .filter(|(key, _)| {
                self.cache
                    .entities(key)
                    .map(|list| {
                        list.iter().any(|entry| {
                            is_dependent_measure(entry, id, prior_topic, probe)
                        })
                    })
                    .unwrap_or(false)
            })
            .map(|(key, _)| key)
            .collect()
    }

    fn retopic_dependents(
        &self,
        keys: &[CacheKey],
        id: i64,
        prior_topic: Option<i64>,
        new_topic: Option<i64>,
        probe: &Entity,
    ) {
        for key in keys {
            if let Some(mut list) = self.cache.entities(key) {
                for entry in list.iter_mut() {
                    if is_dependent_measure(entry, id, prior_topic, probe) {
                        entry.topic_id = new_topic;
                    }
                }
                self.cache.set_snapshot(key.clone(), CacheValue::Entities(list));
            }
        }
    }

    /// Re-derives every cached grouped view over `scope` from its backing
    /// list. A view whose backing list is gone is invalidated.
    fn refresh_groups(&self, scope: EntityScope) {
        let topics = self.topics_for(scope.project_id);
        for key in self.cache.keys() {
            let CacheKey::Grouped(view_scope, mode) = key else {
                continue;
            };
            if view_scope != scope {
                continue;
            }
            match self.cache.entities(&CacheKey::Entities(scope)) {
                Some(entities) => {
                    let groups = regroup_by_topic(&entities, &topics, mode);
                    self.cache.set_snapshot(
                        CacheKey::Grouped(view_scope, mode),
                        CacheValue::Groups(groups),
                    );
                }
                None => self.cache.invalidate(&CacheKey::Grouped(view_scope, mode)),
            }
        }
    }

    fn refresh_groups_for_keys(&self, keys: &[CacheKey]) {
        let mut seen: Vec<EntityScope> = Vec::new();
        for key in keys {
            if let CacheKey::Entities(scope) = key {
                if !seen.contains(scope) {
                    seen.push(*scope);
                    self.refresh_groups(*scope);
                }
            }
        }
    }

    fn topics_for(&self, project_id: Option<i64>) -> Vec<Emne> {
        let direct = self
            .cache
            .get_snapshot(&CacheKey::Topics(project_id))
            .and_then(|value| value.as_topics().cloned());
        match direct {
            Some(topics) => topics,
            None => self
                .cache
                .get_snapshot(&CacheKey::Topics(None))
                .and_then(|value| value.as_topics().cloned())
                .unwrap_or_default(),
        }
    }
}

/// Identity probe used with [`same_logical_entity`] so every comparison in
/// the engine goes through the one equivalence function.
fn probe_entity(kind: EntityKind, id: i64) -> Entity {
    Entity {
        id: Some(id),
        kind,
        ..Entity::default()
    }
}

fn is_dependent_measure(
    entry: &Entity,
    source_id: i64,
    inherited_topic: Option<i64>,
    source_probe: &Entity,
) -> bool {
    entry.kind.is_measure()
        && !same_logical_entity(entry, source_probe)
        && entry.references_as_source(source_id)
        && entry.topic_id == inherited_topic
}

/// Parses a single-entity response, normalizing a missing or contradictory
/// wire kind onto the requested one.
fn parse_entity(data: &Value, kind: EntityKind) -> Result<Entity, SyncError> {
    let value = single_value_from(data);
    let mut entity: Entity = serde_json::from_value(value.clone())
        .map_err(|err| SyncError::InvalidResponse(err.to_string()))?;
    if entity.kind.logical() != kind.logical() {
        entity.kind = kind;
    }
    Ok(entity)
}
