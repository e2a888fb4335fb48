use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use uuid::Uuid;

/// Distinguishes the four entity variants served by the backend.
///
/// Requirements ("krav") and measures ("tiltak") each exist in a global and a
/// project-scoped variant. A global record and its project-scoped counterpart
/// with the same numeric id are the same logical entity; see
/// [`same_logical_entity`].
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum EntityKind {
    #[default]
    Krav,
    ProsjektKrav,
    Tiltak,
    ProsjektTiltak,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKind::Krav => write!(f, "krav"),
            EntityKind::ProsjektKrav => write!(f, "prosjektKrav"),
            EntityKind::Tiltak => write!(f, "tiltak"),
            EntityKind::ProsjektTiltak => write!(f, "prosjektTiltak"),
        }
    }
}

impl EntityKind {
    /// Collapses the project-scoped variants onto their conceptual kind.
    pub fn logical(self) -> LogicalKind {
        match self {
            EntityKind::Krav | EntityKind::ProsjektKrav => LogicalKind::Requirement,
            EntityKind::Tiltak | EntityKind::ProsjektTiltak => LogicalKind::Measure,
        }
    }

    pub fn is_requirement(self) -> bool {
        self.logical() == LogicalKind::Requirement
    }

    pub fn is_measure(self) -> bool {
        self.logical() == LogicalKind::Measure
    }

    /// Path segment used when addressing this kind on the server.
    pub fn endpoint(self) -> &'static str {
        match self {
            EntityKind::Krav => "krav",
            EntityKind::ProsjektKrav => "prosjektKrav",
            EntityKind::Tiltak => "tiltak",
            EntityKind::ProsjektTiltak => "prosjektTiltak",
        }
    }
}

/// The conceptual kind of an entity, with project scoping erased.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum LogicalKind {
    Requirement,
    Measure,
}

impl fmt::Display for LogicalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogicalKind::Requirement => write!(f, "requirement"),
            LogicalKind::Measure => write!(f, "measure"),
        }
    }
}

/// A requirement or measure record as cached on the client.
///
/// `id` is `None` for speculative create records that the server has not
/// confirmed yet, and for malformed wire records; such entities sort last and
/// never participate in identity matching. `pending` carries the local
/// correlation marker of an in-flight create and is never serialized.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct Entity {
    pub id: Option<i64>,
    #[serde(rename = "entityType")]
    pub kind: EntityKind,
    pub topic_id: Option<i64>,
    pub parent_id: Option<i64>,
    pub project_id: Option<i64>,
    pub title: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub linked_entity_ids: Vec<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sort_key: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(skip)]
    pub pending: Option<Uuid>,
}

impl Entity {
    /// Builds the speculative record for an unconfirmed create.
    pub fn speculative(kind: EntityKind, draft: &EntityDraft, marker: Uuid) -> Self {
        Self {
            id: None,
            kind,
            topic_id: draft.topic_id,
            parent_id: draft.parent_id,
            project_id: draft.project_id,
            title: draft.title.clone(),
            linked_entity_ids: draft.linked_entity_ids.clone(),
            sort_key: None,
            uid: None,
            created_at: None,
            updated_at: None,
            pending: Some(marker),
        }
    }

    /// True when this record references `id` as its inheritance source: either
    /// as its parent or as the first of its linked entities.
    pub fn references_as_source(&self, id: i64) -> bool {
        self.parent_id == Some(id) || self.linked_entity_ids.first() == Some(&id)
    }
}

/// Returns true when `a` and `b` denote the same logical entity: matching ids
/// and kinds that are identical or the global/project-scoped pair of the same
/// conceptual kind.
pub fn same_logical_entity(a: &Entity, b: &Entity) -> bool {
    match (a.id, b.id) {
        (Some(x), Some(y)) => x == y && a.kind.logical() == b.kind.logical(),
        _ => false,
    }
}

/// A classification topic ("emne") used to group requirements and measures.
///
/// A `sort_order` of zero is treated the same as an absent one: unordered,
/// sorting after every topic with a defined positive order.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct Emne {
    pub id: i64,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sort_order: Option<i64>,
}

impl Emne {
    /// Placeholder for a topic id that appears on entities but is missing
    /// from the loaded topic list.
    pub fn unresolved(id: i64) -> Self {
        Self {
            id,
            title: String::new(),
            sort_order: None,
        }
    }

    /// True when the topic carries a defined positive sort order.
    pub fn is_ordered(&self) -> bool {
        matches!(self.sort_order, Some(n) if n > 0)
    }
}

/// Display label of the synthetic group for entities without a topic.
pub const NO_TOPIC_TITLE: &str = "No Topic";

/// A derived view group: one topic (or the "No Topic" placeholder) and its
/// ordered members. Never persisted.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Group {
    pub topic: Option<Emne>,
    pub members: Vec<Entity>,
}

impl Group {
    pub fn title(&self) -> &str {
        match &self.topic {
            Some(t) => &t.title,
            None => NO_TOPIC_TITLE,
        }
    }
}

/// Payload for creating a new entity.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityDraft {
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub topic_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<i64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub linked_entity_ids: Vec<i64>,
}

/// Partial update for an existing entity.
///
/// The two-level options distinguish "clear the field" (`Some(None)`,
/// serialized as an explicit null) from "leave untouched" (`None`, key
/// absent).
#[derive(Debug, Clone, Default)]
pub struct EntityPatch {
    pub title: Option<String>,
    pub topic_id: Option<Option<i64>>,
    pub parent_id: Option<Option<i64>>,
    pub linked_entity_ids: Option<Vec<i64>>,
    pub sort_key: Option<i64>,
}

impl EntityPatch {
    /// Merges the patch into a cached entity in place.
    pub fn apply_to(&self, entity: &mut Entity) {
        if let Some(title) = &self.title {
            entity.title = title.clone();
        }
        if let Some(topic_id) = self.topic_id {
            entity.topic_id = topic_id;
        }
        if let Some(parent_id) = self.parent_id {
            entity.parent_id = parent_id;
        }
        if let Some(linked) = &self.linked_entity_ids {
            entity.linked_entity_ids = linked.clone();
        }
        if let Some(sort_key) = self.sort_key {
            entity.sort_key = Some(sort_key);
        }
    }

    /// The JSON body sent to the server: touched fields only, cleared fields
    /// as explicit nulls.
    pub fn to_body(&self) -> Value {
        let mut body = Map::new();
        if let Some(title) = &self.title {
            body.insert("title".into(), Value::from(title.clone()));
        }
        if let Some(topic_id) = self.topic_id {
            body.insert("topicId".into(), Value::from(topic_id));
        }
        if let Some(parent_id) = self.parent_id {
            body.insert("parentId".into(), Value::from(parent_id));
        }
        if let Some(linked) = &self.linked_entity_ids {
            body.insert("linkedEntityIds".into(), Value::from(linked.clone()));
        }
        if let Some(sort_key) = self.sort_key {
            body.insert("sortKey".into(), Value::from(sort_key));
        }
        Value::Object(body)
    }

    /// The topic this patch would establish, given the entity's prior topic.
    /// `None` means the patch leaves the topic untouched.
    pub fn topic_change(&self, prior: Option<i64>) -> Option<Option<i64>> {
        match self.topic_id {
            Some(new) if new != prior => Some(new),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entity(kind: EntityKind, id: i64) -> Entity {
        Entity {
            id: Some(id),
            kind,
            ..Entity::default()
        }
    }

    #[test]
    fn test_same_logical_entity_across_project_scope() {
        let krav = entity(EntityKind::Krav, 7);
        let prosjekt_krav = entity(EntityKind::ProsjektKrav, 7);
        let tiltak = entity(EntityKind::Tiltak, 7);

        assert!(same_logical_entity(&krav, &prosjekt_krav));
        assert!(same_logical_entity(&krav, &krav));
        assert!(!same_logical_entity(&krav, &tiltak));
    }

    #[test]
    fn test_same_logical_entity_requires_ids() {
        let mut a = entity(EntityKind::Krav, 7);
        let b = entity(EntityKind::Krav, 7);
        a.id = None;

        assert!(!same_logical_entity(&a, &b));
        assert!(!same_logical_entity(&a, &a));
    }

    #[test]
    fn test_entity_wire_parsing_is_tolerant() {
        // Missing id and unknown fields must not fail the parse.
        let value = serde_json::json!({
            "entityType": "prosjektTiltak",
            "title": "Install fire door",
            "topicId": 4,
            "somethingUnknown": true,
        });
        let entity: Entity = serde_json::from_value(value).unwrap();
        assert_eq!(entity.id, None);
        assert_eq!(entity.kind, EntityKind::ProsjektTiltak);
        assert_eq!(entity.topic_id, Some(4));
        assert!(entity.pending.is_none());
    }

    #[test]
    fn test_patch_body_distinguishes_clear_from_untouched() {
        let patch = EntityPatch {
            topic_id: Some(None),
            ..EntityPatch::default()
        };
        let body = patch.to_body();
        assert!(body.get("topicId").unwrap().is_null());
        assert!(body.get("parentId").is_none());
    }

    #[test]
    fn test_patch_apply_clears_topic() {
        let mut entity = entity(EntityKind::Tiltak, 3);
        entity.topic_id = Some(9);

        let patch = EntityPatch {
            topic_id: Some(None),
            ..EntityPatch::default()
        };
        patch.apply_to(&mut entity);
        assert_eq!(entity.topic_id, None);
    }

    #[test]
    fn test_topic_change_detection() {
        let patch = EntityPatch {
            topic_id: Some(Some(5)),
            ..EntityPatch::default()
        };
        assert_eq!(patch.topic_change(Some(4)), Some(Some(5)));
        assert_eq!(patch.topic_change(Some(5)), None);

        let untouched = EntityPatch::default();
        assert_eq!(untouched.topic_change(Some(4)), None);
    }

    #[test]
    fn test_references_as_source() {
        let mut measure = entity(EntityKind::Tiltak, 10);
        measure.parent_id = Some(1);
        measure.linked_entity_ids = vec![2, 3];

        assert!(measure.references_as_source(1));
        assert!(measure.references_as_source(2));
        // Only the first linked entity is an inheritance source.
        assert!(!measure.references_as_source(3));
    }
}
