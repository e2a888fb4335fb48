//! Topic inheritance for entity editing sessions.
//!
//! While a requirement or measure is being edited, its topic may be inherited
//! from a connected parent entity or from the first linked sibling entity.
//! Exactly one source can be active at a time; selecting one always clears
//! the other. The resolver owns this state exclusively and never touches the
//! cache; it only supplies the resolved topic value that the caller merges
//! into the draft before submission.

use crate::models::{Entity, EntityKind};

/// Where the topic of the entity under edit comes from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum InheritanceSource {
    /// Explicitly set (or unset) by the user.
    #[default]
    None,
    /// Inherited from the connected parent entity.
    FromParent,
    /// Inherited from the first linked sibling entity.
    FromRelated,
}

/// Form fields whose enabled state depends on the inheritance source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InheritedField {
    ParentSelector,
    RelatedSelector,
    TopicField,
}

/// State machine for one entity-editing session.
///
/// An inherited topic of `None` is still an active inheritance: the sibling
/// selector stays disabled and the `None` value propagates, clearing any
/// previously chosen topic. Callers must not special-case a null topic as
/// "no inheritance".
#[derive(Debug, Clone, Default)]
pub struct TopicInheritance {
    session_entity: Option<i64>,
    source: InheritanceSource,
    source_kind: Option<EntityKind>,
    parent_ref: Option<Entity>,
    related_ref: Option<Entity>,
    inherited_topic_id: Option<i64>,
}

impl TopicInheritance {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts (or restarts) an editing session.
    ///
    /// Switching to a different entity id, or to a fresh create-draft
    /// (`None`), hard-resets all state; re-entering the session of the same
    /// entity keeps it. Stale inheritance must never leak across entities.
    pub fn begin_session(&mut self, entity_id: Option<i64>) {
        match entity_id {
            Some(id) if self.session_entity == Some(id) => {}
            _ => {
                *self = Self::default();
                self.session_entity = entity_id;
            }
        }
    }

    /// Handles a parent-selection event.
    ///
    /// A non-null parent activates parent inheritance (its topic propagates,
    /// even when null) and clears any related-entity connection. A null
    /// parent clears the parent connection, reverting to no inheritance if
    /// the parent was the active source.
    pub fn select_parent(&mut self, parent: Option<&Entity>) {
        match parent {
            Some(parent) => {
                self.source = InheritanceSource::FromParent;
                self.source_kind = Some(parent.kind);
                self.inherited_topic_id = parent.topic_id;
                self.parent_ref = Some(parent.clone());
                self.related_ref = None;
            }
            None => {
                self.parent_ref = None;
                if self.source == InheritanceSource::FromParent {
                    self.source = InheritanceSource::None;
                    self.source_kind = None;
                    self.inherited_topic_id = None;
                }
            }
        }
    }

    /// Handles a related-entity selection event.
    ///
    /// The first id in `selected` is resolved through `resolve`; when found,
    /// related inheritance activates (topic propagates, even when null) and
    /// the parent connection is cleared. An empty selection clears the
    /// related connection, reverting to no inheritance if it was the active
    /// source. A first id the lookup cannot resolve leaves state untouched.
    pub fn select_related<F>(&mut self, selected: &[i64], resolve: F)
    where
        F: Fn(i64) -> Option<Entity>,
    {
        match selected.first() {
            Some(first) => {
                if let Some(related) = resolve(*first) {
                    self.source = InheritanceSource::FromRelated;
                    self.source_kind = Some(related.kind);
                    self.inherited_topic_id = related.topic_id;
                    self.related_ref = Some(related);
                    self.parent_ref = None;
                }
            }
            None => {
                self.related_ref = None;
                if self.source == InheritanceSource::FromRelated {
                    self.source = InheritanceSource::None;
                    self.source_kind = None;
                    self.inherited_topic_id = None;
                }
            }
        }
    }

    pub fn source(&self) -> InheritanceSource {
        self.source
    }

    pub fn source_kind(&self) -> Option<EntityKind> {
        self.source_kind
    }

    pub fn parent_ref(&self) -> Option<&Entity> {
        self.parent_ref.as_ref()
    }

    pub fn related_ref(&self) -> Option<&Entity> {
        self.related_ref.as_ref()
    }

    /// `Some(topic)` while inheritance is active; the inner value may be
    /// `None` and still overrides an explicit choice. `None` when no source
    /// is active.
    pub fn inherited_topic(&self) -> Option<Option<i64>> {
        match self.source {
            InheritanceSource::None => None,
            _ => Some(self.inherited_topic_id),
        }
    }

    /// Folds the inherited topic over an explicitly chosen one; the single
    /// merge point callers use when building a draft for submission.
    pub fn resolved_topic(&self, explicit: Option<i64>) -> Option<i64> {
        match self.inherited_topic() {
            Some(inherited) => inherited,
            None => explicit,
        }
    }

    /// Pure derivation of field disablement from the current source.
    pub fn is_field_disabled(&self, field: InheritedField) -> bool {
        match field {
            InheritedField::ParentSelector => self.source == InheritanceSource::FromRelated,
            InheritedField::RelatedSelector => self.source == InheritanceSource::FromParent,
            InheritedField::TopicField => self.source != InheritanceSource::None,
        }
    }

    /// Why a field is disabled, for the form layer to surface.
    pub fn disabled_reason(&self, field: InheritedField) -> Option<&'static str> {
        if !self.is_field_disabled(field) {
            return None;
        }
        match (field, self.source) {
            (InheritedField::ParentSelector, _) => {
                Some("Parent connection is locked while the topic is inherited from a linked entity")
            }
            (InheritedField::RelatedSelector, _) => {
                Some("Linked entities are locked while the topic is inherited from the parent")
            }
            (InheritedField::TopicField, InheritanceSource::FromParent) => {
                Some("Topic is inherited from the parent entity")
            }
            (InheritedField::TopicField, _) => Some("Topic is inherited from a linked entity"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entity(kind: EntityKind, id: i64, topic_id: Option<i64>) -> Entity {
        Entity {
            id: Some(id),
            kind,
            topic_id,
            title: format!("entity {}", id),
            ..Entity::default()
        }
    }

    fn lookup(entities: Vec<Entity>) -> impl Fn(i64) -> Option<Entity> {
        move |id| entities.iter().find(|e| e.id == Some(id)).cloned()
    }

    #[test]
    fn test_parent_then_related_yields_related() {
        let parent = entity(EntityKind::Krav, 1, Some(4));
        let related = entity(EntityKind::ProsjektKrav, 2, Some(8));

        let mut state = TopicInheritance::new();
        state.select_parent(Some(&parent));
        state.select_related(&[2], lookup(vec![related]));

        assert_eq!(state.source(), InheritanceSource::FromRelated);
        assert!(state.parent_ref().is_none());
        assert_eq!(state.inherited_topic(), Some(Some(8)));
    }

    #[test]
    fn test_related_then_parent_yields_parent() {
        let parent = entity(EntityKind::Krav, 1, Some(4));
        let related = entity(EntityKind::ProsjektKrav, 2, Some(8));

        let mut state = TopicInheritance::new();
        state.select_related(&[2], lookup(vec![related]));
        state.select_parent(Some(&parent));

        assert_eq!(state.source(), InheritanceSource::FromParent);
        assert!(state.related_ref().is_none());
        assert_eq!(state.inherited_topic(), Some(Some(4)));
    }

    #[test]
    fn test_null_topic_parent_still_activates_inheritance() {
        let parent = entity(EntityKind::Krav, 1, None);

        let mut state = TopicInheritance::new();
        state.select_parent(Some(&parent));

        assert_eq!(state.source(), InheritanceSource::FromParent);
        // Inheritance is active with a null value, which still overrides an
        // explicit topic choice.
        assert_eq!(state.inherited_topic(), Some(None));
        assert_eq!(state.resolved_topic(Some(12)), None);
        assert!(state.is_field_disabled(InheritedField::RelatedSelector));
        assert!(state.is_field_disabled(InheritedField::TopicField));
    }

    #[test]
    fn test_clearing_parent_reverts_to_none() {
        let parent = entity(EntityKind::Krav, 1, Some(4));

        let mut state = TopicInheritance::new();
        state.select_parent(Some(&parent));
        state.select_parent(None);

        assert_eq!(state.source(), InheritanceSource::None);
        assert_eq!(state.inherited_topic(), None);
        assert_eq!(state.resolved_topic(Some(12)), Some(12));
    }

    #[test]
    fn test_clearing_parent_keeps_related_inheritance() {
        let related = entity(EntityKind::Krav, 2, Some(8));

        let mut state = TopicInheritance::new();
        state.select_related(&[2], lookup(vec![related]));
        state.select_parent(None);

        assert_eq!(state.source(), InheritanceSource::FromRelated);
        assert_eq!(state.inherited_topic(), Some(Some(8)));
    }

    #[test]
    fn test_empty_related_selection_reverts() {
        let related = entity(EntityKind::Krav, 2, Some(8));

        let mut state = TopicInheritance::new();
        state.select_related(&[2], lookup(vec![related.clone()]));
        state.select_related(&[], lookup(vec![related]));

        assert_eq!(state.source(), InheritanceSource::None);
        assert_eq!(state.inherited_topic(), None);
    }

    #[test]
    fn test_unresolvable_related_id_is_ignored() {
        let mut state = TopicInheritance::new();
        state.select_related(&[99], lookup(vec![]));
        assert_eq!(state.source(), InheritanceSource::None);
    }

    #[test]
    fn test_field_disablement_matrix() {
        let parent = entity(EntityKind::Krav, 1, Some(4));
        let related = entity(EntityKind::Krav, 2, Some(8));

        let mut state = TopicInheritance::new();
        assert!(!state.is_field_disabled(InheritedField::ParentSelector));
        assert!(!state.is_field_disabled(InheritedField::RelatedSelector));
        assert!(!state.is_field_disabled(InheritedField::TopicField));
        assert_eq!(state.disabled_reason(InheritedField::TopicField), None);

        state.select_parent(Some(&parent));
        assert!(!state.is_field_disabled(InheritedField::ParentSelector));
        assert!(state.is_field_disabled(InheritedField::RelatedSelector));
        assert!(state.is_field_disabled(InheritedField::TopicField));

        state.select_related(&[2], lookup(vec![related]));
        assert!(state.is_field_disabled(InheritedField::ParentSelector));
        assert!(!state.is_field_disabled(InheritedField::RelatedSelector));
        assert!(state.is_field_disabled(InheritedField::TopicField));
        assert!(state.disabled_reason(InheritedField::ParentSelector).is_some());
    }

    #[test]
    fn test_session_switch_resets_state() {
        let parent = entity(EntityKind::Krav, 1, Some(4));

        let mut state = TopicInheritance::new();
        state.begin_session(Some(10));
        state.select_parent(Some(&parent));

        // Re-entering the same entity keeps the state.
        state.begin_session(Some(10));
        assert_eq!(state.source(), InheritanceSource::FromParent);

        // A different entity resets it.
        state.begin_session(Some(11));
        assert_eq!(state.source(), InheritanceSource::None);
        assert!(state.parent_ref().is_none());

        // A fresh create-draft always resets.
        state.select_parent(Some(&parent));
        state.begin_session(None);
        assert_eq!(state.source(), InheritanceSource::None);
    }
}
