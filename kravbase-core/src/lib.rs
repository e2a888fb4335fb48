pub mod cache;
pub mod config;
pub mod grouping;
pub mod inheritance;
pub mod models;
pub mod sync;
pub mod transport;

// Re-export commonly used types
pub use cache::{
    CacheEvent, CacheKey, CacheValue, EntityScope, ScopeKind, SharedCache, SubscriptionId,
};
pub use config::EngineConfig;
pub use grouping::{regroup_by_topic, GroupingMode};
pub use inheritance::{InheritanceSource, InheritedField, TopicInheritance};
pub use models::{
    same_logical_entity, Emne, Entity, EntityDraft, EntityKind, EntityPatch, Group, LogicalKind,
};
pub use sync::{BatchCopyOutcome, BatchCopyRequest, SyncEngine, SyncError};
pub use transport::{ApiResponse, Method, Transport, TransportError};
