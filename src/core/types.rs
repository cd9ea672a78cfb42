use std::fmt;
use std::hash::Hash;
use uuid::Uuid;

/// A persisted entity type.
///
/// Entities are plain data holders: the key identifies a row inside the set
/// named by [`Entity::NAME`]. Use `#[derive(Entity)]` to implement it.
pub trait Entity: Clone + fmt::Debug + Send + Sync + 'static {
    type Key: Clone + Ord + Hash + fmt::Debug + Send + Sync + 'static;

    /// Default entity set name
    const NAME: &'static str;

    fn key(&self) -> Self::Key;
}

/// Tracking state of an entity inside a context's change tracker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityState {
    Detached,
    Unchanged,
    Added,
    Modified,
    Deleted,
}

impl EntityState {
    /// Whether saving would write this entry to the store.
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Added | Self::Modified | Self::Deleted)
    }
}

impl fmt::Display for EntityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Detached => "Detached",
            Self::Unchanged => "Unchanged",
            Self::Added => "Added",
            Self::Modified => "Modified",
            Self::Deleted => "Deleted",
        };
        f.write_str(name)
    }
}

/// Snapshot of a tracked entity and its state
#[derive(Debug, Clone, PartialEq)]
pub struct EntityEntry<T> {
    entity: T,
    state: EntityState,
}

impl<T: Entity> EntityEntry<T> {
    pub fn new(entity: T, state: EntityState) -> Self {
        Self { entity, state }
    }

    pub fn entity(&self) -> &T {
        &self.entity
    }

    pub fn into_entity(self) -> T {
        self.entity
    }

    pub fn state(&self) -> EntityState {
        self.state
    }

    pub fn key(&self) -> T::Key {
        self.entity.key()
    }
}

/// Identifies one context instance in logs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextId(Uuid);

impl ContextId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for ContextId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Note {
        id: u32,
    }

    impl Entity for Note {
        type Key = u32;
        const NAME: &'static str = "Note";

        fn key(&self) -> u32 {
            self.id
        }
    }

    #[test]
    fn test_pending_states() {
        assert!(EntityState::Added.is_pending());
        assert!(EntityState::Modified.is_pending());
        assert!(EntityState::Deleted.is_pending());
        assert!(!EntityState::Unchanged.is_pending());
        assert!(!EntityState::Detached.is_pending());
    }

    #[test]
    fn test_entry_exposes_key_and_state() {
        let entry = EntityEntry::new(Note { id: 7 }, EntityState::Added);
        assert_eq!(entry.key(), 7);
        assert_eq!(entry.state(), EntityState::Added);
        assert_eq!(entry.into_entity(), Note { id: 7 });
    }

    #[test]
    fn test_context_ids_are_unique() {
        assert_ne!(ContextId::new(), ContextId::new());
    }
}
