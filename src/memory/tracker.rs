// ============================================================================
// Change Tracking
// ============================================================================
//
// Every entity a context has seen (queried, found, added, attached) is kept
// here with its state until the context saves or is disposed. Saving turns
// pending entries into writes against the store:
//
//   Added    -> insert (key must not exist)
//   Modified -> overwrite (key must exist)
//   Deleted  -> remove (key must exist)
//
// Validation runs over every set before anything is written, so a failed
// save leaves both the store and the tracker untouched.
//
// ============================================================================

use super::store::{Table, Tables, downcast_mut};
use crate::core::{Entity, EntityEntry, EntityState, Error, Result};
use std::any::Any;
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone)]
struct Tracked<T> {
    entity: T,
    state: EntityState,
}

/// Tracked entries of one entity set
#[derive(Debug)]
pub(crate) struct TrackedSet<T: Entity> {
    set: String,
    entries: BTreeMap<T::Key, Tracked<T>>,
}

impl<T: Entity> TrackedSet<T> {
    fn new(set: &str) -> Self {
        Self {
            set: set.to_string(),
            entries: BTreeMap::new(),
        }
    }

    fn already_tracked(&self, key: &T::Key) -> Error {
        Error::InvalidOperation(format!(
            "another instance of '{}' with key {:?} is already being tracked",
            self.set, key
        ))
    }

    pub(crate) fn add(&mut self, entity: T) -> Result<EntityEntry<T>> {
        let key = entity.key();
        let state = match self.entries.get(&key).map(|tracked| tracked.state) {
            None => EntityState::Added,
            // Re-adding a row that is pending deletion keeps the row
            Some(EntityState::Deleted) => EntityState::Modified,
            Some(_) => return Err(self.already_tracked(&key)),
        };
        Ok(self.put(key, entity, state))
    }

    pub(crate) fn attach(&mut self, entity: T) -> Result<EntityEntry<T>> {
        let key = entity.key();
        if self.entries.contains_key(&key) {
            return Err(self.already_tracked(&key));
        }
        Ok(self.put(key, entity, EntityState::Unchanged))
    }

    pub(crate) fn update(&mut self, entity: T) -> EntityEntry<T> {
        let key = entity.key();
        let state = match self.entries.get(&key).map(|tracked| tracked.state) {
            Some(EntityState::Added) => EntityState::Added,
            _ => EntityState::Modified,
        };
        self.put(key, entity, state)
    }

    pub(crate) fn remove(&mut self, entity: T) -> EntityEntry<T> {
        let key = entity.key();
        match self.entries.get(&key).map(|tracked| tracked.state) {
            Some(EntityState::Added) => {
                self.entries.remove(&key);
                EntityEntry::new(entity, EntityState::Detached)
            }
            _ => self.put(key, entity, EntityState::Deleted),
        }
    }

    pub(crate) fn entry(&self, entity: &T) -> EntityEntry<T> {
        match self.entries.get(&entity.key()) {
            Some(tracked) => EntityEntry::new(tracked.entity.clone(), tracked.state),
            None => EntityEntry::new(entity.clone(), EntityState::Detached),
        }
    }

    /// Tracked instance for `key`, including entries pending deletion.
    pub(crate) fn get(&self, key: &T::Key) -> Option<(&T, EntityState)> {
        self.entries.get(key).map(|tracked| (&tracked.entity, tracked.state))
    }

    /// Identity resolution: the tracked instance if there is one, otherwise
    /// `entity` becomes tracked as `Unchanged`.
    pub(crate) fn resolve(&mut self, entity: T) -> T {
        let key = entity.key();
        self.entries
            .entry(key)
            .or_insert(Tracked {
                entity,
                state: EntityState::Unchanged,
            })
            .entity
            .clone()
    }

    pub(crate) fn local(&self) -> Vec<T> {
        self.entries
            .values()
            .filter(|tracked| tracked.state != EntityState::Deleted)
            .map(|tracked| tracked.entity.clone())
            .collect()
    }

    fn put(&mut self, key: T::Key, entity: T, state: EntityState) -> EntityEntry<T> {
        self.entries.insert(
            key,
            Tracked {
                entity: entity.clone(),
                state,
            },
        );
        EntityEntry::new(entity, state)
    }
}

/// Type-erased tracked set
pub(crate) trait AnyTrackedSet: Send + Sync {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
    fn pending(&self) -> usize;
    fn validate(&self, tables: &Tables) -> Result<()>;
    fn apply(&self, tables: &mut Tables) -> Result<usize>;
    fn accept(&mut self);
}

impl<T: Entity> AnyTrackedSet for TrackedSet<T> {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn pending(&self) -> usize {
        self.entries.values().filter(|tracked| tracked.state.is_pending()).count()
    }

    fn validate(&self, tables: &Tables) -> Result<()> {
        if self.pending() == 0 {
            return Ok(());
        }
        let table = match tables.get(&self.set) {
            Some(table) => table
                .as_any()
                .downcast_ref::<Table<T>>()
                .ok_or_else(|| Error::InvalidOperation(format!("entity set '{}' changed type", self.set)))?,
            None => return Err(Error::EntitySetNotFound(self.set.clone())),
        };

        for (key, tracked) in &self.entries {
            match tracked.state {
                EntityState::Added if table.contains(key) => {
                    return Err(Error::DuplicateKey {
                        entity: self.set.clone(),
                        key: format!("{:?}", key),
                    });
                }
                EntityState::Modified | EntityState::Deleted if !table.contains(key) => {
                    return Err(Error::StaleEntity {
                        entity: self.set.clone(),
                        key: format!("{:?}", key),
                    });
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn apply(&self, tables: &mut Tables) -> Result<usize> {
        let table = downcast_mut::<T>(tables, &self.set)?;
        let mut written = 0;
        for (key, tracked) in &self.entries {
            match tracked.state {
                EntityState::Added | EntityState::Modified => table.upsert(tracked.entity.clone()),
                EntityState::Deleted => {
                    table.delete(key);
                }
                EntityState::Unchanged | EntityState::Detached => continue,
            }
            written += 1;
        }
        Ok(written)
    }

    fn accept(&mut self) {
        self.entries.retain(|_, tracked| tracked.state != EntityState::Deleted);
        for tracked in self.entries.values_mut() {
            tracked.state = EntityState::Unchanged;
        }
    }
}

/// All tracked entries of a context, keyed by set name
#[derive(Default)]
pub(crate) struct ChangeTracker {
    sets: HashMap<String, Box<dyn AnyTrackedSet>>,
}

impl ChangeTracker {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn set<T: Entity>(&self, name: &str) -> Option<&TrackedSet<T>> {
        self.sets
            .get(name)
            .and_then(|set| set.as_any().downcast_ref::<TrackedSet<T>>())
    }

    pub(crate) fn set_mut<T: Entity>(&mut self, name: &str) -> Result<&mut TrackedSet<T>> {
        self.sets
            .entry(name.to_string())
            .or_insert_with(|| Box::new(TrackedSet::<T>::new(name)))
            .as_any_mut()
            .downcast_mut::<TrackedSet<T>>()
            .ok_or_else(|| Error::InvalidOperation(format!("entity set '{}' is tracked with another type", name)))
    }

    pub(crate) fn pending(&self) -> usize {
        self.sets.values().map(|set| set.pending()).sum()
    }

    /// Validate every pending entry, then write them all.
    pub(crate) fn save(&mut self, tables: &mut Tables, accept_all_changes: bool) -> Result<usize> {
        for set in self.sets.values() {
            set.validate(tables)?;
        }

        let mut written = 0;
        for set in self.sets.values() {
            written += set.apply(tables)?;
        }

        if accept_all_changes {
            self.accept_all();
        }
        Ok(written)
    }

    pub(crate) fn accept_all(&mut self) {
        for set in self.sets.values_mut() {
            set.accept();
        }
    }

    pub(crate) fn clear(&mut self) {
        self.sets.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::store::AnyTable;

    #[derive(Debug, Clone, PartialEq)]
    struct Note {
        id: u32,
        text: String,
    }

    impl Entity for Note {
        type Key = u32;
        const NAME: &'static str = "Note";

        fn key(&self) -> u32 {
            self.id
        }
    }

    fn note(id: u32, text: &str) -> Note {
        Note {
            id,
            text: text.to_string(),
        }
    }

    fn tables_with(rows: Vec<Note>) -> Tables {
        let mut table = Table::<Note>::new();
        for row in rows {
            table.upsert(row);
        }
        let mut tables: Tables = HashMap::new();
        tables.insert("Note".to_string(), Box::new(table) as Box<dyn AnyTable>);
        tables
    }

    fn row_count(tables: &Tables) -> usize {
        tables.get("Note").map(|table| table.len()).unwrap_or(0)
    }

    #[test]
    fn test_state_transitions() {
        let mut set = TrackedSet::<Note>::new("Note");

        assert_eq!(set.add(note(1, "a")).unwrap().state(), EntityState::Added);
        assert_eq!(set.update(note(1, "b")).state(), EntityState::Added);
        assert_eq!(set.remove(note(1, "b")).state(), EntityState::Detached);
        assert!(set.get(&1).is_none());

        assert_eq!(set.attach(note(2, "x")).unwrap().state(), EntityState::Unchanged);
        assert_eq!(set.update(note(2, "y")).state(), EntityState::Modified);
        assert_eq!(set.remove(note(2, "y")).state(), EntityState::Deleted);
        assert_eq!(set.add(note(2, "z")).unwrap().state(), EntityState::Modified);
    }

    #[test]
    fn test_double_add_is_rejected() {
        let mut set = TrackedSet::<Note>::new("Note");
        set.add(note(1, "a")).unwrap();

        assert!(matches!(set.add(note(1, "b")), Err(Error::InvalidOperation(_))));
        assert!(matches!(set.attach(note(1, "c")), Err(Error::InvalidOperation(_))));
    }

    #[test]
    fn test_resolve_returns_tracked_instance() {
        let mut set = TrackedSet::<Note>::new("Note");
        set.update(note(1, "edited"));

        assert_eq!(set.resolve(note(1, "stored")).text, "edited");
        assert_eq!(set.resolve(note(2, "fresh")).text, "fresh");
        assert_eq!(set.entry(&note(2, "")).state(), EntityState::Unchanged);
    }

    #[test]
    fn test_local_skips_deleted() {
        let mut set = TrackedSet::<Note>::new("Note");
        set.attach(note(1, "a")).unwrap();
        set.attach(note(2, "b")).unwrap();
        set.remove(note(2, "b"));

        assert_eq!(set.local(), vec![note(1, "a")]);
    }

    #[test]
    fn test_save_applies_and_accepts() {
        let mut tables = tables_with(vec![note(1, "old"), note(2, "gone")]);
        let mut tracker = ChangeTracker::new();
        {
            let set = tracker.set_mut::<Note>("Note").unwrap();
            set.add(note(3, "new")).unwrap();
            set.update(note(1, "changed"));
            set.remove(note(2, "gone"));
        }

        assert_eq!(tracker.pending(), 3);
        assert_eq!(tracker.save(&mut tables, true).unwrap(), 3);
        assert_eq!(tracker.pending(), 0);
        assert_eq!(row_count(&tables), 2);
        assert!(tracker.set::<Note>("Note").unwrap().get(&2).is_none());
    }

    #[test]
    fn test_save_without_accept_keeps_pending() {
        let mut tables = tables_with(vec![]);
        let mut tracker = ChangeTracker::new();
        tracker.set_mut::<Note>("Note").unwrap().add(note(1, "a")).unwrap();

        assert_eq!(tracker.save(&mut tables, false).unwrap(), 1);
        assert_eq!(tracker.pending(), 1);

        tracker.accept_all();
        assert_eq!(tracker.pending(), 0);
    }

    #[test]
    fn test_failed_save_writes_nothing() {
        let mut tables = tables_with(vec![note(1, "exists")]);
        let mut tracker = ChangeTracker::new();
        {
            let set = tracker.set_mut::<Note>("Note").unwrap();
            set.add(note(5, "fine")).unwrap();
            set.add(note(1, "duplicate")).unwrap();
        }

        let err = tracker.save(&mut tables, true).unwrap_err();
        assert!(matches!(err, Error::DuplicateKey { .. }));
        assert_eq!(row_count(&tables), 1);
        assert_eq!(tracker.pending(), 2);
    }

    #[test]
    fn test_stale_update_is_reported() {
        let mut tables = tables_with(vec![]);
        let mut tracker = ChangeTracker::new();
        tracker.set_mut::<Note>("Note").unwrap().update(note(9, "ghost"));

        assert!(matches!(
            tracker.save(&mut tables, true),
            Err(Error::StaleEntity { .. })
        ));
    }
}
