use crate::core::{Entity, Error, Result};
use crate::query::RelatedRows;
use im::OrdMap;
use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Persisted rows of one entity set, ordered by key.
///
/// `im::OrdMap` makes snapshots O(1), so queries read a consistent copy
/// without holding the store lock while they run.
#[derive(Debug, Clone)]
pub(crate) struct Table<T: Entity> {
    rows: OrdMap<T::Key, T>,
}

impl<T: Entity> Table<T> {
    pub(crate) fn new() -> Self {
        Self { rows: OrdMap::new() }
    }

    pub(crate) fn rows(&self) -> &OrdMap<T::Key, T> {
        &self.rows
    }

    pub(crate) fn get(&self, key: &T::Key) -> Option<&T> {
        self.rows.get(key)
    }

    pub(crate) fn contains(&self, key: &T::Key) -> bool {
        self.rows.contains_key(key)
    }

    pub(crate) fn upsert(&mut self, entity: T) {
        self.rows.insert(entity.key(), entity);
    }

    pub(crate) fn delete(&mut self, key: &T::Key) -> Option<T> {
        self.rows.remove(key)
    }
}

/// Type-erased table, so one store can hold sets of different entity types.
pub(crate) trait AnyTable: Send + Sync {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
    fn len(&self) -> usize;
    /// All rows as a boxed `Vec<T>`
    fn rows_any(&self) -> Box<dyn Any + Send>;
    fn entity_type(&self) -> &'static str;
}

impl<T: Entity> AnyTable for Table<T> {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn len(&self) -> usize {
        self.rows.len()
    }

    fn rows_any(&self) -> Box<dyn Any + Send> {
        Box::new(self.rows.values().cloned().collect::<Vec<T>>())
    }

    fn entity_type(&self) -> &'static str {
        std::any::type_name::<T>()
    }
}

pub(crate) type Tables = HashMap<String, Box<dyn AnyTable>>;

pub(crate) fn downcast<'a, T: Entity>(tables: &'a Tables, set: &str) -> Result<&'a Table<T>> {
    let table = tables
        .get(set)
        .ok_or_else(|| Error::EntitySetNotFound(set.to_string()))?;
    table
        .as_any()
        .downcast_ref::<Table<T>>()
        .ok_or_else(|| type_mismatch::<T>(set, table.entity_type()))
}

pub(crate) fn downcast_mut<'a, T: Entity>(tables: &'a mut Tables, set: &str) -> Result<&'a mut Table<T>> {
    let table = tables
        .get_mut(set)
        .ok_or_else(|| Error::EntitySetNotFound(set.to_string()))?;
    let entity_type = table.entity_type();
    table
        .as_any_mut()
        .downcast_mut::<Table<T>>()
        .ok_or_else(|| type_mismatch::<T>(set, entity_type))
}

fn type_mismatch<T>(set: &str, actual: &str) -> Error {
    Error::InvalidOperation(format!(
        "entity set '{}' holds {}, not {}",
        set,
        actual,
        std::any::type_name::<T>()
    ))
}

/// Shared in-memory database.
///
/// Cloning yields another handle to the same data; every context built over
/// a store sees the rows the others have saved.
#[derive(Clone, Default)]
pub struct MemoryStore {
    tables: Arc<RwLock<Tables>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the default set of `T`. Idempotent.
    pub fn register<T: Entity>(&self) -> Result<()> {
        self.register_named::<T>(T::NAME)
    }

    /// Register a set named `name` holding `T`.
    pub fn register_named<T: Entity>(&self, name: &str) -> Result<()> {
        let mut tables = self.tables.write()?;
        if tables.contains_key(name) {
            return downcast::<T>(&tables, name).map(|_| ());
        }

        tracing::debug!(set = name, entity = std::any::type_name::<T>(), "registered entity set");
        tables.insert(name.to_string(), Box::new(Table::<T>::new()));
        Ok(())
    }

    /// Write rows straight into the default set of `T`, bypassing any
    /// context. Registers the set if needed; existing keys are overwritten.
    pub fn seed<T: Entity>(&self, entities: impl IntoIterator<Item = T>) -> Result<()> {
        self.register::<T>()?;
        let mut tables = self.tables.write()?;
        let table = downcast_mut::<T>(&mut tables, T::NAME)?;
        for entity in entities {
            table.upsert(entity);
        }
        Ok(())
    }

    pub fn set_names(&self) -> Result<Vec<String>> {
        let tables = self.tables.read()?;
        let mut names: Vec<String> = tables.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    pub fn row_count(&self, set: &str) -> Result<usize> {
        let tables = self.tables.read()?;
        tables
            .get(set)
            .map(|table| table.len())
            .ok_or_else(|| Error::EntitySetNotFound(set.to_string()))
    }

    /// Fail unless `set` is registered and holds `T`.
    pub(crate) fn check_set<T: Entity>(&self, set: &str) -> Result<()> {
        let tables = self.tables.read()?;
        downcast::<T>(&tables, set).map(|_| ())
    }

    /// Point-in-time copy of a set's rows.
    pub(crate) fn snapshot<T: Entity>(&self, set: &str) -> Result<OrdMap<T::Key, T>> {
        let tables = self.tables.read()?;
        Ok(downcast::<T>(&tables, set)?.rows().clone())
    }

    pub(crate) fn get<T: Entity>(&self, set: &str, key: &T::Key) -> Result<Option<T>> {
        let tables = self.tables.read()?;
        Ok(downcast::<T>(&tables, set)?.get(key).cloned())
    }

    /// Run `f` with read access to every table.
    pub(crate) fn read<R>(&self, f: impl FnOnce(&Tables) -> R) -> Result<R> {
        let tables = self.tables.read()?;
        Ok(f(&tables))
    }

    /// Run `f` with write access to every table.
    pub(crate) fn write<R>(&self, f: impl FnOnce(&mut Tables) -> Result<R>) -> Result<R> {
        let mut tables = self.tables.write()?;
        f(&mut tables)
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names = self.set_names().unwrap_or_default();
        f.debug_struct("MemoryStore").field("sets", &names).finish()
    }
}

/// Related rows served from a locked view of the tables.
pub(crate) struct TableView<'a> {
    tables: &'a Tables,
}

impl<'a> TableView<'a> {
    pub(crate) fn new(tables: &'a Tables) -> Self {
        Self { tables }
    }
}

impl RelatedRows for TableView<'_> {
    fn rows(&self, set: &str) -> Option<Box<dyn Any + Send>> {
        self.tables.get(set).map(|table| table.rows_any())
    }
}
