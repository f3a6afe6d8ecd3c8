use std::collections::BTreeMap;

use layers::{DesiredLayer, effective_visible};
use tracing::{debug, warn};

use crate::{LayerOrigin, LayerRecord, LayerStore, NewLayer, StoreError};

/// One mounted map view over a user's layers.
///
/// Visibility toggles are persisted and also remembered locally, so the view
/// reacts without waiting on a reload. The local overrides live only as long
/// as the session; [`LayerSession::reload`] drops them.
#[derive(Debug)]
pub struct LayerSession<S> {
    store: S,
    local_visible: BTreeMap<u64, bool>,
}

impl<S: LayerStore> LayerSession<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            local_visible: BTreeMap::new(),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn local_override(&self, id: u64) -> Option<bool> {
        self.local_visible.get(&id).copied()
    }

    pub fn add(&mut self, layer: NewLayer) -> Result<LayerRecord, StoreError> {
        let record = self.store.create(layer)?;
        debug!("Created layer record {} ({})", record.id, record.name);
        Ok(record)
    }

    /// Flips the effective visibility of a layer, returning the new value.
    pub fn toggle_visibility(&mut self, id: u64) -> Result<bool, StoreError> {
        let record = self.store.get(id)?.ok_or(StoreError::NotFound { id })?;
        let next = !effective_visible(self.local_override(id), record.is_visible);
        self.store.set_visible(id, next)?;
        self.local_visible.insert(id, next);
        debug!("Layer {id} visibility toggled to {next}");
        Ok(next)
    }

    pub fn delete(&mut self, id: u64) -> Result<bool, StoreError> {
        self.local_visible.remove(&id);
        self.store.delete(id)
    }

    pub fn reload(&mut self) {
        self.local_visible.clear();
    }

    /// Finds a record by the key it reconciles under.
    pub fn find_by_key(&self, key: &str) -> Result<Option<LayerRecord>, StoreError> {
        Ok(self
            .store
            .list()?
            .into_iter()
            .find(|record| record.key_name() == key))
    }

    /// The desired set for this view. Records that fail to normalize are
    /// logged and left out.
    pub fn desired(&self) -> Result<Vec<DesiredLayer>, StoreError> {
        let mut desired = Vec::new();
        for record in self.store.list()? {
            match LayerOrigin::from_record(&record) {
                Ok(origin) => desired.push(origin.into_desired(self.local_override(record.id))),
                Err(e) => warn!("Skipping layer record: {e}"),
            }
        }
        Ok(desired)
    }
}
