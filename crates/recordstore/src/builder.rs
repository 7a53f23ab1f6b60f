//! Fluent store construction.

use recordstore_core::{Error, ModelType, Result};
use recordstore_session::{Adapter, Store, StoreConfig};

/// Builder for creating [`Store`] instances with a fluent API.
///
/// # Example
///
/// ```rust,ignore
/// let store = StoreBuilder::new()
///     .adapter(RestAdapter::new(client))
///     .auto_commit(true)
///     .model(&comment)
///     .build()?;
/// ```
#[derive(Default)]
pub struct StoreBuilder {
    adapter: Option<Box<dyn Adapter>>,
    config: StoreConfig,
    models: Vec<ModelType>,
}

impl StoreBuilder {
    /// Create a new store builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the persistence adapter.
    #[must_use]
    pub fn adapter(mut self, adapter: impl Adapter + 'static) -> Self {
        self.adapter = Some(Box::new(adapter));
        self
    }

    /// Replace the whole configuration.
    #[must_use]
    pub fn config(mut self, config: StoreConfig) -> Self {
        self.config = config;
        self
    }

    /// Commit the default transaction after association mutations.
    #[must_use]
    pub fn auto_commit(mut self, value: bool) -> Self {
        self.config.auto_commit = value;
        self
    }

    /// Refuse commits whose records depend on each other in a loop.
    #[must_use]
    pub fn detect_cycles(mut self, value: bool) -> Self {
        self.config.detect_cycles = value;
        self
    }

    /// Mark the dependents of a failed create as stalled.
    #[must_use]
    pub fn mark_stalled_dependents(mut self, value: bool) -> Self {
        self.config.mark_stalled_dependents = value;
        self
    }

    /// Register a model when the store is built.
    #[must_use]
    pub fn model(mut self, model: &ModelType) -> Self {
        self.models.push(model.clone());
        self
    }

    /// Build the store.
    ///
    /// # Errors
    ///
    /// `Error::Config` when no adapter was set, and `Error::InvalidModel` when
    /// a registered model is malformed or two models share a name.
    pub fn build(self) -> Result<Store> {
        let Some(adapter) = self.adapter else {
            return Err(Error::Config("no adapter configured".to_string()));
        };
        let store = Store::with_config(adapter, self.config);
        for model in &self.models {
            store.register_model(model)?;
        }
        tracing::debug!(models = self.models.len(), "Built store");
        Ok(store)
    }
}

impl std::fmt::Debug for StoreBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreBuilder")
            .field("has_adapter", &self.adapter.is_some())
            .field("config", &self.config)
            .field("models", &self.models.len())
            .finish()
    }
}
