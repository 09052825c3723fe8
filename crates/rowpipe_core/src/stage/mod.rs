//! User supplied stage logic.
use std::fmt::Debug;
use std::sync::Arc;

use hashbrown::HashMap;
use rowpipe_error::{ErrorKind, RowpipeError, Result};

use crate::graph::StageDefinition;
use crate::worker::RowIo;

/// Logic of a single stage copy.
///
/// Every copy of a stage gets its own instance, and every method is called on
/// the thread running that copy.
pub trait Stage: Debug + Send {
    /// Prepare the copy before any copy of the pipeline starts running.
    ///
    /// Returning `Ok(false)` fails initialization of the pipeline.
    fn init(&mut self, _io: &mut RowIo) -> Result<bool> {
        Ok(true)
    }

    /// Process a single unit of work, usually one row.
    ///
    /// Returns `false` once there is no more work.
    fn process_row(&mut self, io: &mut RowIo) -> Result<bool>;

    /// Called once after the copy stopped running.
    fn dispose(&mut self, _io: &mut RowIo) {}

    /// Called when a stop was observed while running, before outputs are
    /// marked done.
    fn stop_running(&mut self, _io: &mut RowIo) {}
}

/// Creates a stage instance for one copy of a stage definition.
pub type StageFactory = dyn Fn(&StageDefinition, usize) -> Result<Box<dyn Stage>> + Send + Sync;

/// Stage factories keyed by stage kind.
#[derive(Clone, Default)]
pub struct StageRegistry {
    factories: HashMap<String, Arc<StageFactory>>,
}

impl Debug for StageRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut kinds: Vec<_> = self.factories.keys().collect();
        kinds.sort();
        f.debug_struct("StageRegistry").field("kinds", &kinds).finish()
    }
}

impl StageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built in stages.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        crate::stages::register_builtins(&mut registry);
        registry
    }

    /// Register a factory for `kind`, replacing any existing one.
    pub fn register<F>(&mut self, kind: impl Into<String>, factory: F)
    where
        F: Fn(&StageDefinition, usize) -> Result<Box<dyn Stage>> + Send + Sync + 'static,
    {
        self.factories.insert(kind.into(), Arc::new(factory));
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.factories.contains_key(kind)
    }

    /// Create the stage for one copy of `def`.
    pub fn create(&self, def: &StageDefinition, copy: usize) -> Result<Box<dyn Stage>> {
        let factory = self.factories.get(&def.kind).ok_or_else(|| {
            RowpipeError::new("Unknown stage kind")
                .with_kind(ErrorKind::InvalidTopology)
                .with_field("stage", &def.name)
                .with_field("kind", &def.kind)
        })?;
        factory(def, copy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_kind() {
        let registry = StageRegistry::with_builtins();
        assert!(registry.contains("dummy"));

        let err = registry
            .create(&StageDefinition::new("a", "missing"), 0)
            .unwrap_err();
        assert_eq!(ErrorKind::InvalidTopology, err.kind());
        assert_eq!(Some("missing"), err.field("kind"));
    }
}
