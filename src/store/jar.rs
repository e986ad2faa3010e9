//! In-memory jar metadata store

use std::collections::HashMap;

use chrono::Utc;
use parking_lot::RwLock;
use tracing::debug;

use crate::id::{IdGenerator, JarId};
use crate::model::Jar;
use crate::{JarError, Result};

use super::{JarStore, MAX_ID_ATTEMPTS};

/// Jar store backed by a single reader/writer-locked map
pub struct InMemoryJarStore {
    jars: RwLock<HashMap<JarId, Jar>>,
    ids: IdGenerator,
}

impl InMemoryJarStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self {
            jars: RwLock::new(HashMap::new()),
            ids: IdGenerator::new(),
        }
    }

    /// Number of stored jars
    #[must_use]
    pub fn len(&self) -> usize {
        self.jars.read().len()
    }

    /// Whether the store holds no jars
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.jars.read().is_empty()
    }
}

impl Default for InMemoryJarStore {
    fn default() -> Self {
        Self::new()
    }
}

impl JarStore for InMemoryJarStore {
    fn create(&self, name: &str) -> Result<JarId> {
        let mut jars = self.jars.write();

        for _ in 0..MAX_ID_ATTEMPTS {
            let id = self.ids.jar_id();
            if jars.contains_key(&id) {
                debug!("Jar ID collision on {}, retrying", id);
                continue;
            }

            jars.insert(
                id.clone(),
                Jar {
                    id: id.clone(),
                    name: name.to_string(),
                    created_at: Utc::now(),
                },
            );
            return Ok(id);
        }

        Err(JarError::Internal(format!(
            "no unused jar ID after {MAX_ID_ATTEMPTS} attempts"
        )))
    }

    fn get(&self, jar_id: &JarId) -> Result<Jar> {
        self.jars
            .read()
            .get(jar_id)
            .cloned()
            .ok_or_else(|| JarError::JarNotFound(jar_id.clone()))
    }

    fn list(&self) -> Result<Vec<Jar>> {
        let mut jars: Vec<Jar> = self.jars.read().values().cloned().collect();
        jars.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(jars)
    }

    fn delete(&self, jar_id: &JarId) -> Result<()> {
        self.jars.write().remove(jar_id);
        Ok(())
    }
}
