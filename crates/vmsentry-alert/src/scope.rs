use std::sync::Arc;

use vmsentry_common::types::{EntityRef, ScopeKind};

use crate::error::{AlertError, Result};
use crate::{EntityDirectory, EntityFilter};

/// Expands a rule scope into the concrete VMs it covers.
pub struct ScopeResolver {
    directory: Arc<dyn EntityDirectory>,
}

impl ScopeResolver {
    pub fn new(directory: Arc<dyn EntityDirectory>) -> Self {
        Self { directory }
    }

    /// Resolves `scope` / `scope_id` to a list of VMs.
    ///
    /// * `all` returns every VM whose status is not `unknown`.
    /// * `vm` returns the single VM, or [`AlertError::EntityNotFound`].
    /// * `group`, `cluster`, `host`, `datacenter` return the members, possibly
    ///   none.
    ///
    /// Every kind except `all` fails with [`AlertError::MissingScopeId`] when
    /// the id is absent or blank.
    pub async fn resolve(&self, scope: ScopeKind, scope_id: Option<&str>) -> Result<Vec<EntityRef>> {
        let target = || {
            scope_id
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .ok_or(AlertError::MissingScopeId(scope))
        };

        let entities = match scope {
            ScopeKind::All => self
                .list(EntityFilter::All)
                .await?
                .into_iter()
                .filter(|e| !e.is_unknown())
                .collect(),
            ScopeKind::Entity => {
                let id = target()?;
                let entity = self
                    .directory
                    .get_entity(id)
                    .await
                    .map_err(AlertError::Repository)?
                    .ok_or_else(|| AlertError::EntityNotFound(id.to_string()))?;
                vec![entity]
            }
            ScopeKind::Group => self.list(EntityFilter::Group(target()?.to_string())).await?,
            ScopeKind::Cluster => self.list(EntityFilter::Cluster(target()?.to_string())).await?,
            ScopeKind::Host => self.list(EntityFilter::Host(target()?.to_string())).await?,
            ScopeKind::Datacenter => {
                self.list(EntityFilter::Datacenter(target()?.to_string()))
                    .await?
            }
        };
        Ok(entities)
    }

    async fn list(&self, filter: EntityFilter) -> Result<Vec<EntityRef>> {
        self.directory
            .list_entities(&filter)
            .await
            .map_err(AlertError::Repository)
    }
}
