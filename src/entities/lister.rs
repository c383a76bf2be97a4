//! Entity matrix enumeration.

use async_trait::async_trait;

use super::{Connection, EntityKind, EntityRef, Scope};
use crate::error::SyncError;

/// Supplies the entity matrix at the start of each run.
#[async_trait]
pub trait EntityLister: Send + Sync {
    async fn list(&self, kind: EntityKind) -> Result<Vec<EntityRef>, SyncError>;
}

/// Lists entities from the statically configured connections.
#[derive(Debug, Clone, Default)]
pub struct ConfiguredEntityLister {
    connections: Vec<Connection>,
}

impl ConfiguredEntityLister {
    pub fn new(connections: Vec<Connection>) -> Self {
        Self { connections }
    }

    /// Synchronous variant of [`EntityLister::list`].
    pub fn matrix(&self, kind: EntityKind) -> Vec<EntityRef> {
        let mut refs = Vec::new();
        for connection in &self.connections {
            let tenant = connection.tenant.as_str();
            match kind.scope() {
                Scope::Tenant => refs.push(EntityRef::tenant_wide(tenant, kind)),
                Scope::Project => refs.extend(
                    connection
                        .projects
                        .iter()
                        .map(|project| EntityRef::project(tenant, project.as_str(), kind)),
                ),
                Scope::Repository => refs.extend(connection.repositories.iter().map(|repo| {
                    EntityRef::repository(tenant, repo.project.as_str(), repo.name.as_str(), kind)
                })),
            }
        }
        refs
    }
}

#[async_trait]
impl EntityLister for ConfiguredEntityLister {
    async fn list(&self, kind: EntityKind) -> Result<Vec<EntityRef>, SyncError> {
        Ok(self.matrix(kind))
    }
}
