//! # Entity Catalogue
//!
//! The unit of synchronization is an [`EntityRef`]: one entity kind scoped
//! to a tenant, optionally a sub-tenant (project) and an entity id
//! (repository). Each [`EntityKind`] knows where it lives upstream, how it
//! paginates, how incremental fetches are filtered and how its records are
//! persisted.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::repositories::RecordPartition;

pub mod connection;
pub mod lister;
pub mod source;

pub use connection::{Connection, RepositoryRef};
pub use lister::{ConfiguredEntityLister, EntityLister};
pub use source::{EntityPageRequest, extract_record};

const API_VERSION: &str = "7.1";

/// Level an entity kind is listed at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Tenant,
    Project,
    Repository,
}

/// How fetched records reach the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistMode {
    /// Idempotent upsert on the natural key; fetched incrementally.
    Upsert,
    /// Delete the partition, then insert the full snapshot.
    Replace,
}

/// Pagination protocol of an upstream collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaginationStyle {
    /// One response holds the whole collection.
    Single,
    /// Page size and offset parameters; more pages while a page is full.
    Offset {
        top_param: &'static str,
        skip_param: &'static str,
    },
    /// Token returned in a response header and echoed as a query parameter.
    ContinuationHeader {
        header: &'static str,
        param: &'static str,
        top_param: &'static str,
    },
    /// Token and last-batch flag returned in the body.
    ContinuationBody {
        token_field: &'static str,
        last_batch_field: &'static str,
        param: &'static str,
    },
}

const CONTINUATION_HEADER: PaginationStyle = PaginationStyle::ContinuationHeader {
    header: "x-ms-continuationtoken",
    param: "continuationToken",
    top_param: "$top",
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Projects,
    Commits,
    Builds,
    WorkItems,
    Releases,
    TestRuns,
    PullRequests,
    BranchStats,
}

impl EntityKind {
    pub const ALL: [EntityKind; 8] = [
        EntityKind::Projects,
        EntityKind::Commits,
        EntityKind::Builds,
        EntityKind::WorkItems,
        EntityKind::Releases,
        EntityKind::TestRuns,
        EntityKind::PullRequests,
        EntityKind::BranchStats,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Projects => "projects",
            EntityKind::Commits => "commits",
            EntityKind::Builds => "builds",
            EntityKind::WorkItems => "work_items",
            EntityKind::Releases => "releases",
            EntityKind::TestRuns => "test_runs",
            EntityKind::PullRequests => "pull_requests",
            EntityKind::BranchStats => "branch_stats",
        }
    }

    pub fn scope(&self) -> Scope {
        match self {
            EntityKind::Projects => Scope::Tenant,
            EntityKind::Builds
            | EntityKind::WorkItems
            | EntityKind::Releases
            | EntityKind::TestRuns => Scope::Project,
            EntityKind::Commits | EntityKind::PullRequests | EntityKind::BranchStats => {
                Scope::Repository
            }
        }
    }

    pub fn persist_mode(&self) -> PersistMode {
        match self {
            EntityKind::BranchStats => PersistMode::Replace,
            _ => PersistMode::Upsert,
        }
    }

    pub fn pagination(&self) -> PaginationStyle {
        match self {
            EntityKind::Commits => PaginationStyle::Offset {
                top_param: "searchCriteria.$top",
                skip_param: "searchCriteria.$skip",
            },
            EntityKind::PullRequests | EntityKind::TestRuns => PaginationStyle::Offset {
                top_param: "$top",
                skip_param: "$skip",
            },
            EntityKind::Projects | EntityKind::Builds | EntityKind::Releases => CONTINUATION_HEADER,
            EntityKind::WorkItems => PaginationStyle::ContinuationBody {
                token_field: "continuationToken",
                last_batch_field: "isLastBatch",
                param: "continuationToken",
            },
            EntityKind::BranchStats => PaginationStyle::Single,
        }
    }

    /// Query parameter filtering records changed since a timestamp.
    pub fn since_param(&self) -> Option<&'static str> {
        match self {
            EntityKind::Commits => Some("searchCriteria.fromDate"),
            EntityKind::Builds => Some("minTime"),
            EntityKind::WorkItems => Some("startDateTime"),
            EntityKind::Releases => Some("minCreatedTime"),
            EntityKind::TestRuns => Some("minLastUpdatedDate"),
            EntityKind::PullRequests => Some("searchCriteria.minTime"),
            EntityKind::Projects | EntityKind::BranchStats => None,
        }
    }

    /// Fixed query parameters sent with every page.
    pub fn static_params(&self) -> &'static [(&'static str, &'static str)] {
        match self {
            EntityKind::Builds => &[("queryOrder", "finishTimeAscending")],
            EntityKind::WorkItems => &[("includeDeleted", "true")],
            EntityKind::PullRequests => &[("searchCriteria.status", "all")],
            EntityKind::TestRuns => &[("includeRunDetails", "true")],
            _ => &[],
        }
    }

    /// Body field holding the page items.
    pub fn items_field(&self) -> &'static str {
        match self {
            EntityKind::WorkItems => "values",
            _ => "value",
        }
    }

    /// Dotted paths whose values, joined with `:`, form the natural key.
    pub fn key_fields(&self) -> &'static [&'static str] {
        match self {
            EntityKind::Commits => &["commitId"],
            EntityKind::WorkItems => &["id", "rev"],
            EntityKind::PullRequests => &["pullRequestId"],
            EntityKind::BranchStats => &["name"],
            EntityKind::Projects
            | EntityKind::Builds
            | EntityKind::Releases
            | EntityKind::TestRuns => &["id"],
        }
    }

    /// Dotted path of the record's upstream modification time.
    pub fn timestamp_field(&self) -> Option<&'static str> {
        match self {
            EntityKind::Projects => Some("lastUpdateTime"),
            EntityKind::Commits => Some("committer.date"),
            EntityKind::Builds => Some("finishTime"),
            EntityKind::WorkItems => Some("fields.System.ChangedDate"),
            EntityKind::Releases => Some("modifiedOn"),
            EntityKind::TestRuns => Some("lastUpdatedDate"),
            EntityKind::PullRequests => Some("creationDate"),
            EntityKind::BranchStats => None,
        }
    }

    /// Upstream path segments below the organization base URL.
    pub fn path_segments<'a>(&self, project: &'a str, repository: &'a str) -> Vec<&'a str> {
        match self {
            EntityKind::Projects => vec!["_apis", "projects"],
            EntityKind::Builds => vec![project, "_apis", "build", "builds"],
            EntityKind::WorkItems => vec![project, "_apis", "wit", "reporting", "workitemrevisions"],
            EntityKind::Releases => vec![project, "_apis", "release", "releases"],
            EntityKind::TestRuns => vec![project, "_apis", "test", "runs"],
            EntityKind::Commits => vec![project, "_apis", "git", "repositories", repository, "commits"],
            EntityKind::PullRequests => {
                vec![project, "_apis", "git", "repositories", repository, "pullrequests"]
            }
            EntityKind::BranchStats => {
                vec![project, "_apis", "git", "repositories", repository, "stats", "branches"]
            }
        }
    }

    pub fn api_version(&self) -> &'static str {
        API_VERSION
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        EntityKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str() == normalized)
            .ok_or_else(|| format!("unknown entity kind '{}'", s))
    }
}

/// One unit of synchronization.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntityRef {
    pub tenant: String,
    pub sub_tenant: Option<String>,
    pub kind: EntityKind,
    pub entity_id: Option<String>,
}

impl EntityRef {
    pub fn tenant_wide(tenant: impl Into<String>, kind: EntityKind) -> Self {
        Self {
            tenant: tenant.into(),
            sub_tenant: None,
            kind,
            entity_id: None,
        }
    }

    pub fn project(tenant: impl Into<String>, project: impl Into<String>, kind: EntityKind) -> Self {
        Self {
            tenant: tenant.into(),
            sub_tenant: Some(project.into()),
            kind,
            entity_id: None,
        }
    }

    pub fn repository(
        tenant: impl Into<String>,
        project: impl Into<String>,
        repository: impl Into<String>,
        kind: EntityKind,
    ) -> Self {
        Self {
            tenant: tenant.into(),
            sub_tenant: Some(project.into()),
            kind,
            entity_id: Some(repository.into()),
        }
    }

    /// `{tenant}:{subTenant}:{entityType}[:{entityId}]`, or
    /// `{tenant}:{entityType}` for tenant-wide entities.
    pub fn cursor_key(&self) -> String {
        let mut parts = vec![self.tenant.as_str()];
        if let Some(sub_tenant) = &self.sub_tenant {
            parts.push(sub_tenant);
        }
        parts.push(self.kind.as_str());
        if let Some(entity_id) = &self.entity_id {
            parts.push(entity_id);
        }
        parts.join(":")
    }

    pub fn partition(&self) -> RecordPartition {
        RecordPartition {
            tenant: self.tenant.clone(),
            sub_tenant: self.sub_tenant.clone().unwrap_or_default(),
            entity_type: self.kind.as_str().to_string(),
            entity_id: self.entity_id.clone().unwrap_or_default(),
        }
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.cursor_key())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursor_keys_follow_scope() {
        assert_eq!(
            EntityRef::tenant_wide("acme", EntityKind::Projects).cursor_key(),
            "acme:projects"
        );
        assert_eq!(
            EntityRef::project("acme", "Web", EntityKind::Builds).cursor_key(),
            "acme:Web:builds"
        );
        assert_eq!(
            EntityRef::repository("acme", "Web", "frontend", EntityKind::Commits).cursor_key(),
            "acme:Web:commits:frontend"
        );
    }

    #[test]
    fn partition_fills_absent_parts_with_empty_strings() {
        let partition = EntityRef::tenant_wide("acme", EntityKind::Projects).partition();
        assert_eq!(partition.sub_tenant, "");
        assert_eq!(partition.entity_id, "");
        assert_eq!(partition.entity_type, "projects");
    }

    #[test]
    fn parses_kind_names() {
        assert_eq!("work-items".parse::<EntityKind>(), Ok(EntityKind::WorkItems));
        assert_eq!(" Commits ".parse::<EntityKind>(), Ok(EntityKind::Commits));
        assert!("wikis".parse::<EntityKind>().is_err());
        for kind in EntityKind::ALL {
            assert_eq!(kind.as_str().parse::<EntityKind>(), Ok(kind));
        }
    }

    #[test]
    fn only_branch_stats_use_full_replace() {
        for kind in EntityKind::ALL {
            let expected = if kind == EntityKind::BranchStats {
                PersistMode::Replace
            } else {
                PersistMode::Upsert
            };
            assert_eq!(kind.persist_mode(), expected, "{kind}");
        }
    }

    #[test]
    fn repository_kinds_embed_repository_in_path() {
        let segments = EntityKind::Commits.path_segments("Web", "frontend");
        assert_eq!(segments, vec!["Web", "_apis", "git", "repositories", "frontend", "commits"]);
        assert_eq!(EntityKind::Projects.path_segments("", ""), vec!["_apis", "projects"]);
    }
}
