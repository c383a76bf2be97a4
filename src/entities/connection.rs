//! Configured upstream connection for one tenant.

use std::fmt;
use std::str::FromStr;

use crate::transport::Credential;

/// A repository addressed as `project/repository`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RepositoryRef {
    pub project: String,
    pub name: String,
}

impl FromStr for RepositoryRef {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().split_once('/') {
            Some((project, name)) if !project.trim().is_empty() && !name.trim().is_empty() => {
                Ok(Self {
                    project: project.trim().to_string(),
                    name: name.trim().to_string(),
                })
            }
            _ => Err(format!("expected 'project/repository', got '{}'", s)),
        }
    }
}

impl fmt::Display for RepositoryRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.project, self.name)
    }
}

/// Upstream organization a tenant synchronizes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connection {
    pub tenant: String,
    /// Organization base URL, e.g. `https://dev.azure.com/acme`.
    pub base_url: String,
    pub credential: Option<Credential>,
    pub verify_tls: bool,
    pub projects: Vec<String>,
    pub repositories: Vec<RepositoryRef>,
}

impl Connection {
    pub fn new(tenant: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            tenant: tenant.into(),
            base_url: base_url.into(),
            credential: None,
            verify_tls: true,
            projects: Vec::new(),
            repositories: Vec::new(),
        }
    }

    pub fn with_credential(mut self, credential: Credential) -> Self {
        self.credential = Some(credential);
        self
    }

    pub fn with_projects<I, S>(mut self, projects: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.projects = projects.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_repositories<I>(mut self, repositories: I) -> Self
    where
        I: IntoIterator<Item = RepositoryRef>,
    {
        self.repositories = repositories.into_iter().collect();
        self
    }

    pub fn with_verify_tls(mut self, verify_tls: bool) -> Self {
        self.verify_tls = verify_tls;
        self
    }
}
