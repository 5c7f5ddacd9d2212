//! Target resolution: which pod/container a request maps to.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::auth::Identity;
use crate::shell::{TargetRef, TerminalSize};

/// What a client asked to connect to.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TargetRequest {
    pub namespace: String,
    pub pod: String,
    /// Defaults to the pod's first container.
    pub container: Option<String>,
    /// Whitespace-separated command line; defaults to the configured shell.
    pub command: Option<String>,
    pub rows: Option<u16>,
    pub cols: Option<u16>,
}

impl TargetRequest {
    /// Initial terminal size, falling back to 24x80 for missing or zero
    /// dimensions.
    pub fn size(&self) -> TerminalSize {
        let default = TerminalSize::default();
        TerminalSize {
            rows: self.rows.filter(|r| *r > 0).unwrap_or(default.rows),
            cols: self.cols.filter(|c| *c > 0).unwrap_or(default.cols),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ResolveError {
    #[error("target not found: {0}")]
    NotFound(String),

    /// The target exists but this user may not open it.
    #[error("access to {0} denied")]
    Forbidden(String),

    #[error("invalid target request: {0}")]
    Invalid(String),
}

/// Maps an authenticated request onto a concrete target.
#[async_trait]
pub trait TargetResolver: Send + Sync {
    async fn resolve(
        &self,
        identity: &Identity,
        request: &TargetRequest,
    ) -> Result<TargetRef, ResolveError>;
}

/// One pod entry of the targets file.
#[derive(Debug, Clone, Deserialize)]
pub struct PodEntry {
    pub namespace: String,
    pub pod: String,
    pub containers: Vec<String>,
    /// Shell agent endpoint, e.g. `http://10.0.3.7:50080`.
    pub endpoint: String,
    /// Usernames allowed to open shells here. Empty means everyone.
    #[serde(default)]
    pub allowed_users: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct TargetsFile {
    targets: Vec<PodEntry>,
}

/// Resolver backed by a fixed list of pods, usually loaded from JSON:
///
/// ```json
/// {"targets": [{"namespace": "fl-jobs", "pod": "pod-7",
///               "containers": ["worker"], "endpoint": "http://10.0.3.7:50080"}]}
/// ```
#[derive(Debug, Clone)]
pub struct StaticTargetResolver {
    pods: HashMap<(String, String), PodEntry>,
    default_shell: Vec<String>,
}

impl StaticTargetResolver {
    pub fn new(entries: impl IntoIterator<Item = PodEntry>, default_shell: Vec<String>) -> Self {
        let pods = entries
            .into_iter()
            .map(|entry| ((entry.namespace.clone(), entry.pod.clone()), entry))
            .collect();
        Self {
            pods,
            default_shell,
        }
    }

    pub fn from_json(json: &str, default_shell: Vec<String>) -> fedshell_core::Result<Self> {
        let file: TargetsFile = serde_json::from_str(json)?;
        Ok(Self::new(file.targets, default_shell))
    }

    pub fn from_file(path: &Path, default_shell: Vec<String>) -> fedshell_core::Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            fedshell_core::Error::Config(format!(
                "Failed to read targets file {}: {e}",
                path.display()
            ))
        })?;
        let resolver = Self::from_json(&content, default_shell).map_err(|e| {
            fedshell_core::Error::Config(format!(
                "Failed to parse targets file {}: {e}",
                path.display()
            ))
        })?;
        info!(path = %path.display(), pods = resolver.pods.len(), "Loaded targets");
        Ok(resolver)
    }

    pub fn len(&self) -> usize {
        self.pods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pods.is_empty()
    }
}

#[async_trait]
impl TargetResolver for StaticTargetResolver {
    async fn resolve(
        &self,
        identity: &Identity,
        request: &TargetRequest,
    ) -> Result<TargetRef, ResolveError> {
        if request.namespace.is_empty() || request.pod.is_empty() {
            return Err(ResolveError::Invalid(
                "namespace and pod are required".into(),
            ));
        }
        let path = format!("{}/{}", request.namespace, request.pod);

        let entry = self
            .pods
            .get(&(request.namespace.clone(), request.pod.clone()))
            .ok_or_else(|| ResolveError::NotFound(path.clone()))?;

        if !entry.allowed_users.is_empty()
            && !identity.is_admin()
            && !entry.allowed_users.contains(&identity.username)
        {
            debug!(user = %identity.username, pod = %path, "User not in allow list");
            return Err(ResolveError::Forbidden(path));
        }

        let container = match request.container.as_deref().filter(|c| !c.is_empty()) {
            Some(name) if entry.containers.iter().any(|c| c == name) => name.to_string(),
            Some(name) => return Err(ResolveError::NotFound(format!("{path}/{name}"))),
            None => entry
                .containers
                .first()
                .cloned()
                .ok_or_else(|| ResolveError::NotFound(format!("{path} has no containers")))?,
        };

        let command: Vec<String> = request
            .command
            .as_deref()
            .map(|c| c.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default();

        Ok(TargetRef {
            namespace: entry.namespace.clone(),
            pod: entry.pod.clone(),
            container,
            command: if command.is_empty() {
                self.default_shell.clone()
            } else {
                command
            },
            endpoint: entry.endpoint.clone(),
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::io::Write;

    use super::*;
    use crate::test_support::alice;

    const TARGETS: &str = r#"{
        "targets": [
            {"namespace": "fl-jobs", "pod": "pod-7", "containers": ["worker", "sidecar"],
             "endpoint": "http://10.0.3.7:50080"},
            {"namespace": "fl-jobs", "pod": "leader-0", "containers": ["leader"],
             "endpoint": "http://10.0.3.8:50080", "allowed_users": ["bob"]}
        ]
    }"#;

    fn resolver() -> StaticTargetResolver {
        StaticTargetResolver::from_json(TARGETS, vec!["/bin/sh".into()]).unwrap()
    }

    fn request(pod: &str) -> TargetRequest {
        TargetRequest {
            namespace: "fl-jobs".into(),
            pod: pod.into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn defaults_fill_container_and_command() {
        let target = resolver().resolve(&alice(), &request("pod-7")).await.unwrap();
        assert_eq!(target.container, "worker");
        assert_eq!(target.command, vec!["/bin/sh"]);
        assert_eq!(target.endpoint, "http://10.0.3.7:50080");
    }

    #[tokio::test]
    async fn explicit_container_and_command() {
        let req = TargetRequest {
            container: Some("sidecar".into()),
            command: Some("  bash -l ".into()),
            ..request("pod-7")
        };
        let target = resolver().resolve(&alice(), &req).await.unwrap();
        assert_eq!(target.container, "sidecar");
        assert_eq!(target.command, vec!["bash", "-l"]);
    }

    #[tokio::test]
    async fn unknown_pod_or_container_not_found() {
        let r = resolver();
        assert!(matches!(
            r.resolve(&alice(), &request("pod-9")).await,
            Err(ResolveError::NotFound(_))
        ));
        let req = TargetRequest {
            container: Some("nope".into()),
            ..request("pod-7")
        };
        assert!(matches!(
            r.resolve(&alice(), &req).await,
            Err(ResolveError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn allow_list_is_enforced() {
        let r = resolver();
        assert_eq!(
            r.resolve(&alice(), &request("leader-0")).await,
            Err(ResolveError::Forbidden("fl-jobs/leader-0".into()))
        );

        let mut admin = alice();
        admin.role = "admin".into();
        assert!(r.resolve(&admin, &request("leader-0")).await.is_ok());
    }

    #[tokio::test]
    async fn missing_pod_is_invalid() {
        let err = resolver()
            .resolve(&alice(), &TargetRequest::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::Invalid(_)));
    }

    #[test]
    fn size_falls_back_to_defaults() {
        let req = TargetRequest {
            rows: Some(0),
            cols: Some(132),
            ..request("pod-7")
        };
        assert_eq!(req.size(), TerminalSize { rows: 24, cols: 132 });
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(TARGETS.as_bytes()).unwrap();
        let r = StaticTargetResolver::from_file(file.path(), vec!["/bin/sh".into()]).unwrap();
        assert_eq!(r.len(), 2);

        assert!(StaticTargetResolver::from_file(Path::new("/nonexistent"), Vec::new()).is_err());
    }
}
