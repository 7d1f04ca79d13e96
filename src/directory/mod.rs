//! Which (group, platform) pairs the scheduler should work on.

use crate::config::types::{GroupListConfig, ListMode, PlatformConfig};
use crate::source::SourceRegistry;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("group discovery failed: {0}")]
    Discovery(String),
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GroupTarget {
    pub group_id: String,
    pub platform_id: String,
}

impl GroupTarget {
    pub fn new(group_id: impl Into<String>, platform_id: impl Into<String>) -> Self {
        Self {
            group_id: group_id.into(),
            platform_id: platform_id.into(),
        }
    }

    /// Origin string in `platform:GroupMessage:group` form
    pub fn origin(&self) -> String {
        format!("{}:GroupMessage:{}", self.platform_id, self.group_id)
    }
}

impl fmt::Display for GroupTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.platform_id, self.group_id)
    }
}

#[async_trait]
pub trait GroupDirectory: Send + Sync {
    /// Eligible targets, de-duplicated and sorted
    async fn targets(&self) -> Result<Vec<GroupTarget>, DirectoryError>;

    fn is_allowed(&self, target: &GroupTarget) -> bool;
}

/// Splits an origin string into (platform, group); bare ids yield `None`
fn parse_origin(entry: &str) -> Option<(&str, &str)> {
    let parts: Vec<&str> = entry.split(':').collect();
    if parts.len() >= 3 {
        Some((parts[0], parts[parts.len() - 1]))
    } else {
        None
    }
}

/// Group directory driven by the `groups` config section. Candidates come
/// from each platform's configured groups plus whatever its source reports.
pub struct ConfigDirectory {
    list: GroupListConfig,
    configured: HashMap<String, Vec<String>>,
    sources: SourceRegistry,
}

impl ConfigDirectory {
    pub fn new(
        list: GroupListConfig,
        platforms: &HashMap<String, PlatformConfig>,
        sources: SourceRegistry,
    ) -> Self {
        let configured = platforms
            .iter()
            .map(|(id, platform)| (id.clone(), platform.groups.clone()))
            .collect();
        Self {
            list,
            configured,
            sources,
        }
    }

    fn listed(&self, target: &GroupTarget) -> bool {
        let origin = target.origin();
        self.list.list.iter().map(|e| e.trim()).any(|entry| {
            entry == target.group_id || entry == origin
        })
    }
}

#[async_trait]
impl GroupDirectory for ConfigDirectory {
    async fn targets(&self) -> Result<Vec<GroupTarget>, DirectoryError> {
        let mut targets = BTreeSet::new();

        for platform_id in self.sources.platform_ids() {
            let mut groups: BTreeSet<String> = self
                .configured
                .get(&platform_id)
                .map(|groups| groups.iter().cloned().collect())
                .unwrap_or_default();

            if let Some(source) = self.sources.get(&platform_id) {
                match source.list_groups().await {
                    Ok(found) => groups.extend(found),
                    Err(e) => {
                        tracing::warn!(platform_id = %platform_id, error = %e, "Group discovery failed")
                    }
                }
            }

            for group_id in groups {
                let target = GroupTarget::new(group_id, platform_id.clone());
                if self.is_allowed(&target) {
                    targets.insert(target);
                }
            }
        }

        // Explicit origins still count when the platform could not list the group
        if self.list.mode == ListMode::Whitelist {
            for entry in &self.list.list {
                let Some((platform_id, group_id)) = parse_origin(entry.trim()) else {
                    continue;
                };
                if self.sources.contains(platform_id) {
                    targets.insert(GroupTarget::new(group_id, platform_id));
                } else {
                    tracing::warn!(entry = %entry, platform_id = %platform_id, "Whitelisted platform is not configured");
                }
            }
        }

        tracing::debug!(mode = ?self.list.mode, targets = targets.len(), "Resolved group targets");
        Ok(targets.into_iter().collect())
    }

    fn is_allowed(&self, target: &GroupTarget) -> bool {
        match self.list.mode {
            ListMode::None => true,
            ListMode::Whitelist => self.listed(target),
            ListMode::Blacklist => !self.listed(target),
        }
    }
}
