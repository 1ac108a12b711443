//! Sublayer hierarchy and visibility.
//!
//! Features are owned by leaf sublayers. A leaf takes part in clustering only when it
//! and every ancestor above it are visible. Leaves are iterated in registration order,
//! which fixes the feature arrival order of each clustering pass.

use crate::error::{ClusterError, Result};
use crate::types::LayerId;
use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};

/// One node of the sublayer hierarchy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sublayer {
    pub id: LayerId,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default = "Sublayer::default_visible")]
    pub visible: bool,
    /// Parent group, `None` for top-level sublayers.
    #[serde(default)]
    pub parent: Option<LayerId>,
}

impl Sublayer {
    const fn default_visible() -> bool {
        true
    }

    pub fn new(id: impl Into<LayerId>) -> Self {
        Self {
            id: id.into(),
            title: None,
            visible: true,
            parent: None,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_parent(mut self, parent: impl Into<LayerId>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    pub fn hidden(mut self) -> Self {
        self.visible = false;
        self
    }
}

/// Validated sublayer hierarchy.
#[derive(Debug, Clone, Default)]
pub struct SublayerTree {
    nodes: Vec<Sublayer>,
    index: FxHashMap<LayerId, usize>,
    leaves: Vec<usize>,
}

impl SublayerTree {
    /// Build a tree, rejecting duplicate ids, dangling parents and cycles.
    pub fn new(nodes: Vec<Sublayer>) -> Result<Self> {
        let mut index = FxHashMap::default();
        for (i, node) in nodes.iter().enumerate() {
            if node.id.is_empty() {
                return Err(ClusterError::InvalidInput(
                    "Sublayer id must not be empty".to_string(),
                ));
            }
            if index.insert(node.id.clone(), i).is_some() {
                return Err(ClusterError::InvalidInput(format!(
                    "Duplicate sublayer id: {}",
                    node.id
                )));
            }
        }

        let mut parents = FxHashSet::default();
        for node in &nodes {
            if let Some(parent) = &node.parent {
                if !index.contains_key(parent) {
                    return Err(ClusterError::UnknownLayer(parent.clone()));
                }
                parents.insert(parent.clone());
            }
        }

        let tree = Self {
            leaves: (0..nodes.len())
                .filter(|&i| !parents.contains(&nodes[i].id))
                .collect(),
            nodes,
            index,
        };

        for node in &tree.nodes {
            tree.check_acyclic(&node.id)?;
        }
        Ok(tree)
    }

    fn check_acyclic(&self, id: &str) -> Result<()> {
        let mut seen = FxHashSet::default();
        let mut current = self.get(id);
        while let Some(node) = current {
            if !seen.insert(node.id.as_str()) {
                return Err(ClusterError::InvalidInput(format!(
                    "Sublayer hierarchy contains a cycle at: {}",
                    node.id
                )));
            }
            current = node.parent.as_deref().and_then(|p| self.get(p));
        }
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&Sublayer> {
        self.index.get(id).map(|&i| &self.nodes[i])
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Leaf sublayers in registration order.
    pub fn leaves(&self) -> impl Iterator<Item = &Sublayer> {
        self.leaves.iter().map(|&i| &self.nodes[i])
    }

    pub fn leaf_ids(&self) -> Vec<LayerId> {
        self.leaves().map(|l| l.id.clone()).collect()
    }

    /// Leaves whose whole ancestor chain is visible.
    pub fn enabled_leaves(&self) -> impl Iterator<Item = &Sublayer> {
        self.leaves().filter(|l| self.is_enabled(&l.id))
    }

    /// Whether `id` and all of its ancestors are visible. Unknown ids are disabled.
    pub fn is_enabled(&self, id: &str) -> bool {
        let mut current = self.get(id);
        if current.is_none() {
            return false;
        }
        while let Some(node) = current {
            if !node.visible {
                return false;
            }
            current = node.parent.as_deref().and_then(|p| self.get(p));
        }
        true
    }

    /// Toggle visibility. Returns whether the flag actually changed.
    pub fn set_visible(&mut self, id: &str, visible: bool) -> Result<bool> {
        let &i = self
            .index
            .get(id)
            .ok_or_else(|| ClusterError::UnknownLayer(id.to_string()))?;
        let changed = self.nodes[i].visible != visible;
        self.nodes[i].visible = visible;
        Ok(changed)
    }
}
