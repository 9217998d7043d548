//! Process priority aggregation.
//!
//! Each priority client reports its own visibility and depth. The host folds
//! them into [`PriorityInputs`] and derives a [`ProcessPriority`] from those.

use serde::{Deserialize, Serialize};

/// Depth used when no client reports one.
pub const MAX_FRAME_DEPTH_FOR_PRIORITY: u32 = u32::MAX;

/// Platform importance hint; larger wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Importance {
    #[default]
    Normal,
    Moderate,
    Important,
}

/// What one client contributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientPriority {
    pub is_hidden: bool,
    pub frame_depth: u32,
    pub intersects_viewport: bool,
    pub importance: Importance,
}

impl ClientPriority {
    pub fn visible(frame_depth: u32) -> Self {
        Self {
            is_hidden: false,
            frame_depth,
            intersects_viewport: true,
            importance: Importance::Normal,
        }
    }

    pub fn hidden(frame_depth: u32) -> Self {
        Self {
            is_hidden: true,
            frame_depth,
            intersects_viewport: false,
            importance: Importance::Normal,
        }
    }

    pub fn with_importance(mut self, importance: Importance) -> Self {
        self.importance = importance;
        self
    }

    pub fn with_intersects_viewport(mut self, intersects: bool) -> Self {
        self.intersects_viewport = intersects;
        self
    }
}

/// Anything whose visibility should keep a worker in the foreground.
pub trait PriorityClient: Send + Sync {
    fn priority(&self) -> ClientPriority;
}

/// Aggregate over every client registered on a host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriorityInputs {
    pub visible_count: u32,
    pub frame_depth: u32,
    pub intersects_viewport: bool,
    pub importance: Importance,
}

impl Default for PriorityInputs {
    fn default() -> Self {
        Self {
            visible_count: 0,
            frame_depth: MAX_FRAME_DEPTH_FOR_PRIORITY,
            intersects_viewport: false,
            importance: Importance::Normal,
        }
    }
}

impl PriorityInputs {
    /// Fold client priorities.
    ///
    /// Depth and viewport come from visible clients when there are any and
    /// from hidden clients otherwise. Importance is the max over everyone.
    pub fn aggregate<I>(clients: I) -> Self
    where
        I: IntoIterator<Item = ClientPriority>,
    {
        let mut inputs = Self::default();
        for client in clients {
            if client.is_hidden {
                if inputs.visible_count == 0 {
                    inputs.frame_depth = inputs.frame_depth.min(client.frame_depth);
                    inputs.intersects_viewport |= client.intersects_viewport;
                }
            } else {
                if inputs.visible_count == 0 {
                    // First visible client: hidden ones no longer count.
                    inputs.frame_depth = client.frame_depth;
                    inputs.intersects_viewport = client.intersects_viewport;
                } else {
                    inputs.frame_depth = inputs.frame_depth.min(client.frame_depth);
                    inputs.intersects_viewport |= client.intersects_viewport;
                }
                inputs.visible_count += 1;
            }
            inputs.importance = inputs.importance.max(client.importance);
        }
        inputs
    }
}

/// Priority handed to the launcher for the OS process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessPriority {
    pub foreground: bool,
    pub frame_depth: u32,
    pub intersects_viewport: bool,
    pub importance: Importance,
}

impl Default for ProcessPriority {
    /// Processes launch in the foreground.
    fn default() -> Self {
        Self {
            foreground: true,
            frame_depth: MAX_FRAME_DEPTH_FOR_PRIORITY,
            intersects_viewport: false,
            importance: Importance::Normal,
        }
    }
}

impl ProcessPriority {
    pub fn derive(inputs: &PriorityInputs, disable_backgrounding: bool) -> Self {
        Self {
            foreground: inputs.visible_count > 0 || disable_backgrounding,
            frame_depth: inputs.frame_depth,
            intersects_viewport: inputs.intersects_viewport,
            importance: inputs.importance,
        }
    }

    pub fn is_background(&self) -> bool {
        !self.foreground
    }
}
