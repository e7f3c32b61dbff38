//! Foreground in-call screen tracking

use tracing::debug;

/// Whether an in-call screen is in the foreground. Last writer wins.
#[derive(Debug, Default)]
pub struct VisibilityCoordinator {
    visible: bool,
}

impl VisibilityCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    /// Record a screen's report. Returns true if the flag changed.
    pub fn set_visible(&mut self, visible: bool) -> bool {
        let changed = self.visible != visible;
        self.visible = visible;
        debug!(visible, changed, "In-call screen visibility");
        changed
    }
}
