//! Prompt coordinator
//!
//! Coalesces prompt requests so a burst of activity produces a single prompt.

/// At-most-one-pending prompt token
#[derive(Debug, Default)]
pub struct PromptCoordinator {
    pending: bool,
}

impl PromptCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a prompt as due; a no-op while one is already pending
    pub fn request(&mut self) {
        self.pending = true;
    }

    /// Take the pending prompt, returning true at most once per request
    pub fn consume(&mut self) -> bool {
        if self.pending {
            self.pending = false;
            true
        } else {
            false
        }
    }

    pub fn is_pending(&self) -> bool {
        self.pending
    }

    /// Drop a pending prompt without displaying it
    pub fn cancel(&mut self) {
        self.pending = false;
    }
}
