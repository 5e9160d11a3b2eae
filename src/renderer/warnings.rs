//! Warning de-duplication.

use rustc_hash::FxHashSet;

/// Emits each distinct warning message once per renderer instance.
#[derive(Default)]
pub struct OnceLog {
    emitted: FxHashSet<String>,
}

impl OnceLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Logs `message` at warn level unless it was logged before.
    pub fn warn(&mut self, message: &str) {
        if self.emitted.insert(message.to_string()) {
            log::warn!("{message}");
        }
    }

    /// Logs `message` at error level unless it was logged before.
    pub fn error(&mut self, message: &str) {
        if self.emitted.insert(message.to_string()) {
            log::error!("{message}");
        }
    }
}
