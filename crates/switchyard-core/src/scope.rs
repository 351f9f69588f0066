//! Named configuration scopes.

use crate::settings::Settings;
use crate::stage::ExecutionStage;

/// The settings and execution stage of one server, adapter or service.
#[derive(Debug, Default)]
pub struct Scope {
    name: String,
    settings: Settings,
    stage: ExecutionStage,
}

impl Scope {
    /// Creates an empty scope.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            settings: Settings::new(),
            stage: ExecutionStage::new(),
        }
    }

    /// Replaces the settings.
    #[must_use]
    pub fn with_settings(mut self, settings: Settings) -> Self {
        self.settings = settings;
        self
    }

    /// Scope name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Scope settings.
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Scope interceptors.
    pub fn stage(&self) -> &ExecutionStage {
        &self.stage
    }
}
