use async_trait::async_trait;

use crate::errors::PilotResult;
use crate::perception::types::{DetectionResult, Screenshot};

/// Screen capture plus natural-language description.
#[async_trait]
pub trait ScreenObserver: Send + Sync {
    async fn capture(&self) -> PilotResult<Screenshot>;

    async fn describe(&self, shot: &Screenshot) -> PilotResult<String>;
}

/// UI element detection backend.
#[async_trait]
pub trait ElementDetector: Send + Sync {
    async fn detect(&self, shot: &Screenshot) -> PilotResult<DetectionResult>;
}
