//! Image provider trait.

use crate::error::Result;
use crate::image::types::{GeneratedImage, GenerationRequest};
use async_trait::async_trait;

/// A text-to-image backend.
///
/// Implementations perform exactly one attempt per call; the controller never
/// retries.
#[async_trait]
pub trait ImageProvider: Send + Sync {
    /// Generates an image from the given request.
    async fn generate(&self, request: &GenerationRequest) -> Result<GeneratedImage>;

    /// Returns the name of this provider for display.
    fn name(&self) -> &str;
}
