//! Image generation providers.

#[cfg(feature = "huggingface")]
mod huggingface;

#[cfg(feature = "huggingface")]
pub use huggingface::{HuggingFaceModel, HuggingFaceProvider, HuggingFaceProviderBuilder};
