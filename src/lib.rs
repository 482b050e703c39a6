#![warn(missing_docs)]
//! facesketch - pencil-sketch face portraits from a text description.
//!
//! A description such as "A middle-aged man with a beard" is turned into a
//! sketch-style prompt, sent to a hosted text-to-image model, and the returned
//! bytes are kept as the image on display. [`ImageRequestController`] owns the
//! form state (inputs, current image, busy flag) for any front end.
//!
//! # Quick Start
//!
//! ```no_run
//! use facesketch::{HuggingFaceProvider, ImageRequestController, SubmitOutcome, Variant};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> facesketch::Result<()> {
//!     let provider = HuggingFaceProvider::builder().build()?;
//!     let controller = ImageRequestController::new(Arc::new(provider), Variant::Modify);
//!
//!     controller.set_subject_description("A middle-aged man with a beard");
//!     if let SubmitOutcome::Rendered(image) = controller.submit(false).await {
//!         image.image().save("sketch.jpg")?;
//!     }
//!
//!     controller.set_modification_text("add glasses");
//!     let _ = controller.submit(true).await;
//!     Ok(())
//! }
//! ```
//!
//! # Features
//!
//! - `huggingface` (default): Hugging Face Inference API provider
//! - `cli`: the `facesketch` command-line front end

pub mod controller;
mod error;
pub mod image;
pub mod prompt;

// Re-export error types at crate root
pub use error::{Result, SketchError};

pub use controller::{
    ControllerState, ImageRequestController, RenderedImage, SubmitHandle, SubmitOutcome, Variant,
};
pub use image::{GeneratedImage, GenerationMetadata, GenerationRequest, ImageFormat, ImageProvider};

#[cfg(feature = "huggingface")]
pub use image::providers::{HuggingFaceModel, HuggingFaceProvider, HuggingFaceProviderBuilder};

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::controller::{ImageRequestController, SubmitOutcome, Variant};
    pub use crate::error::{Result, SketchError};
    pub use crate::image::{GeneratedImage, GenerationRequest, ImageProvider};

    #[cfg(feature = "huggingface")]
    pub use crate::image::providers::HuggingFaceProvider;
}
