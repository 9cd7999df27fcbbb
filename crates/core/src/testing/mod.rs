//! Testing utilities and mock implementations.
//!
//! Mocks stand in for every external seam (object storage, video decoding and
//! encoding, inference models, model hubs) so the whole pipeline can run in
//! tests without ffmpeg, S3 or an inference service.
//!
//! # Example
//!
//! ```rust,ignore
//! use avatar_prep_core::testing::{
//!     MockModelHub, MockModelLoader, MockObjectStore, MockVideoDecoder,
//! };
//!
//! let registry = ModelRegistry::new(Arc::new(MockModelLoader::new()))
//!     .with_hub(Arc::new(MockModelHub::new()));
//! let decoder = MockVideoDecoder::new(10.0, 30.0); // 300 synthetic frames
//! let store = Arc::new(MockObjectStore::new());
//! store.fail_next_puts(2).await;
//! ```

pub mod fixtures;
mod mock_media;
mod mock_models;
mod mock_store;

pub use mock_media::{frame_marker, marked_frame, MockVideoDecoder, MockVideoEncoder};
pub use mock_models::{
    MockFaceModel, MockLandmarkModel, MockModelHub, MockModelLoader, MockSynthesisModel,
};
pub use mock_store::MockObjectStore;
