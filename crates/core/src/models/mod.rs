//! Model registry: lazy, single-flight loading of inference models.
//!
//! The registry resolves weights (pinned local path or a [`ModelHub`]),
//! hands them to a [`ModelLoader`] and caches the resulting [`ModelHandle`]
//! for the life of the process.

mod error;
mod handle;
mod hub;
mod key;
mod registry;
mod remote;
mod traits;

pub use error::{InferenceError, ModelError};
pub use handle::{LoadedModel, ModelHandle, ModelKind, WeightsSource};
pub use hub::{
    is_weights_file, select_version_dir, LocalModelHub, ModelHub, ObjectStoreModelHub,
    MODEL_EXTENSIONS,
};
pub use key::{InvalidModelKey, ModelKey, ModelVersion};
pub use registry::{ModelRegistry, DEFAULT_MAX_CONCURRENT_PER_MODEL};
pub use remote::{InferenceServiceConfig, RemoteModelLoader};
pub use traits::{FaceModel, LandmarkModel, Latent, Model, ModelLoader, SynthesisModel};
