pub mod config;
pub mod detect;
pub mod extract;
pub mod mask;
pub mod models;
pub mod pipeline;
pub mod retry;
pub mod storage;
pub mod synth;
pub mod testing;

pub use config::{
    load_config, load_config_from_str, validate_config, Config, ConfigError, HubBackend,
    SanitizedConfig, StorageBackend,
};
pub use detect::{DetectionError, FaceDetection, FaceDetector, LandmarkDetector, LandmarkSet};
pub use extract::{ExtractError, FfmpegDecoder, FrameExtractor, FrameRecord, MediaConfig, VideoRef};
pub use mask::{MaskArtifact, MaskGenerator, MaskRegion};
pub use models::{ModelError, ModelHandle, ModelKey, ModelRegistry};
pub use pipeline::{
    Diagnostics, ErrorKind, Job, JobConfig, JobId, JobOutcome, JobRequest, JobResult, JobStatus,
    OrchestratorConfig, OrchestratorError, PipelineOrchestrator, PipelineState, PoolStatus, Stage,
    StateTransition,
};
pub use retry::RetryConfig;
pub use storage::{ArtifactStore, InMemoryObjectStore, ObjectStore, S3ObjectStore, StorageError};
pub use synth::{AvatarSynthesizer, FfmpegEncoder, SynthesisConfig, VideoEncoder};
