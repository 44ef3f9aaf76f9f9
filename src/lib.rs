pub mod clients;
pub mod config;
pub mod error;
pub mod fingerprint;
pub mod http;
pub mod orchestrator;
pub mod prompts;
pub mod schemas;
pub mod seen;
pub mod service;
pub mod store;

pub use error::{EmptyBatchCause, ProofAndFitError, Result};
pub use fingerprint::Fingerprint;
pub use orchestrator::{
    BatchCounters, BatchOutcome, GenerationPolicy, ProgressEvent, UniqueGenerationOrchestrator,
};
pub use schemas::{AcceptedItem, CandidateItem, ChallengeType, Difficulty, GenerationRequest};
pub use seen::SeenFingerprintSet;
pub use service::{BatchReport, ChallengeGenerationService};
