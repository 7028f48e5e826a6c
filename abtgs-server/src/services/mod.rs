//! Service layer
//!
//! - Job registry, pipeline and scheduler (job lifecycle)
//! - Speaker identity resolver and timecode assembler (review)
//! - Status reporter and client-side poller
//! - Export and input validation
//! - Submission rate limit and retention of finished jobs

pub mod assembler;
pub mod export;
pub mod filename_meta;
pub mod identity_resolver;
pub mod pipeline;
pub mod poller;
pub mod rate_limit;
pub mod registry;
pub mod retention;
pub mod scheduler;
pub mod status;
pub mod validation;

pub use assembler::{TimecodeAssembler, TranscriptLine};
pub use export::{ExportError, ExportService, ExportedDocument};
pub use identity_resolver::{ResolverError, SpeakerIdentityResolver, SpeakerView};
pub use pipeline::{JobPipeline, PipelineSettings};
pub use poller::{HttpStatusClient, PollError, PollHandle, PollOutcome, StatusPoller, StatusSource};
pub use rate_limit::{RateLimited, SubmissionLimiter};
pub use registry::{BatchRegistry, InMemoryJobRegistry, JobHandle, JobStore};
pub use retention::RetentionSweeper;
pub use scheduler::{Scheduler, SchedulerError};
pub use status::{BatchFileStatus, BatchStatusView, JobStatusView, StatusReporter};
pub use validation::ValidationError;
