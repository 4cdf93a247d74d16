pub mod attempts;
pub mod credentials;
pub mod error_codes;
pub mod memory;
pub mod model;
pub mod orchestrator;
pub mod repo;
pub mod scheduler;
pub mod store;
pub mod timeline;

pub use attempts::{AttemptRecord, AttemptsRepo, JobAttempt};
pub use credentials::{CredentialSource, CredentialsRepo, PgCredentialSource, StaticCredentials};
pub use memory::MemoryJobStore;
pub use model::{JobStatus, NewReservationJob, ReservationJob};
pub use orchestrator::{AttemptOrchestrator, AttemptOutcome};
pub use repo::JobsRepo;
pub use scheduler::{Scheduler, SchedulerConfig, TickSummary};
pub use store::{JobStore, PgJobStore};
