pub mod admin;
pub mod aggregate;
pub mod benchmark;
pub mod cli;
pub mod client;
pub mod config;
pub mod logging;
pub mod metrics;
pub mod probe;
pub mod progress;
pub mod prompt;
pub mod registry;
pub mod report;
pub mod round;
pub mod scheduler;
pub mod store;

pub use aggregate::{Aggregation, FlaggedResult, ProviderSummary, aggregate};
pub use benchmark::{BenchmarkRun, BenchmarkRunner, RoundResults, StartOutcome, TOTAL_ROUNDS};
pub use cli::Cli;
pub use client::{ClientConfig, ClientError, Completion, ProviderClient};
pub use config::{Config, ProviderConfig};
pub use metrics::{Metrics, ProbeStatus};
pub use probe::{Failure, Measured, ProbeResult};
pub use progress::{Progress, ProgressSnapshot, RunStatus};
pub use prompt::PromptTemplate;
pub use registry::{ProviderRegistry, RegistryError};
pub use round::RoundCoordinator;
pub use store::{RunEntry, RunStore, StoredRun};
