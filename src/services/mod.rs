pub mod error_service;
pub mod mapping_service;
pub mod migration_service;

pub use error_service::{ErrorService, NewError, RetryOutcome};
pub use mapping_service::{ApplyError, MappingService};
pub use migration_service::{
    CreateProjectRequest, LogProgressReporter, MigrationService, ProgressReporter, Schedule,
};
