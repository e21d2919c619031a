pub mod field_mappings;
pub mod migration_errors;
pub mod migration_projects;
pub mod object_types;

pub use field_mappings::Entity as FieldMappings;
pub use migration_errors::Entity as MigrationErrors;
pub use migration_projects::Entity as MigrationProjects;
pub use object_types::Entity as ObjectTypes;
