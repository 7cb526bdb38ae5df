pub use sea_orm_migration::prelude::*;

mod m20261001_000001_create_credentials;
mod m20261001_000002_create_requests;
mod m20261001_000003_create_activation_jobs;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20261001_000001_create_credentials::Migration),
            Box::new(m20261001_000002_create_requests::Migration),
            Box::new(m20261001_000003_create_activation_jobs::Migration),
        ]
    }
}
