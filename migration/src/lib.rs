pub use sea_orm_migration::prelude::*;

mod m20260201_000001_create_operations;
mod m20260203_000001_add_operations_status_index;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20260201_000001_create_operations::Migration),
            Box::new(m20260203_000001_add_operations_status_index::Migration),
        ]
    }
}
