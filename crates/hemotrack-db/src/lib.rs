pub mod config;
pub mod database;
pub mod inventory_repository;
pub mod run_repository;

pub use config::DatabaseConfig;
pub use database::Database;
pub use inventory_repository::InventoryRepository;
pub use run_repository::RunRepository;
