pub mod manager;
pub mod postgres;
pub mod schema;
pub mod sqlite;

pub use manager::{DatabaseManager, DatabasePool, DatabaseType};
pub use postgres::{
    PostgresGradientRepository, PostgresJobRepository, PostgresTaskRepository,
    PostgresWorkerRepository,
};
pub use sqlite::{
    SqliteGradientRepository, SqliteJobRepository, SqliteTaskRepository, SqliteWorkerRepository,
};
