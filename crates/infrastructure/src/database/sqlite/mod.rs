pub mod sqlite_gradient_repository;
pub mod sqlite_job_repository;
pub mod sqlite_task_repository;
pub mod sqlite_worker_repository;

pub use sqlite_gradient_repository::SqliteGradientRepository;
pub use sqlite_job_repository::SqliteJobRepository;
pub use sqlite_task_repository::SqliteTaskRepository;
pub use sqlite_worker_repository::SqliteWorkerRepository;
