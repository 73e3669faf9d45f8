pub mod postgres_gradient_repository;
pub mod postgres_job_repository;
pub mod postgres_task_repository;
pub mod postgres_worker_repository;

pub use postgres_gradient_repository::PostgresGradientRepository;
pub use postgres_job_repository::PostgresJobRepository;
pub use postgres_task_repository::PostgresTaskRepository;
pub use postgres_worker_repository::PostgresWorkerRepository;
