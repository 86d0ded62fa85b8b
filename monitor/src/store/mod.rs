pub mod repository;
pub mod repository_sqlx;
pub mod store;

pub use repository::StateRepository;
pub use repository_sqlx::SqlxStateRepository;
pub use store::StateStore;
