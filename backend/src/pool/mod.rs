pub mod allocator;
pub mod memory;
pub mod model;
pub mod reconciler;
pub mod repository;
pub mod repository_sqlx;

pub use allocator::Allocator;
pub use reconciler::Reconciler;
