mod in_memory_lecture_store;
mod lecture_photo_service;
mod reconciliation;

pub use in_memory_lecture_store::*;
pub use lecture_photo_service::*;
pub use reconciliation::*;
