mod engine;
mod errors;
mod models;
mod persist;
mod repository;

pub use crate::engine::{EngineConfig, StorageEngine};
pub use crate::errors::{StoreError, StoreResult};
pub use crate::models::{Catalog, Item, ItemDraft};
pub use crate::persist::AtomicJsonWriter;
pub use crate::repository::ItemRepository;
