pub mod error;
pub mod gateway;
pub mod memory;
pub mod models;
pub mod pool;
pub mod postgres;

pub use error::MenuError;
pub use gateway::{CreateCategory, CreateLabel, MenuGateway, OperatorId, UpdateCategory, UpdateLabel};
pub use memory::MemoryMenuGateway;
pub use models::*;
pub use pool::DbPool;
pub use postgres::PgMenuGateway;
