pub mod config;
pub mod error;
pub mod fs;
pub mod store;

pub use config::load_config;
pub use config::Config;

pub use error::{GridFuseError, Result};

pub use fs::GridFs;

pub use store::{LocalFsStore, MemoryStore, ObjectId, ObjectMeta, ObjectStore};
