pub mod factory;
pub mod file;
pub mod memory;

pub use factory::create_checkpoint_store;
pub use file::JsonFileCheckpointStore;
pub use memory::MemoryCheckpointStore;
