mod file;
mod memory;
mod store;

pub use file::FileKv;
pub use memory::MemoryKv;
pub use store::{KvError, KvStore, Record};
