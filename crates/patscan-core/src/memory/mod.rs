mod reader;

#[cfg(test)]
pub mod mock;

pub use reader::{LocalMemory, ReadMemory, SliceMemory};

#[cfg(test)]
pub use mock::{MockMemoryBuilder, MockMemoryReader};
