pub mod driver;

pub use driver::MemoryDriver;
