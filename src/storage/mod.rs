//! Physical storage: the block-packed heap file and record locators.

pub mod heap;
pub mod locator;

pub use heap::HeapFile;
pub use locator::Locator;
