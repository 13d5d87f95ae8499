//! Remote archive discovery: where an entity lives, which files it has,
//! and which file represents each cycle.

pub mod layout;
pub mod listing;
pub mod locator;
pub mod resolver;

pub use layout::EntityLayout;
pub use listing::FileLister;
pub use locator::ArchiveLocator;
pub use resolver::{resolve, ResolvedFile, VariantTag};
