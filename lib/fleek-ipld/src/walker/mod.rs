mod blocks;
pub mod content;
pub mod memory;
pub mod path;
pub mod search;
pub mod stream;

pub use content::UnixFsEntry;
pub use memory::MemoryBlockSource;
pub use path::{DagPath, DagScope, PathOptions};
pub use search::{GraphSelector, LinkFilter, LinkPredicate, Order};
pub use stream::{BlockStream, DagWalker, GetOptions};
