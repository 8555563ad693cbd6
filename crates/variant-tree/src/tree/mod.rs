//! 局面ツリーとその永続化

mod codec;
mod node;
mod store;

pub use codec::{FORMAT_MAGIC, FORMAT_VERSION};
pub use node::{Node, NodeId, ROOT};
pub use store::TreeStore;
