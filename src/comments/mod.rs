pub mod tree;

pub use tree::{build_tree, CommentNode};
