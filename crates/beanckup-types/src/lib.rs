pub mod manifest;
pub mod node;
pub mod plan;

pub use manifest::Manifest;
pub use node::FileNode;
pub use plan::{Episode, EpisodeStatus, Plan};
