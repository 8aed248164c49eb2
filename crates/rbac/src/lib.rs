//! RBAC engine and permission trie (§4.5).

mod engine;
mod trie;

pub use engine::{GrantMode, RbacEngine, RbacState, SubjectKind};
pub use trie::Trie;
