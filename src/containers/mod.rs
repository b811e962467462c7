//! Lookup containers for structure-keyed engine state.
//!
//! [`BalancedMap`] is the write-once container for collections rebuilt
//! wholesale when their owning structure changes (a framebuffer's named
//! attachments, a node's per-child semaphores). [`ArrayMap`] is the
//! incremental sibling for collections that mutate entry by entry.

pub mod array;
pub mod balanced;

pub use array::ArrayMap;
pub use balanced::{BalancedMap, LookupMiss};
