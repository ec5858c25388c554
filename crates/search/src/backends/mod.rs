//! Document store backends.
//!
//! | Backend        | Feature         | Use                                   |
//! |----------------|-----------------|---------------------------------------|
//! | Memory         | always          | tests, embedded use, local tooling    |
//! | Elasticsearch  | `elasticsearch` | production                            |

pub mod memory;

#[cfg(feature = "elasticsearch")]
pub mod elasticsearch;

pub use memory::MemoryStore;
