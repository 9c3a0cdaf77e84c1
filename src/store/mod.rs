//! In-memory storage collaborators.
//!
//! Nothing here survives a restart. The task store sits behind the
//! [`TaskRepository`] trait so that handlers do not depend on the backing
//! implementation.

pub mod tasks;
pub mod users;

pub use tasks::{InMemoryTaskStore, TaskRepository};
pub use users::UserStore;
