pub mod task;
pub mod user;

pub use task::{StatusUpdate, Task, TaskInput, TaskStatus};
pub use user::{Role, Team, User};
