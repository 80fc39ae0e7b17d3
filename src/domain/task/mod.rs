// Task domain module
// Contains the task record, its value objects and log entries

#![allow(clippy::module_inception)]

pub mod task;
pub mod value_objects;

// Re-export main types for convenience
pub use task::{LogLevel, NewTask, Payload, StatusUpdate, Task, TaskLogEntry, TaskStats};
pub use value_objects::{Priority, TaskStatus, TaskType};
