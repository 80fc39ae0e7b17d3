// HTTP handlers, one module per resource

pub mod agents;
pub mod memory;
pub mod system;
pub mod tasks;
