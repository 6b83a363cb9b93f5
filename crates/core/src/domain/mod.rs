pub mod conversation;
pub mod memory;
pub mod schema;
pub mod tool_result;
