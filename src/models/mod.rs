pub mod change_request;
pub mod device;
pub mod queue_entry;
