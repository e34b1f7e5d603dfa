//! Services Layer
//!
//! This module contains pure business logic extracted from HTTP handlers:
//! the per-device execution queue and the approval workflow built on it.

pub mod change_service;
pub mod device_queue;

// Re-export for convenience
pub use change_service::{BatchReport, ChangeService, ExecutionReport, SkippedChange};
pub use device_queue::{DeviceCommandQueue, ExecuteFn, ExecuteFuture, QueueHandle};
