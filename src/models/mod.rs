pub mod queue_item;

pub use queue_item::{Completion, Diagnostics, NewQueueItem, QueueItem, QueueStatus};
