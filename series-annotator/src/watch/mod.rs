//! Asynchronous views over document change notifications.

pub mod signal;
pub mod waiter;

pub use signal::{ChangeBatch, ChangeSignal};
pub use waiter::ElementWaiter;
