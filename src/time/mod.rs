//! Asynchronous time utilities.

mod sleep;
pub use sleep::{Sleep, sleep, sleep_until};
