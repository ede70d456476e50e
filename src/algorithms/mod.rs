//! Counting algorithms behind the request throttle.

pub mod sliding_window;

pub use sliding_window::SlidingWindow;
