pub mod naming;
pub mod seek;
pub mod tail;

pub use naming::{hour_stamp, hourly_file, Clock, ManualClock, SystemClock};
pub use seek::{SeekPolicy, Whence};
pub use tail::{Tail, TailConfig, TailError};
