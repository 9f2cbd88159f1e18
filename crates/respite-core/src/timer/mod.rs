mod set;

pub use set::{Fired, TimerSet};
