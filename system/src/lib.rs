mod arch;
mod hardware;

pub use crate::arch::*;
pub use crate::hardware::*;
