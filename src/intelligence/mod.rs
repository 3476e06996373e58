pub mod compute;
pub mod io;
pub mod lifecycle;

pub use compute::*;
pub use io::*;
pub use lifecycle::*;
