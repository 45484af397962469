pub mod base;
pub mod download;
pub mod logging;
pub mod transport;

pub use base::*;
pub use download::*;
pub use logging::*;
pub use transport::*;
