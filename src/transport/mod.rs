pub mod doh;
pub mod front;
pub mod fronted;
pub mod retry;

pub use doh::DohResolver;
pub use front::{FrontSpec, HostPattern};
pub use fronted::{FrontedRequest, FrontedTransport, TransportOptions};
pub use retry::RetryPolicy;
