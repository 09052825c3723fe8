pub mod codec;
pub mod ports;
pub mod transport;

pub use ports::PortPool;
pub use transport::{RemoteInput, RemoteOutput};
