pub mod mock;
pub mod sse;
pub mod transport;

pub use mock::{MockResponse, MockTransport};
pub use transport::{ResponsesTransport, TransportConfig};
