//! termwire-test-utils: Test infrastructure for termwire.
//!
//! Provides:
//! - MockTransportFactory: in-memory transport that records opens and frames
//! - frames: builders for gateway-side frames (auth, PONG, responses)

pub mod frames;
mod mock_transport;

pub use mock_transport::MockTransportFactory;
