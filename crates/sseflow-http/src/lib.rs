//! # sseflow HTTP Transport
//!
//! A [`Transport`](sseflow_transport_traits::Transport) implementation on top
//! of `reqwest`. It streams response bodies chunk by chunk, applies the
//! request-level timeout, and cancels in-flight attempts by aborting the task
//! that drives them.
//!
//! ```rust,no_run
//! use sseflow_http::{HttpTransport, HttpTransportConfig};
//! use sseflow_transport_traits::{Transport, TransportRequest, TransportSignal};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let transport = HttpTransport::new(HttpTransportConfig::default())?;
//! let mut connection = transport
//!     .open(TransportRequest::new("https://example.com/events"))
//!     .await?;
//!
//! while let Some(signal) = connection.next_signal().await {
//!     if let TransportSignal::Chunk(bytes) = &signal {
//!         println!("{} bytes", bytes.len());
//!     }
//!     if signal.is_terminal() {
//!         break;
//!     }
//! }
//! # Ok(())
//! # }
//! ```

#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub,
    clippy::all
)]
#![deny(unsafe_code)]
#![cfg_attr(docsrs, feature(doc_cfg))]

mod transport;

pub use transport::{HttpRequestHandle, HttpTransport, HttpTransportConfig};
