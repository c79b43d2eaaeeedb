//! HTTP transport used by the pool client to talk to a relayer. Requests can be
//! routed through Tor so the relayer never learns the withdrawer's IP address.
//!
//! ```rust,no_run
//! use privpool_transport::{Config, HttpClient};
//!
//! #[tokio::main]
//! async fn main() -> privpool_transport::Result<()> {
//!     let client = HttpClient::new(Config::tor())?;
//!     let is_tor = client.verify_tor_connection().await?;
//!     println!("Routed through Tor: {}", is_tor);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod http_client;

pub use config::{Config, DEFAULT_TOR_SOCKS_ADDR};
pub use error::{Result, TransportError};
pub use http_client::{HttpClient, JsonReply};
