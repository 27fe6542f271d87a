//! Core of a PVR integration that speaks HTSP (Home Tv Streaming Protocol)
//! to a Tvheadend server: the binary message codec, the async RPC client
//! that multiplexes caller-initiated calls with server-initiated events
//! over one TCP connection, the recording-synchronization manager, and the
//! virtual-file streamer adaptor.
//!
//! The surrounding media-server framework (container model, task queue,
//! hook broker, settings store, database layer) is out of scope and is
//! consumed here only through the narrow traits in [`collab`].
//!
//! # Example
//!
//! ```rust,no_run
//! use htsp_pvr_core::config::Config;
//! use htsp_pvr_core::rpc::client::HtspClient;
//!
//! # async fn example() -> htsp_pvr_core::Result<()> {
//! let config = Config::default();
//! let client = HtspClient::new(config);
//! let name = client.get_server_name().await?;
//! println!("connected to {name}");
//! # Ok(())
//! # }
//! ```

pub mod collab;
pub mod config;
pub mod error;
pub mod htsmsg;
pub mod manager;
pub mod rpc;
pub mod streamer;
pub mod transport;

pub use error::{Error, Result};
pub use htsmsg::Value;
