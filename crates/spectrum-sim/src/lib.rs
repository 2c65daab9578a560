//! Spectrum Simulator Engine
//!
//! A TCP broadcast server that stands in for a shared radio spectrum. Clients
//! tune to a numbered channel with Listen and transmit with Send; every
//! listener of that channel receives the payload, stamped with the time the
//! server saw it.
//!
//! # Architecture
//!
//! - Each active channel is an actor task owning its listener table
//!   ([`channel`]). All traffic for a channel is serialized through its
//!   mailbox.
//! - A [`ChannelRegistry`] maps channel ids to actors. Actors are created on
//!   the first Listen and stopped when the last listener leaves.
//! - Every client socket gets a [`Connection`] handler: a read loop plus a
//!   writer task draining a capacity-1 queue. Slow listeners lose frames
//!   instead of stalling the channel.
//! - Nothing crashes on bad input. Failures go to an [`ErrorSink`] and are
//!   logged by a single task.
//!
//! # Example
//!
//! ```rust,no_run
//! use spectrum_sim::{ServerConfig, SpectrumClient, SpectrumServer};
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let server = SpectrumServer::bind(ServerConfig::default().port(0)).await?;
//! let addr = server.local_addr()?;
//! tokio::spawn(async move { server.run().await });
//!
//! let mut rx = SpectrumClient::connect(addr).await?;
//! rx.listen(37).await?;
//!
//! let mut tx = SpectrumClient::connect(addr).await?;
//! tx.send(37, b"foo".to_vec()).await?;
//!
//! let response = rx.recv().await?;
//! assert_eq!(response.data, b"foo");
//! # Ok(())
//! # }
//! ```

pub mod channel;
pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod events;
pub mod registry;
pub mod server;

pub use channel::{
    listener_sink, run_channel_actor, ChannelCommand, ChannelHandle, ListenerSink,
    ListenerStream, SubscriptionKey, BROADCAST_QUEUE_CAPACITY, LISTENER_QUEUE_CAPACITY,
};
pub use client::SpectrumClient;
pub use config::{ServerConfig, DEFAULT_PORT};
pub use connection::Connection;
pub use error::SimError;
pub use events::{run_error_logger, ErrorReceiver, ErrorReport, ErrorSink};
pub use registry::ChannelRegistry;
pub use server::SpectrumServer;

// Re-export the wire types clients need
pub use spectrum_protocol::{Request, RequestType, Response, MAX_CHANNEL, MAX_DATA_SIZE};
