//! signalswarm — peer-to-peer swarm formation over a shared signaling hub
//!
//! Participants that can initially only reach each other through a
//! topic-addressed broadcast relay (the [`hub::SignalingHub`]) discover one
//! another, elect an initiator for every pairwise connection, relay the
//! handshake payloads needed to establish a direct transport (the opaque
//! [`connection::Connection`] capability), and keep re-announcing with
//! jitter until a configured capacity is reached.
//!
//! ```no_run
//! use std::sync::Arc;
//! use signalswarm_core::connection::sim::SimConnector;
//! use signalswarm_core::hub::memory::MemoryHub;
//! use signalswarm_core::{Swarm, SwarmConfig, SwarmEvent};
//!
//! # async fn run() -> Result<(), signalswarm_core::SwarmError> {
//! let hub = MemoryHub::new();
//! let swarm = Swarm::join(
//!     Arc::new(hub.client()),
//!     Arc::new(SimConnector::new()),
//!     SwarmConfig::default(),
//! )
//! .await?;
//! let mut events = swarm.events();
//! while let Ok(event) = events.recv().await {
//!     if let SwarmEvent::PeerConnected { remote_id, .. } = event {
//!         println!("connected to {remote_id}");
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod connection;
pub mod hub;
pub mod identity;
pub mod protocol;
pub mod swarm;

pub use connection::{ConnectOptions, Connection, ConnectionEvent, Connector};
pub use hub::{HubError, SignalingHub, Subscription};
pub use protocol::{SignalMessage, Transform, BROADCAST_TOPIC};
pub use swarm::{PeerRole, PeerState, Swarm, SwarmConfig, SwarmError, SwarmEvent};
