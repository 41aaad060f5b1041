//! Client-side orchestration for a pool of remote audio nodes.
//!
//! The crate is organized leaves first:
//!
//! - [`node`]: one websocket connection per backend node, its load score
//!   and its table of hosted rooms.
//! - [`link`]: the per-room voice handshake between the platform gateway
//!   and the hosting node, including node-to-node migration.
//! - [`player`]: the per-room playback surface and event stream.
//! - [`registry`]: the node pool, load-aware selection and failover.
//!
//! The platform gateway is abstracted behind [`VoiceGateway`].

pub mod filters;
pub mod gateway;
pub mod link;
pub mod node;
pub mod player;
pub mod protocol;
pub mod registry;
pub mod rest;

#[cfg(test)]
pub(crate) mod testing;

pub use filters::{EqualizerBand, FilterSettings};
pub use gateway::{VoiceGateway, VoiceServerFragment, VoiceStateFragment, VoiceStateRequest};
pub use link::{JoinOptions, VoiceLink};
pub use node::{NodeConnection, NodeSignal};
pub use player::{PlayOptions, PlaybackState, Player, PlayerEvent};
pub use protocol::{Command, NodeStats, TrackEndReason};
pub use registry::{NodeRegistry, RegistryEvent};
pub use rest::{LatencySource, LoadTracksResponse, NodeRest, SearchSource};
