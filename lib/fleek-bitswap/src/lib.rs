//! Bitswap 1.2.0 block fetching for [`fleek_ipld`] traversals.
//!
//! A [`WantCoordinator`] talks to one peer over a [`Network`] and implements
//! [`fleek_ipld::BlockSource`], so it can be handed straight to a `DagWalker`.
pub mod codec;
pub mod config;
pub mod coordinator;
pub mod errors;
pub mod message;
pub mod network;
pub mod prefix;
mod proto;


pub use config::Config;
pub use coordinator::WantCoordinator;
pub use errors::BitswapError;
pub use message::{BlockPayload, BlockPresence, Entry, Message, Wantlist};
pub use network::{InboundHandler, Network};
pub use prefix::Prefix;
