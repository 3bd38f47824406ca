//! Network collaborator: the transport the engine falls back from.

mod client;
mod types;

pub use client::{HttpNetwork, Network};
pub use types::{Request, Response, OFFLINE_BODY, OFFLINE_STATUS};

#[cfg(test)]
pub use client::mock::MockNetwork;
