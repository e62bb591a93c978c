//! Clients for the remote scoring and image-analysis oracles.

pub mod imaging;
pub mod scorer;
