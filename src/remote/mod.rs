//! Remote access: serve a [`Manager`](crate::Manager) over TCP and call it
//! back through a client implementing the same trait.

pub mod client;
pub mod protocol;
pub mod server;
