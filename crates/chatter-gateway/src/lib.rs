//! Real-time side of the chat server: who is connected, how a connection is
//! authenticated, and how one inbound line fans out to everyone.

pub mod auth;
pub mod broadcast;
pub mod connection;
pub mod hub;
pub mod message_log;
pub mod registry;

pub use hub::Hub;
