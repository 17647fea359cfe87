//! Client core for the `CareLink` telehealth signaling protocol.
//!
//! The entry point is [`session::Session`]: a persistent, reconnecting
//! connection to the backend with request/ack correlation. On top of it sit
//! [`calls::CallController`] for call signaling and [`chat::ChatClient`]
//! for the chat protocol. Credentials live behind the
//! [`storage::CredentialStore`] seam so embedders can plug in the platform
//! key-value store.

pub mod calls;
pub mod chat;
pub mod config;
pub mod error;
pub mod logging;
pub mod session;
pub mod storage;
pub mod transport;
