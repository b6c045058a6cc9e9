//! A minimal Rust client for TStorage.
//!
//! TStorage stores records under five-part [`record::Key`]s and talks a
//! framed, little-endian binary protocol over TCP or TLS. This crate ships
//! the client in two flavours with identical semantics, an async
//! [`channel::Channel`] and a blocking [`channel::blocking::Channel`], plus
//! the reference [`mock`] server used by the integration tests.
//!
//! ```no_run
//! use tstorage_client::{BytesPayloadType, Channel, Key, Record};
//!
//! #[tokio::main]
//! async fn main() {
//!     let mut channel = Channel::new("127.0.0.1", 2090, BytesPayloadType);
//!     assert!(channel.connect().await.is_ok());
//!
//!     let records = vec![Record::new(Key::new(0, 12, 0, 10, -1), b"314".to_vec())];
//!     assert!(channel.put(&records).await.is_ok());
//!
//!     let response = channel.get(Key::MIN, Key::MAX).await;
//!     for record in &response.data {
//!         println!("{:?} = {:?}", record.key, record.value);
//!     }
//!
//!     channel.close().await;
//! }
//! ```
//!
//! Request outcomes are returned as [`response`] values rather than errors;
//! a failed get closes the connection, and whatever was parsed before the
//! failure is still handed back.

#![deny(rustdoc::broken_intra_doc_links, rust_2018_idioms)]

pub mod channel;
mod connection;
pub mod mock;
pub mod payload;
pub mod protocol;
pub mod record;
pub mod response;
pub mod timestamp;

pub use channel::{Channel, ChannelBuilder, GetItem, GetIter, PutOptions};
pub use connection::TlsConfig;
pub use payload::{BytesPayloadType, PayloadType, ScalarPayloadType, UnitPayloadType};
pub use record::{Key, Record};
pub use response::{Response, ResponseAcq, ResponseGet, ResponseStatus};
