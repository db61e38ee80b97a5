//! adapter-nats - NATS JetStream 适配器

mod connection;

pub use connection::*;
