//! adapter-kafka - Kafka 适配器
//!
//! 提供生产者和消费者的创建，以及带前缀的 topic / group 命名。

mod client;
mod config;

pub use client::*;
pub use config::*;
