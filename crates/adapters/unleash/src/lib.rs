//! adapter-unleash - Unleash 特性开关客户端

mod client;

pub use client::*;
