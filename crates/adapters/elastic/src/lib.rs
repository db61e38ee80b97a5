//! adapter-elastic - Elasticsearch 适配器
//!
//! 基于 HTTP 的轻量客户端，只覆盖服务实际用到的接口。

mod client;

pub use client::*;
