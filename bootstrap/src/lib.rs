//! campus-bootstrap - 统一服务启动骨架
//!
//! 服务声明自己的能力钩子，启动器负责加载配置、初始化共享资源、
//! 组装 gRPC / HTTP 服务端、监听以及优雅关闭。批处理任务复用同一套
//! 配置与资源初始化流程。

mod bootstrapper;
mod command;
mod connector;
mod grpc;
mod http;
mod initializer;
mod registry;
mod resources;
mod runtime;
mod servicer;

pub use bootstrapper::*;
pub use command::*;
pub use connector::*;
pub use grpc::{
    GrpcInterceptor, GrpcPlan, GrpcServerOptions, InterceptorChain, REQUEST_ID_KEY,
    request_id_interceptor,
};
pub use http::HttpPlan;
pub use initializer::*;
pub use registry::*;
pub use resources::*;
pub use runtime::{SHUTDOWN_GRACE, cancel_on_signal, shutdown_signal};
pub use servicer::*;
