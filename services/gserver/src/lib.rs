//! campus-gserver - 服务与任务入口
//!
//! 所有服务和批处理任务在这里注册，由 `gserver` / `gjob` 两个二进制分发。

mod heartbeat;
mod jobs;

use std::sync::Arc;

use campus_bootstrap::{CommandRegistry, DefaultMonitor, JobFlags, ServiceDescriptor};

pub use heartbeat::{HeartbeatConfig, HeartbeatServer, HeartbeatSection};

/// 构建包含全部服务与任务的注册表
pub fn registry() -> CommandRegistry {
    let mut registry = CommandRegistry::new();

    let heartbeat = Arc::new(HeartbeatServer::default());
    registry.register_service(
        ServiceDescriptor::new(heartbeat.clone())
            .with_http(heartbeat)
            .with_monitor(Arc::new(DefaultMonitor)),
    );

    registry.register_job_with_flags(
        "resolve_address",
        JobFlags::new()
            .string_var("target", "", "service to resolve")
            .string_var("protocol", "grpc", "grpc or http")
            .bool_var("force", false, "always use the cluster-wide domain name"),
        jobs::resolve_address,
    );
    registry.register_job_with_flags(
        "check_database",
        JobFlags::new().string_var("database", "", "database name, defaults to the service name"),
        jobs::check_database,
    );

    registry
}
