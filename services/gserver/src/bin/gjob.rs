//! 任务入口：`gjob <job> --commonConfigPath .. --configPath .. --secretsPath .. [job flags]`

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let registry = campus_gserver::registry();
    let matches = registry.job_command().get_matches();
    registry.dispatch_job(&matches).await?;
    Ok(())
}
