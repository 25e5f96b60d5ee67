/// Entry point of the NPU monitor.
///
/// Configuration is read from `NPU_MONITOR_*` environment variables and the log level from
/// `RUST_LOG`.
///
/// # Examples
///
/// ```bash
/// RUST_LOG=info NPU_MONITOR_CONTAINER_MODE=containerd cargo run
/// ```
#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    npu_monitor::run().await?;
    Ok(())
}
