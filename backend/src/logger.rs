use std::time::Duration;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

pub fn init_tracing(json: bool) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let base = fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .with_file(true)
        // Includes timing when the span closes
        .with_span_events(fmt::format::FmtSpan::CLOSE)
        // stdout carries price updates
        .with_writer(std::io::stderr);

    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(base.json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(base.pretty())
            .init();
    }
}

pub async fn warn_if_slow<F, T>(label: &'static str, max: Duration, fut: F) -> T
where
    F: std::future::Future<Output = T>,
{
    let start = std::time::Instant::now();
    let out = fut.await;
    let elapsed = start.elapsed();
    if elapsed > max {
        tracing::warn!(
            target: "performance",
            label = label,
            elapsed_ms = elapsed.as_millis() as u64,
            "slow operation detected"
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn passes_through_output() {
        let slow = warn_if_slow("sleepy", Duration::from_millis(1), async {
            std::thread::sleep(Duration::from_millis(5));
            7
        })
        .await;
        let fast = warn_if_slow("quick", Duration::from_secs(60), async { 1 }).await;

        assert_eq!((slow, fast), (7, 1));
    }
}
