use crate::{config::Settings, report};
use anyhow::Result;
use std::time::Instant;

pub fn bench(settings: Settings) -> Result<()> {
    let benchmark = settings.benchmark();
    let operation = settings.operation.build();
    let idle = settings.idle.build();

    println!(
        "{} threads, load is {:.0} msg/sec, using {} idle strategy",
        settings.workers, settings.throughput, settings.idle,
    );
    tracing::info!(
        operation = %settings.operation,
        duration = ?settings.duration,
        warmup = ?settings.warmup,
        "starting benchmark",
    );

    let start = Instant::now();
    let result = benchmark.run(operation, idle)?;

    report::print(&result)?;
    report::print_summary(&result);

    if settings.write_reports {
        for path in report::write_reports(&result, &settings.out_dir)? {
            tracing::info!(path = %path.display(), "report written");
        }
    }

    println!("Test duration: {:?}", start.elapsed());
    Ok(())
}
