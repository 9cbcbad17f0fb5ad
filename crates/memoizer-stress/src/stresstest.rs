use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use memoizer::{Memoizer, MemoizerConfig};
use parking_lot::Mutex;
use sentry::SentryFutureExt;
use sketches_ddsketch::DDSketch;
use tokio::sync::Semaphore;

use crate::workloads::{WorkloadsConfig, process_call};

#[derive(Default)]
struct WorkloadStats {
    durations: DDSketch,
    failures: usize,
}

pub async fn perform_stresstest(
    memoizer_config: MemoizerConfig,
    workloads: WorkloadsConfig,
    duration: Duration,
) -> Result<()> {
    // every workload gets its own memoizer, so their dedup ratios can be told apart
    let workloads: Vec<_> = workloads
        .workloads
        .into_iter()
        .enumerate()
        .map(|(i, workload)| {
            let config = MemoizerConfig {
                name: format!("{}-{i}", memoizer_config.name),
                ..memoizer_config.clone()
            };
            let memoizer = Arc::new(Memoizer::<u64>::from_config(&config));
            (Arc::new(workload), memoizer)
        })
        .collect();

    // warmup: run each workload once to make sure caches are warm
    {
        tracing::info!(workloads = workloads.len(), "Warming up");
        let start = Instant::now();

        let futures = workloads.iter().map(|(workload, memoizer)| {
            let workload = Arc::clone(workload);
            let memoizer = Arc::clone(memoizer);
            tokio::spawn(async move {
                let computations = Arc::new(AtomicUsize::new(0));
                process_call(&memoizer, &workload, &computations).await;
            })
        });

        let _results = futures::future::join_all(futures).await;

        println!("Warmup: {:?}", start.elapsed());
    };
    println!();

    // run the workloads concurrently
    tracing::info!(?duration, "Running workloads");
    let mut tasks = Vec::with_capacity(workloads.len());
    for (workload, memoizer) in workloads.into_iter() {
        let start = Instant::now();
        let deadline = tokio::time::Instant::from_std(start + duration);
        let concurrency = workload.concurrency;

        let task = tokio::spawn(async move {
            let stats = Arc::new(Mutex::new(WorkloadStats::default()));
            let computations = Arc::new(AtomicUsize::new(0));
            let semaphore = Arc::new(Semaphore::new(concurrency));

            // See <https://docs.rs/tokio/latest/tokio/time/struct.Sleep.html#examples>
            let sleep = tokio::time::sleep_until(deadline);
            tokio::pin!(sleep);

            loop {
                if deadline.elapsed() > Duration::ZERO {
                    break;
                }
                tokio::select! {
                    permit = semaphore.clone().acquire_owned() => {
                        let workload = Arc::clone(&workload);
                        let memoizer = Arc::clone(&memoizer);
                        let stats = Arc::clone(&stats);
                        let computations = Arc::clone(&computations);
                        let task_start = Instant::now();

                        let hub = sentry::Hub::new_from_top(sentry::Hub::current());

                        let future = async move {
                            let succeeded = process_call(&memoizer, &workload, &computations).await;

                            let mut stats = stats.lock();
                            stats.durations.add(task_start.elapsed().as_secs_f64());
                            if !succeeded {
                                stats.failures += 1;
                            }

                            drop(permit);
                        };
                        let future = future.bind_hub(hub);

                        tokio::spawn(future);
                    }
                    _ = &mut sleep => {
                        break;
                    }
                }
            }

            // by acquiring *all* the semaphores, we essentially wait for all outstanding tasks to finish
            let _permits = semaphore.acquire_many(concurrency as u32).await;

            let stats = std::mem::take(&mut *stats.lock());
            let computations = computations.load(Ordering::Relaxed);

            (concurrency, stats, computations)
        });
        tasks.push(task);
    }

    let finished_tasks = futures::future::join_all(tasks).await;
    tracing::info!("Finished running workloads");

    for (i, task) in finished_tasks.into_iter().enumerate() {
        let (concurrency, stats, computations) = task?;
        let WorkloadStats {
            durations,
            failures,
        } = stats;

        let ops = durations.count();
        let ops_ps = ops as f32 / duration.as_secs_f32();
        println!("Workload {i} (concurrency: {concurrency}): {ops} operations, {ops_ps:.2} ops/s");

        if ops == 0 {
            continue;
        }
        let quantile = |q| {
            let secs = durations.quantile(q).ok().flatten().unwrap_or_default();
            Duration::from_secs_f64(secs)
        };
        let avg = Duration::from_secs_f64(durations.sum().unwrap_or_default() / ops as f64);
        let (p50, p90, p99) = (quantile(0.5), quantile(0.9), quantile(0.99));
        println!("  avg: {avg:.2?}; p50: {p50:.2?}; p90: {p90:.2?}; p99: {p99:.2?}");

        let dedup = 1.0 - computations as f64 / ops as f64;
        println!(
            "  computations: {computations} ({:.2}% deduplicated); failures: {failures}",
            dedup * 100.0
        );
    }

    Ok(())
}
