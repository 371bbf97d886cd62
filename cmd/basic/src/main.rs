//! Basic loopvisor example
//!
//! Starts a process worker that streams numbers to the parent, pauses and
//! resumes it, then hard-stops it. A second, thread worker faults on
//! purpose to show how errors come back.
//!
//! # Environment Variables
//!
//! - `LVR_LOG_LEVEL=debug` - Global log level (off, error, warn, info, debug, trace)
//! - `LVR_LOG_PID=1` - Tag log lines with the writing process id
//! - `LVR_MIN_ITERATION_MS=5` - Minimum duration of one pass

use std::thread;
use std::time::Duration;

use loopvisor::{drain, from_fn, print_exception, BodyResult, Channel, LoopScope};
use loopvisor::{kinfo, ProcessQueue, ProcessWorker, ThreadQueue, ThreadWorker, WorkerConfig};

// LVR_LOG_LEVEL=debug LVR_LOG_PID=1 cargo run -p loopvisor-basic
fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("=== loopvisor Basic Example ===\n");

    // Process worker feeding a cross-process queue
    let numbers = ProcessQueue::<u64>::new()?;
    let producer = numbers.clone();
    let body = from_fn(move |scope: &mut LoopScope<'_>| -> BodyResult {
        producer.put(scope.index() * scope.index())?;
        Ok(())
    });

    let mut worker = ProcessWorker::with_config(body, ProcessQueue::error_channel()?, WorkerConfig::from_env())?
        .named("squares");
    worker.start()?;
    kinfo!("started {}", worker.describe());

    thread::sleep(Duration::from_millis(100));
    worker.pause();
    thread::sleep(Duration::from_millis(20));
    let first = drain(&numbers);
    println!("received {} values before pause, last = {:?}", first.len(), first.last());

    thread::sleep(Duration::from_millis(100));
    println!("queue empty while paused: {}", numbers.is_empty());

    worker.resume();
    thread::sleep(Duration::from_millis(100));

    let report = worker.hard_stop(Some(Duration::from_secs(2)))?;
    let rest = drain(&numbers);
    println!(
        "received {} more values, {} iterations total, joined = {}",
        rest.len(),
        worker.iterations(),
        report.joined
    );

    // Thread worker that faults on its third pass
    let body = from_fn(|scope: &mut LoopScope<'_>| -> BodyResult {
        if scope.index() == 2 {
            let parsed: u32 = "three".parse()?;
            return Err(format!("unreachable: {}", parsed).into());
        }
        Ok(())
    });
    let mut faulty = ThreadWorker::with_config(body, ThreadQueue::error_channel(), WorkerConfig::from_env())?;
    faulty.start()?;
    let status = faulty.join()?;
    let report = faulty.hard_stop(None)?;

    println!("\nfaulty worker exited with status {}", status);
    for (i, fault) in report.fatal_error_reporter.iter().enumerate() {
        print_exception(fault, i);
    }

    println!("\n=== Example Complete ===");
    Ok(())
}
