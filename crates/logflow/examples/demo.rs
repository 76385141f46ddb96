//! Multi-quantum delivery demo: several producer threads flood a target
//! backed by stdout, and the per-stage counters are printed at the end.
//!
//! Run with: `cargo run -p logflow --example demo`

use logflow::{
    Level, MultiQuantumConfig, MultiQuantumTarget, Record, StdoutTarget, Target,
};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const PRODUCERS: usize = 4;
const RECORDS_PER_PRODUCER: usize = 250;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = MultiQuantumConfig {
        ring_buffer_size: 256,
        reader_count: 2,
        collect_period: Duration::from_millis(1),
        ..MultiQuantumConfig::default()
    };
    let target = Arc::new(
        MultiQuantumTarget::new(Arc::new(StdoutTarget::new()), config)
            .expect("valid configuration"),
    );
    target.start().expect("start target");

    let mut producers = Vec::new();
    for id in 0..PRODUCERS {
        let target = Arc::clone(&target);
        producers.push(thread::spawn(move || {
            for i in 0..RECORDS_PER_PRODUCER {
                target.write(Record::message(
                    Level::Info,
                    "demo",
                    format!("producer {id} record {i}"),
                ));
            }
        }));
    }
    for producer in producers {
        producer.join().unwrap();
    }

    target.flush().expect("synchronous flush");
    target.stop().expect("stop target");

    let stats = target.stats();
    println!(
        "accepted={} read={} funneled={} shipped={} dropped={}",
        stats.write_count, stats.read_count, stats.funnel_count, stats.ship_count,
        stats.drop_count
    );
}
