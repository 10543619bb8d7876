//! Publish batches of messages indefinitely, logging throughput between
//! batches. Pair with the `consumer` example to watch memory over time.
//!
//! Run with: cargo run -p mqpoll-client --example publisher

use std::time::{Duration, Instant};

use log::info;
use mqpoll_client::{QoS, Session, SessionConfig};

const BATCH_COUNT: usize = 500;
const SLEEP_TIME: Duration = Duration::from_millis(100);

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = SessionConfig::load("mqpoll.toml")?;
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&config.log.level))
        .init();

    let mut session = Session::new(config)?;
    session.start()?;
    info!("Publishing batches of {} to example/memory/#", BATCH_COUNT);

    loop {
        let batch: Vec<(String, String)> = (0..BATCH_COUNT)
            .map(|i| (format!("example/memory/{}", i), format!("message {} ", i).repeat(100)))
            .collect();

        let started = Instant::now();
        session.publish_many(batch, QoS::AtLeastOnce, false)?;
        info!(
            "Published {} messages in {:?} ({} events pending)",
            BATCH_COUNT,
            started.elapsed(),
            session.pending_events()
        );

        session.run_loop(SLEEP_TIME)?;
    }
}
