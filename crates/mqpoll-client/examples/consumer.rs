//! Consume messages indefinitely, logging a line every batch.
//!
//! Run with: cargo run -p mqpoll-client --example consumer

use std::time::Instant;

use log::info;
use mqpoll_client::{EventKind, QoS, Session, SessionConfig, Timeout};

const BATCH_COUNT: usize = 500;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = SessionConfig::load("mqpoll.toml")?;
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&config.log.level))
        .init();

    let mut session = Session::new(config)?;
    session.start()?;
    session.subscribe("example/memory/#", QoS::AtLeastOnce)?;

    let mut count = 0;
    let mut batch_started = Instant::now();
    session.on(EventKind::Message, move |_| {
        count += 1;
        if count >= BATCH_COUNT {
            info!("Received {} messages in {:?}", count, batch_started.elapsed());
            count = 0;
            batch_started = Instant::now();
        }
    })?;

    loop {
        session.run_loop(Timeout::Protocol)?;
    }
}
