//! Polling example - handlers plus explicit loop control.
//!
//! Run with: cargo run -p mqpoll-client --example polling
//!
//! Connection settings come from `mqpoll.toml` if present, overridden by
//! `MQPOLL__*` environment variables (e.g. `MQPOLL__ENDPOINT=mqtt://host:1883`).

use std::time::Duration;

use mqpoll_client::{Event, EventKind, QoS, Session, SessionConfig, Timeout};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = SessionConfig::load("mqpoll.toml")?;
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&config.log.level))
        .init();

    let mut session = Session::new(config)?;
    println!("Connecting to {}:{}...", session.host(), session.port());
    session.start()?;
    println!("Connected as {}", session.client_id());

    // Stop after the first message comes back to us
    let breaker = session.breaker();
    session.on_event(EventKind::Message, move |event| {
        if let Event::Message {
            topic,
            payload,
            qos,
            retained,
        } = event
        {
            println!(
                "Message: {} -> {} (QoS={:?}, retained={})",
                topic,
                String::from_utf8_lossy(payload),
                qos,
                retained
            );
            breaker.break_loop();
        }
    })?;

    session.subscribe("example/polling/#", QoS::AtLeastOnce)?;
    println!("Subscribed");

    session.publish(
        "example/polling/hello",
        "Hello from polling session!",
        QoS::AtLeastOnce,
        false,
    )?;
    println!("Publish acknowledged");

    // Other work can happen between ticks
    for tick in 0..10 {
        session.run_immediate()?;
        if session.pending_events() == 0 {
            println!("Tick {}: idle", tick);
        }
        std::thread::sleep(Duration::from_millis(50));
    }

    session.run_loop(Timeout::from_secs_f64(5.0))?;
    session.close()?;
    println!("Disconnected");
    Ok(())
}
