use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use tagbus::{init_logging, EventBus, Listener, Settings};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let settings = Settings::load()?;
    init_logging(settings.logging.clone())?;

    println!("=== Tag fan-out ===\n");

    let bus = EventBus::with_config(settings.bus);
    let received = Arc::new(AtomicUsize::new(0));

    for name in ["display", "archive", "alarm"] {
        let received = received.clone();
        bus.add_listen(
            "sensors/temp",
            Listener::new(move |env| {
                received.fetch_add(1, Ordering::Relaxed);
                let value = env
                    .payload
                    .as_json()
                    .and_then(|v| v["value"].as_f64())
                    .ok_or("payload without a numeric value")?;
                if name == "alarm" && value > 30.0 {
                    println!("[{name}] too hot: {value}");
                } else {
                    println!("[{name}] {value}");
                }
                Ok(())
            }),
        )?;
    }

    for value in [21.5, 34.0] {
        bus.send_payload("sensors/temp", serde_json::json!({ "value": value }))?;
    }

    // ошибка слушателя не мешает остальным и возвращается отправителю
    if let Err(e) = bus.send_payload("sensors/temp", "garbage") {
        println!("\nfirst listener error: {e}");
    }

    bus.send_payload("sensors/humidity", "nobody listens")?;

    let stats = bus.stats();
    println!(
        "\nreceived={} sends={} deliveries={} failures={}",
        received.load(Ordering::Relaxed),
        stats.sends,
        stats.deliveries,
        stats.listener_failures
    );

    Ok(())
}
