use std::{sync::Arc, time::Duration};

use tagbus::{
    init_logging, Bridge, BridgeConfig, CorrelationRouter, DeliveryMode, EventBus,
    LocalTransport, Payload, RequestError, Responder, Settings,
};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let settings = Settings::load()?;
    init_logging(settings.logging.clone())?;

    println!("=== Request/reply over the loopback transport ===\n");

    let bus = Arc::new(EventBus::with_config(settings.bus.clone()));
    let transport = Arc::new(LocalTransport::new());

    // ответы из транспорта попадают в шину, рассылка идёт в отдельном потоке
    let _bridge = Bridge::attach_with_config(
        bus.clone(),
        transport.clone(),
        &format!("**/{}/*", settings.router.reply_segment),
        BridgeConfig {
            mode: DeliveryMode::Worker,
            ..settings.bridge.clone()
        },
    )?;

    let _responder = Responder::bind(transport.clone(), "math/square", |req| {
        let n = req
            .payload
            .as_json()
            .and_then(|v| v.as_f64())
            .ok_or("expected a number")?;
        Ok(Payload::from(serde_json::json!(n * n)))
    })?;

    let router = CorrelationRouter::with_config(bus.clone(), transport.clone(), settings.router);
    let timeout = router.config().default_timeout();

    for n in [2.0, 7.5] {
        let reply = router.request("math/square", serde_json::json!(n), timeout)?;
        println!("{n}^2 = {}", reply.as_json().cloned().unwrap_or_default());
    }

    // нечисловой запрос: ответчик не отвечает, вызывающий получает таймаут
    match router.request("math/square", "seven", Duration::from_millis(100)) {
        Err(RequestError::Timeout { correlation_id, .. }) => {
            println!("request {correlation_id} timed out as expected")
        }
        other => println!("unexpected outcome: {other:?}"),
    }

    // на этот топик никто не подписан
    let pending = router.issue("nobody/home", "hello?", Duration::from_secs(10))?;
    println!(
        "\nissued {} waiting on '{}'",
        pending.correlation_id(),
        pending.reply_tag()
    );
    router.cancel(pending.correlation_id());
    match pending.wait() {
        Err(e) => println!("cancelled: {e}"),
        Ok(reply) => println!("unexpected reply: {reply:?}"),
    }

    println!(
        "\npending={} tags={}",
        router.pending_count(),
        bus.tag_count()
    );
    Ok(())
}
