use std::sync::Arc;
use std::time::Duration;

use failover_dispatcher::{
    Backend, CancellationToken, DispatchService, DispatcherConfig, SimulatedBackend,
};

#[tokio::main]
async fn main() {
    let backends: Vec<Arc<dyn Backend>> = vec![
        Arc::new(SimulatedBackend::new("flaky", 0.0)),
        Arc::new(SimulatedBackend::new("also-flaky", 0.0)),
    ];
    let config = DispatcherConfig::default()
        .with_max_retries(5)
        .with_send_timeout(Duration::from_secs(2));

    let Ok(service) = DispatchService::new(config, backends) else {
        return;
    };

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(350)).await;
        trigger.cancel();
    });

    let status = service.send_with_cancel("job-1", "payload", &cancel).await;
    println!("cancelled by caller: {status:?}");

    let status = service.send("job-2", "payload").await;
    println!("cut short by send timeout: {status:?}");
}
