use std::sync::Arc;
use std::time::Duration;

use failover_dispatcher::{
    Backend, BackoffPolicy, DispatchService, DispatcherConfig, SimulatedBackend,
};

#[tokio::main]
async fn main() {
    let backends: Vec<Arc<dyn Backend>> = vec![
        Arc::new(SimulatedBackend::new("email", 0.3).with_latency(Duration::from_millis(20))),
        Arc::new(SimulatedBackend::new("sms", 0.7).with_latency(Duration::from_millis(10))),
        Arc::new(SimulatedBackend::new("push", 0.9)),
    ];

    let config = DispatcherConfig::default()
        .with_max_retries(3)
        .with_rate_limit(5, Duration::from_secs(10))
        .with_backoff(BackoffPolicy::new(Duration::from_millis(100)));

    let service = match DispatchService::new(config, backends) {
        Ok(service) => Arc::new(service),
        Err(err) => {
            eprintln!("invalid configuration: {}", err);
            return;
        }
    };

    let mut handles = Vec::new();
    for i in 0..6 {
        let service = service.clone();
        handles.push(tokio::spawn(async move {
            let id = format!("msg-{}", i);
            let status = service.send(id.as_str(), r#"{"text":"hello"}"#).await;
            (id, status)
        }));
    }

    for handle in handles {
        if let Ok((id, status)) = handle.await {
            println!("{id}: {status:?}");
        }
    }

    // Re-sending a delivered identity never reaches a backend.
    println!("msg-0 again: {:?}", service.send("msg-0", "ignored").await);
    println!("never sent: {:?}", service.get_status("msg-99"));
}
