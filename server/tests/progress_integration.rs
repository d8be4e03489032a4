use server::bulk_operations::{BatchConfig, ProgressReport};
use server::files::OutputSettings;
use server::gateway::InMemoryGateway;
use server::service_bus_manager::{ServiceBusCommand, ServiceBusManager, ServiceBusResponse};
use std::sync::Arc;
use std::time::{Duration, Instant};

async fn seeded(count: usize) -> InMemoryGateway {
    let gateway = InMemoryGateway::new();
    let bodies: Vec<String> = (0..count).map(|i| format!("m{i}")).collect();
    let refs: Vec<&str> = bodies.iter().map(String::as_str).collect();
    gateway.seed_text("orders", false, &refs).await;
    gateway
}

fn delete_all(throttle: bool) -> ServiceBusCommand {
    ServiceBusCommand::DeleteMessages {
        queue_name: "orders".to_string(),
        dead_letter: false,
        all: true,
        throttle,
    }
}

#[cfg(test)]
mod status_tests {
    use super::*;

    #[tokio::test]
    async fn test_status_every_interval_then_success() {
        let gateway = seeded(120).await;
        let mut manager = ServiceBusManager::new(
            Arc::new(gateway.clone()),
            BatchConfig::new(3, 50),
            OutputSettings::default(),
        );
        let progress = manager.subscribe(16);

        let response = manager.execute_command(delete_all(false)).await;
        assert!(matches!(response, ServiceBusResponse::Deleted { .. }));

        let events: Vec<ProgressReport> = progress.drain().collect();
        assert_eq!(
            events,
            vec![
                ProgressReport::Started { total: 120 },
                ProgressReport::Status {
                    processed: 50,
                    total: 120
                },
                ProgressReport::Status {
                    processed: 100,
                    total: 120
                },
                ProgressReport::Success { processed: 120 },
            ]
        );
    }

    #[tokio::test]
    async fn test_exactly_one_terminal_event() {
        let gateway = seeded(30).await;
        let mut manager = ServiceBusManager::new(
            Arc::new(gateway.clone()),
            BatchConfig::new(2, 10),
            OutputSettings::default(),
        );
        let progress = manager.subscribe(16);

        manager.execute_command(delete_all(false)).await;

        let events: Vec<ProgressReport> = progress.drain().collect();
        let terminal = events.iter().filter(|e| e.is_terminal()).count();
        assert_eq!(terminal, 1);
        assert!(events.last().is_some_and(ProgressReport::is_terminal));
    }

    #[tokio::test]
    async fn test_send_reports_progress() {
        let gateway = InMemoryGateway::new();
        gateway.create_queue("orders").await;
        let mut manager = ServiceBusManager::new(
            Arc::new(gateway.clone()),
            BatchConfig::new(1, 2),
            OutputSettings::default(),
        );
        let progress = manager.subscribe(16);

        manager
            .execute_command(ServiceBusCommand::SendMessages {
                queue_name: "orders".to_string(),
                payloads: vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()],
            })
            .await;

        let events: Vec<ProgressReport> = progress.drain().collect();
        assert_eq!(
            events,
            vec![
                ProgressReport::Started { total: 3 },
                ProgressReport::Status {
                    processed: 2,
                    total: 3
                },
                ProgressReport::Success { processed: 3 },
            ]
        );
    }

    #[tokio::test]
    async fn test_slow_reader_does_not_lose_events() {
        let gateway = seeded(40).await;
        let mut manager = ServiceBusManager::new(
            Arc::new(gateway.clone()),
            BatchConfig::new(4, 1),
            OutputSettings::default(),
        );
        let progress = manager.subscribe(1);

        let reader = tokio::spawn(async move {
            let mut statuses = 0;
            while let Ok(event) = progress.recv_async().await {
                if matches!(event, ProgressReport::Status { .. }) {
                    statuses += 1;
                }
                if event.is_terminal() {
                    break;
                }
                tokio::task::yield_now().await;
            }
            statuses
        });

        manager.execute_command(delete_all(false)).await;
        assert_eq!(reader.await.unwrap(), 40);
        assert_eq!(gateway.message_count("orders", false).await, 0);
    }
}

#[cfg(test)]
mod throttle_tests {
    use super::*;

    #[tokio::test]
    async fn test_throttle_pauses_at_status_boundaries() {
        let gateway = seeded(30).await;
        let config = BatchConfig::new(3, 10).with_throttle_delay(Duration::from_millis(40));
        let manager = ServiceBusManager::new(
            Arc::new(gateway.clone()),
            config,
            OutputSettings::default(),
        );

        let started = Instant::now();
        manager.execute_command(delete_all(true)).await;

        // Three boundaries, one pause each.
        assert!(started.elapsed() >= Duration::from_millis(120));
        assert_eq!(gateway.message_count("orders", false).await, 0);
    }
}
