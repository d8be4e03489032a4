use proptest::prelude::*;
use server::bulk_operations::{BatchConfig, BulkOperationResult};
use server::files::OutputSettings;
use server::gateway::InMemoryGateway;
use server::service_bus_manager::{ServiceBusCommand, ServiceBusManager, ServiceBusResponse};
use std::sync::Arc;

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

async fn seeded(count: usize) -> InMemoryGateway {
    let gateway = InMemoryGateway::new();
    let bodies: Vec<String> = (0..count).map(|i| format!("line-{i}")).collect();
    let refs: Vec<&str> = bodies.iter().map(String::as_str).collect();
    gateway.seed_text("orders", true, &refs).await;
    gateway
}

#[cfg(test)]
mod pull_properties {
    use super::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn test_pull_splits_into_full_batches_and_one_remainder(
            count in 1usize..60,
            lines_per_file in 1usize..12
        ) {
            let dir = tempfile::tempdir().unwrap();
            let output = OutputSettings::new(dir.path());

            let response = runtime().block_on(async {
                let gateway = seeded(count).await;
                let manager = ServiceBusManager::new(
                    Arc::new(gateway),
                    BatchConfig::default(),
                    output.clone(),
                );
                manager
                    .execute_command(ServiceBusCommand::PullMessages {
                        queue_name: "orders".to_string(),
                        dead_letter: true,
                        lines_per_file,
                    })
                    .await
            });

            let expected_batches = count.div_ceil(lines_per_file);
            let ServiceBusResponse::Pulled { result, batches, .. } = response else {
                return Err(TestCaseError::fail("pull did not succeed"));
            };
            prop_assert_eq!(result, BulkOperationResult::new(count, count));
            prop_assert_eq!(batches, expected_batches);

            let mut seen = Vec::new();
            for index in 1..=expected_batches {
                let content = std::fs::read_to_string(output.batch_path(index)).unwrap();
                let lines: Vec<String> = content.lines().map(str::to_string).collect();
                if index < expected_batches {
                    prop_assert_eq!(lines.len(), lines_per_file);
                } else {
                    prop_assert_eq!(lines.len(), count - (expected_batches - 1) * lines_per_file);
                }
                seen.extend(lines);
            }
            prop_assert!(!output.batch_path(expected_batches + 1).exists());

            let expected: Vec<String> = (0..count).map(|i| format!("line-{i}")).collect();
            prop_assert_eq!(seen, expected);
        }
    }
}

#[cfg(test)]
mod delete_properties {
    use super::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(24))]

        #[test]
        fn test_delete_all_empties_queue_for_any_concurrency(
            count in 1usize..80,
            concurrency in 1usize..8,
            status_interval in 1usize..30
        ) {
            let (response, remaining, locked) = runtime().block_on(async {
                let gateway = seeded(count).await;
                let manager = ServiceBusManager::new(
                    Arc::new(gateway.clone()),
                    BatchConfig::new(concurrency, status_interval),
                    OutputSettings::default(),
                );
                let response = manager
                    .execute_command(ServiceBusCommand::DeleteMessages {
                        queue_name: "orders".to_string(),
                        dead_letter: true,
                        all: true,
                        throttle: false,
                    })
                    .await;
                (
                    response,
                    gateway.message_count("orders", true).await,
                    gateway.locked_count("orders", true).await,
                )
            });

            prop_assert_eq!(
                response,
                ServiceBusResponse::Deleted {
                    result: BulkOperationResult::new(count, count)
                }
            );
            prop_assert_eq!(remaining, 0);
            prop_assert_eq!(locked, 0);
        }
    }
}
