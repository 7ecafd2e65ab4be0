mod config;

use common::amqp::AmqpClient;
use common::telemetry::init_telemetry;
use config::ServiceConfig;
use pcount_runner::Runner;
use people_counting::{InMemoryLectureStore, PeopleCounting};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

#[tokio::main]
async fn main() {
    let config = match ServiceConfig::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = init_telemetry(&config.telemetry()) {
        eprintln!("Failed to initialize telemetry: {}", e);
        std::process::exit(1);
    }

    info!(service_name = %config.service_name, "Starting people counting service");
    debug!("Configuration: {:?}", config);

    if config.may_stall_on_failed_results() {
        warn!(
            prefetch_count = config.amqp_prefetch_count,
            "failed counting results stay unacked and hold prefetch slots; set PCOUNT_PCOUNT_MAX_REDELIVERIES"
        );
    }

    let amqp_client = match AmqpClient::connect(
        &config.amqp_url,
        config.amqp_connection_timeout(),
        config.amqp_prefetch_count,
    )
    .await
    {
        Ok(client) => Arc::new(client),
        Err(e) => {
            error!(error = %e, "Failed to connect to the AMQP broker");
            std::process::exit(1);
        }
    };

    // Lectures live in memory for the lifetime of the process
    let store = Arc::new(InMemoryLectureStore::new());

    let people_counting =
        match PeopleCounting::new(store, Arc::clone(&amqp_client), config.people_counting()).await
        {
            Ok(module) => module,
            Err(e) => {
                error!(error = ?e, "Failed to initialize people counting");
                amqp_client.dispose().await;
                std::process::exit(1);
            }
        };

    let runner = Runner::new()
        .with_app_process("people_counting", people_counting.into_runner_process())
        .with_closer("amqp", {
            let amqp_client = Arc::clone(&amqp_client);
            move || async move {
                amqp_client.dispose().await;
                Ok(())
            }
        })
        .with_closer_timeout(config.shutdown_timeout());

    if runner.run().await.is_err() {
        std::process::exit(1);
    }
}
