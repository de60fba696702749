use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use health::HealthRegistry;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::info;

use crate::config::Config;
use crate::dispatch::Dispatcher;
use crate::hotkey;
use crate::message_set::MessageSetMap;
use crate::partition_map::PartitionMap;
use crate::rebalancer::{self, RebalancerConfig};
use crate::router::{self, AppState};
use crate::sinks::kafka::KafkaSink;
use crate::sinks::{EventSink, PrintSink};

const SAMPLE_CHANNEL_CAPACITY: usize = 1024;

async fn run<S>(
    config: Config,
    sink: S,
    health: HealthRegistry,
    listener: TcpListener,
    shutdown: impl Future<Output = ()>,
) where
    S: EventSink + Send + Sync + 'static,
{
    let partition_map = Arc::new(PartitionMap::new(config.partitions));
    let message_sets = Arc::new(MessageSetMap::new());

    // In vanilla mode the sampling channel has no reader; producers still
    // call `try_send` on it (dispatch.rs gates the call on `!vanilla`, so
    // this capacity of 1 is never exercised, only kept non-zero to satisfy
    // `mpsc::channel`'s API).
    let (sample_tx, sample_rx) = mpsc::channel::<String>(SAMPLE_CHANNEL_CAPACITY);

    if !config.vanilla {
        let hotkey_health = health
            .register("hotkey_counter".to_string(), time::Duration::seconds(30))
            .await;
        let hotkey_partition_map = partition_map.clone();
        let epsilon = config.epsilon;
        let support = config.support;
        tokio::spawn(async move {
            hotkey::run(
                sample_rx,
                (epsilon, support),
                hotkey_partition_map,
                Some(hotkey_health),
            )
            .await
        });

        let rebalancer_health = health
            .register("rebalancer".to_string(), time::Duration::seconds(60))
            .await;
        let rebalancer_partition_map = partition_map.clone();
        let rebalancer_config = RebalancerConfig {
            load_imbalance_tolerance: config.load_imbalance_tolerance,
            migration_interval: Duration::from_secs(config.migration_interval_secs),
        };
        let interval = tokio::time::interval(Duration::from_secs(config.swap_interval_secs));
        tokio::spawn(async move {
            rebalancer::run(
                rebalancer_partition_map,
                rebalancer_config,
                interval,
                Some(rebalancer_health),
            )
            .await
        });
    } else {
        // Nobody drains the sampling channel in vanilla mode; drop the
        // receiver so sends fail fast instead of filling an unbounded
        // backlog in memory.
        drop(sample_rx);
    }

    let dispatcher = Dispatcher::new(
        partition_map,
        message_sets,
        sample_tx,
        sink,
        config.partitions,
        config.sample_threshold,
        config.vanilla,
        config.instance_id.clone(),
    );

    let state = AppState {
        dispatcher: Arc::new(dispatcher),
        health,
    };
    let app = router::router(state, config.export_prometheus);

    info!("listening on {:?}", listener.local_addr().unwrap());
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await
    .unwrap()
}

pub async fn serve(config: Config, listener: TcpListener, shutdown: impl Future<Output = ()>) {
    let health = HealthRegistry::new("liveness");

    if config.print_sink {
        run(config, PrintSink {}, health, listener, shutdown).await;
    } else {
        let kafka_health = health
            .register("kafka_producer".to_string(), time::Duration::seconds(30))
            .await;
        let sink =
            KafkaSink::new(config.kafka.clone(), kafka_health).expect("failed to create Kafka sink");
        run(config, sink, health, listener, shutdown).await;
    }
}
