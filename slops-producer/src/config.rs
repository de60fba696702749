use std::net::SocketAddr;

use envconfig::Envconfig;

#[derive(Envconfig, Clone)]
pub struct Config {
    /// Disable SLOPS entirely: every key is routed by the stable hash
    /// partitioner and no hot-key tracking, rebalancing, or marker
    /// encoding happens.
    #[envconfig(default = "false")]
    pub vanilla: bool,

    #[envconfig(default = "false")]
    pub print_sink: bool,

    #[envconfig(default = "127.0.0.1:3000")]
    pub address: SocketAddr,

    /// Broker topic partition count.
    pub partitions: u32,

    /// Probability in [0,1] that a sampled key is *dropped* before reaching
    /// the hot-key counter.
    #[envconfig(default = "0.9")]
    pub sample_threshold: f64,

    /// Lossy Counting support threshold `s`, in (0,1).
    #[envconfig(default = "0.01")]
    pub support: f64,

    /// Lossy Counting error tolerance `epsilon`, in (0, support).
    #[envconfig(default = "0.0001")]
    pub epsilon: f64,

    /// Rebalance period, in seconds.
    #[envconfig(default = "30")]
    pub swap_interval_secs: u64,

    /// Minimum `(max-min)/min` percentage required to trigger a rebalance
    /// pass.
    #[envconfig(default = "10")]
    pub load_imbalance_tolerance: u64,

    /// Anti-flap minimum interval between migrations of the same key, in
    /// seconds.
    #[envconfig(default = "60")]
    pub migration_interval_secs: u64,

    /// Identity stamped on the `Producer` header of every record.
    #[envconfig(from = "INSTANCE_ID", default = "")]
    pub instance_id: String,

    #[envconfig(nested = true)]
    pub kafka: KafkaConfig,

    pub otel_url: Option<String>,
    #[envconfig(default = "1.0")]
    pub otel_sampling_rate: f64,
    #[envconfig(default = "true")]
    pub export_prometheus: bool,
}

#[derive(Envconfig, Clone)]
pub struct KafkaConfig {
    #[envconfig(default = "20")]
    pub kafka_producer_linger_ms: u32, // Maximum time between producer batches during low traffic
    #[envconfig(default = "400")]
    pub kafka_producer_queue_mib: u32, // Size of the in-memory producer queue in mebibytes
    #[envconfig(default = "20000")]
    pub kafka_message_timeout_ms: u32,
    #[envconfig(default = "none")]
    pub kafka_compression_codec: String, // none, gzip, snappy, lz4, zstd
    pub kafka_hosts: String,
    #[envconfig(default = "slops")]
    pub kafka_topic: String,
    #[envconfig(default = "false")]
    pub kafka_tls: bool,
}
