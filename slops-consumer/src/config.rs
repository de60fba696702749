use std::net::SocketAddr;

use envconfig::Envconfig;

#[derive(Envconfig, Clone)]
pub struct Config {
    /// Address the metrics/health HTTP server binds to.
    #[envconfig(default = "127.0.0.1:3001")]
    pub address: SocketAddr,

    pub kafka_hosts: String,

    #[envconfig(default = "slops")]
    pub kafka_topic: String,

    #[envconfig(default = "slops-consumer")]
    pub kafka_group_id: String,

    #[envconfig(default = "10000")]
    pub kafka_session_timeout_ms: u32,

    #[envconfig(default = "true")]
    pub export_prometheus: bool,
}
