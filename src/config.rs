use clap::Parser;
use tracing::level_filters::LevelFilter;

#[derive(Debug, Clone, Parser)]
pub struct OperatorConfig {
    /// `DigitalOcean` API access token.
    #[arg(short = 't', long, env = "DO_ACCESS_TOKEN")]
    pub access_token: String,

    /// Region where load balancers are created, e.g. `nyc3`.
    #[arg(short = 'r', long, env = "DO_REGION")]
    pub region: String,

    /// ID of the cluster. If set, every load balancer is tagged
    /// with `k8s:<cluster-id>`.
    #[arg(long, env = "DO_CLUSTER_ID", default_value = None)]
    pub cluster_id: Option<String>,

    /// VPC to place load balancers into.
    /// If not set, the region's default VPC is used.
    #[arg(long, env = "DO_CLUSTER_VPC_ID", default_value = None)]
    pub vpc_id: Option<String>,

    /// Base URL of the `DigitalOcean` API.
    #[arg(long, env = "DO_API_URL", default_value = "https://api.digitalocean.com")]
    pub api_url: String,

    /// Cluster name passed to load balancer operations.
    #[arg(long, env = "DO_CLUSTER_NAME", default_value = "kubernetes")]
    pub cluster_name: String,

    /// Seconds between reconciliations of a healthy service.
    #[arg(long, env = "DO_LB_REQUEUE_SECONDS", default_value = "60")]
    pub requeue_seconds: u64,

    /// Seconds to wait before retrying a failed reconciliation.
    #[arg(long, env = "DO_LB_ERROR_REQUEUE_SECONDS", default_value = "30")]
    pub error_requeue_seconds: u64,

    /// Seconds to wait for a load balancer that is still provisioning.
    #[arg(long, env = "DO_LB_NOT_ACTIVE_REQUEUE_SECONDS", default_value = "5")]
    pub not_active_requeue_seconds: u64,

    /// How often node membership of load balancers is synchronized.
    #[arg(long, env = "DO_NODE_SYNC_SECONDS", default_value = "100")]
    pub node_sync_seconds: u64,

    // Log level of the operator.
    #[arg(long, env = "DO_LOG_LEVEL", default_value = "INFO")]
    pub log_level: LevelFilter,
}
