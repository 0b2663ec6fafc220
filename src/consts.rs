// Reconciler-owned annotation caching the remote load-balancer id.
pub const LB_ID_ANN_NAME: &str = "kubernetes.digitalocean.com/load-balancer-id";
pub const LB_NAME_ANN_NAME: &str = "service.beta.kubernetes.io/do-loadbalancer-name";

// LB config
pub const LB_PROTOCOL_ANN_NAME: &str = "service.beta.kubernetes.io/do-loadbalancer-protocol";
pub const LB_TLS_PORTS_ANN_NAME: &str = "service.beta.kubernetes.io/do-loadbalancer-tls-ports";
pub const LB_HTTP2_PORTS_ANN_NAME: &str = "service.beta.kubernetes.io/do-loadbalancer-http2-ports";
pub const LB_TLS_PASSTHROUGH_ANN_NAME: &str =
    "service.beta.kubernetes.io/do-loadbalancer-tls-passthrough";
pub const LB_CERTIFICATE_ID_ANN_NAME: &str =
    "service.beta.kubernetes.io/do-loadbalancer-certificate-id";
pub const LB_HOSTNAME_ANN_NAME: &str = "service.beta.kubernetes.io/do-loadbalancer-hostname";
pub const LB_ALGORITHM_ANN_NAME: &str = "service.beta.kubernetes.io/do-loadbalancer-algorithm";
pub const LB_REDIRECT_HTTP_TO_HTTPS_ANN_NAME: &str =
    "service.beta.kubernetes.io/do-loadbalancer-redirect-http-to-https";
pub const LB_ENABLE_PROXY_PROTOCOL_ANN_NAME: &str =
    "service.beta.kubernetes.io/do-loadbalancer-enable-proxy-protocol";

// Health check
pub const LB_HC_PATH_ANN_NAME: &str = "service.beta.kubernetes.io/do-loadbalancer-healthcheck-path";
pub const LB_HC_PORT_ANN_NAME: &str = "service.beta.kubernetes.io/do-loadbalancer-healthcheck-port";
pub const LB_HC_PROTOCOL_ANN_NAME: &str =
    "service.beta.kubernetes.io/do-loadbalancer-healthcheck-protocol";
pub const LB_HC_INTERVAL_ANN_NAME: &str =
    "service.beta.kubernetes.io/do-loadbalancer-healthcheck-check-interval-seconds";
pub const LB_HC_TIMEOUT_ANN_NAME: &str =
    "service.beta.kubernetes.io/do-loadbalancer-healthcheck-response-timeout-seconds";
pub const LB_HC_UNHEALTHY_THRESHOLD_ANN_NAME: &str =
    "service.beta.kubernetes.io/do-loadbalancer-healthcheck-unhealthy-threshold";
pub const LB_HC_HEALTHY_THRESHOLD_ANN_NAME: &str =
    "service.beta.kubernetes.io/do-loadbalancer-healthcheck-healthy-threshold";

// Sticky sessions
pub const LB_STICKY_TYPE_ANN_NAME: &str =
    "service.beta.kubernetes.io/do-loadbalancer-sticky-sessions-type";
pub const LB_STICKY_COOKIE_NAME_ANN_NAME: &str =
    "service.beta.kubernetes.io/do-loadbalancer-sticky-sessions-cookie-name";
pub const LB_STICKY_COOKIE_TTL_ANN_NAME: &str =
    "service.beta.kubernetes.io/do-loadbalancer-sticky-sessions-cookie-ttl";

pub const DEFAULT_HC_INTERVAL: u32 = 3;
pub const DEFAULT_HC_TIMEOUT: u32 = 5;
pub const DEFAULT_HC_UNHEALTHY_THRESHOLD: u32 = 3;
pub const DEFAULT_HC_HEALTHY_THRESHOLD: u32 = 5;

pub const DEFAULT_SECURE_PORT: i32 = 443;

pub const PORT_PROTOCOL_TCP: &str = "TCP";
pub const PROVIDER_ID_SCHEME: &str = "digitalocean";
pub const CLUSTER_TAG_PREFIX: &str = "k8s";
pub const CERT_TYPE_LETS_ENCRYPT: &str = "lets_encrypt";

// Legacy names are capped at this length.
pub const LEGACY_NAME_MAX_LEN: usize = 32;

pub const FINALIZER_NAME: &str = "service.kubernetes.io/load-balancer-cleanup";
pub const EXCLUDE_FROM_LB_LABEL_NAME: &str =
    "node.kubernetes.io/exclude-from-external-load-balancers";
