use std::{collections::BTreeMap, str::FromStr};

use k8s_openapi::api::core::v1::Service;
use kube::ResourceExt;

use crate::{
    consts,
    error::{LBControllerError, LBControllerResult},
    models::{Algorithm, Protocol, StickySessions},
};

/// Health-check settings as written in the annotations. The port is kept in
/// its service-facing form here; `health_check::build` maps it to a node port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthCheckConfig {
    pub path: Option<String>,
    pub protocol: Option<Protocol>,
    pub ports: Vec<i32>,
    pub check_interval_seconds: u32,
    pub response_timeout_seconds: u32,
    pub unhealthy_threshold: u32,
    pub healthy_threshold: u32,
}

/// Load-balancer settings derived from a service's annotations.
///
/// Built fresh on every reconcile call and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadBalancerConfig {
    pub protocol: Protocol,
    pub tls_ports: Vec<i32>,
    pub http2_ports: Vec<i32>,
    pub certificate_id: Option<String>,
    pub tls_passthrough: bool,
    pub hostname: Option<String>,
    pub algorithm: Algorithm,
    pub sticky_sessions: StickySessions,
    pub redirect_http_to_https: bool,
    pub enable_proxy_protocol: bool,
    pub health_check: HealthCheckConfig,
}

impl LoadBalancerConfig {
    pub fn try_from_svc(svc: &Service) -> LBControllerResult<Self> {
        Self::try_from_annotations(svc.annotations())
    }

    /// Parse and validate every load-balancer annotation.
    ///
    /// Absent annotations take their defaults. Malformed numbers always fail,
    /// while malformed booleans read as `false`, except for the proxy-protocol
    /// flag which must parse.
    pub fn try_from_annotations(
        annotations: &BTreeMap<String, String>,
    ) -> LBControllerResult<Self> {
        let protocol = annotations
            .get(consts::LB_PROTOCOL_ANN_NAME)
            .map(String::as_str)
            .map(Protocol::from_str)
            .transpose()?
            .unwrap_or(Protocol::Tcp);

        let tls_ports = parse_ports(annotations, consts::LB_TLS_PORTS_ANN_NAME)?;
        let http2_ports = parse_ports(annotations, consts::LB_HTTP2_PORTS_ANN_NAME)?;

        let certificate_id = non_empty(annotations, consts::LB_CERTIFICATE_ID_ANN_NAME);
        let tls_passthrough = lenient_bool(annotations, consts::LB_TLS_PASSTHROUGH_ANN_NAME);

        let hostname = hostname_override(annotations);

        let algorithm = Algorithm::from_annotation(
            annotations
                .get(consts::LB_ALGORITHM_ANN_NAME)
                .map(String::as_str),
        );

        let sticky_sessions = sticky_sessions(annotations)?;

        let redirect_http_to_https =
            lenient_bool(annotations, consts::LB_REDIRECT_HTTP_TO_HTTPS_ANN_NAME);

        let enable_proxy_protocol = annotations
            .get(consts::LB_ENABLE_PROXY_PROTOCOL_ANN_NAME)
            .map(|value| {
                parse_bool(value).ok_or_else(|| {
                    LBControllerError::Validation(format!(
                        "failed to parse proxy protocol flag {value:?} from annotation {:?}",
                        consts::LB_ENABLE_PROXY_PROTOCOL_ANN_NAME
                    ))
                })
            })
            .transpose()?
            .unwrap_or(false);

        Ok(Self {
            protocol,
            tls_ports,
            http2_ports,
            certificate_id,
            tls_passthrough,
            hostname,
            algorithm,
            sticky_sessions,
            redirect_http_to_https,
            enable_proxy_protocol,
            health_check: health_check(annotations)?,
        })
    }
}

/// Hostname to report instead of the load-balancer IP, lower-cased.
pub fn hostname_override(annotations: &BTreeMap<String, String>) -> Option<String> {
    non_empty(annotations, consts::LB_HOSTNAME_ANN_NAME).map(|host| host.to_lowercase())
}

fn health_check(annotations: &BTreeMap<String, String>) -> LBControllerResult<HealthCheckConfig> {
    let protocol = annotations
        .get(consts::LB_HC_PROTOCOL_ANN_NAME)
        .filter(|value| !value.is_empty())
        .map(|value| match value.as_str() {
            "tcp" => Ok(Protocol::Tcp),
            "http" => Ok(Protocol::Http),
            _ => Err(LBControllerError::Validation(format!(
                "invalid protocol {value:?} specified in annotation {:?}",
                consts::LB_HC_PROTOCOL_ANN_NAME
            ))),
        })
        .transpose()?;

    Ok(HealthCheckConfig {
        path: non_empty(annotations, consts::LB_HC_PATH_ANN_NAME),
        protocol,
        ports: parse_ports(annotations, consts::LB_HC_PORT_ANN_NAME)?,
        check_interval_seconds: parse_int(annotations, consts::LB_HC_INTERVAL_ANN_NAME)?
            .unwrap_or(consts::DEFAULT_HC_INTERVAL),
        response_timeout_seconds: parse_int(annotations, consts::LB_HC_TIMEOUT_ANN_NAME)?
            .unwrap_or(consts::DEFAULT_HC_TIMEOUT),
        unhealthy_threshold: parse_int(annotations, consts::LB_HC_UNHEALTHY_THRESHOLD_ANN_NAME)?
            .unwrap_or(consts::DEFAULT_HC_UNHEALTHY_THRESHOLD),
        healthy_threshold: parse_int(annotations, consts::LB_HC_HEALTHY_THRESHOLD_ANN_NAME)?
            .unwrap_or(consts::DEFAULT_HC_HEALTHY_THRESHOLD),
    })
}

fn sticky_sessions(annotations: &BTreeMap<String, String>) -> LBControllerResult<StickySessions> {
    // Anything but "cookies" disables stickiness.
    if annotations
        .get(consts::LB_STICKY_TYPE_ANN_NAME)
        .map(String::as_str)
        != Some("cookies")
    {
        return Ok(StickySessions::None);
    }

    let cookie_name = non_empty(annotations, consts::LB_STICKY_COOKIE_NAME_ANN_NAME).ok_or_else(
        || {
            LBControllerError::Validation(format!(
                "sticky session cookie name not specified in annotation {:?}, but required",
                consts::LB_STICKY_COOKIE_NAME_ANN_NAME
            ))
        },
    )?;

    if non_empty(annotations, consts::LB_STICKY_COOKIE_TTL_ANN_NAME).is_none() {
        return Err(LBControllerError::Validation(format!(
            "sticky session cookie ttl not specified in annotation {:?}, but required",
            consts::LB_STICKY_COOKIE_TTL_ANN_NAME
        )));
    }
    let cookie_ttl_seconds = parse_int(annotations, consts::LB_STICKY_COOKIE_TTL_ANN_NAME)?
        .unwrap_or_default();

    Ok(StickySessions::Cookies {
        cookie_name,
        cookie_ttl_seconds,
    })
}

fn non_empty(annotations: &BTreeMap<String, String>, key: &str) -> Option<String> {
    annotations.get(key).filter(|value| !value.is_empty()).cloned()
}

fn parse_int<T: FromStr>(
    annotations: &BTreeMap<String, String>,
    key: &str,
) -> LBControllerResult<Option<T>> {
    annotations
        .get(key)
        .map(|value| {
            value.parse::<T>().map_err(|_| {
                LBControllerError::Validation(format!(
                    "failed to parse annotation {key:?}: {value:?} is not a valid number"
                ))
            })
        })
        .transpose()
}

/// Comma separated list of ports, e.g. `443,8443`.
fn parse_ports(
    annotations: &BTreeMap<String, String>,
    key: &str,
) -> LBControllerResult<Vec<i32>> {
    let Some(ports) = annotations.get(key) else {
        return Ok(Vec::new());
    };
    ports
        .split(',')
        .map(|port| {
            port.parse::<i32>().map_err(|_| {
                LBControllerError::Validation(format!(
                    "failed to parse annotation {key:?}: {port:?} is not a valid port"
                ))
            })
        })
        .collect()
}

/// Malformed values read as `false`.
fn lenient_bool(annotations: &BTreeMap<String, String>, key: &str) -> bool {
    annotations
        .get(key)
        .and_then(|value| parse_bool(value))
        .unwrap_or(false)
}

fn parse_bool(value: &str) -> Option<bool> {
    match value {
        "1" | "t" | "T" | "TRUE" | "true" | "True" => Some(true),
        "0" | "f" | "F" | "FALSE" | "false" | "False" => Some(false),
        _ => None,
    }
}
