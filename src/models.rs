//! Resources exchanged with the DigitalOcean API.
//!
//! Only the fields the reconciler reads or writes are modelled; everything
//! else in the remote payloads is ignored on deserialization.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Deserializer, Serialize};

use crate::{consts, error::LBControllerError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Protocol {
    Tcp,
    Http,
    Https,
    Http2,
    /// Any protocol this controller never configures itself (e.g. `udp`).
    #[serde(other)]
    Other,
}

impl Protocol {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Tcp => "tcp",
            Self::Http => "http",
            Self::Https => "https",
            Self::Http2 => "http2",
            Self::Other => "other",
        }
    }

    #[must_use]
    pub const fn is_secure(self) -> bool {
        matches!(self, Self::Https | Self::Http2)
    }
}

impl FromStr for Protocol {
    type Err = LBControllerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tcp" => Ok(Self::Tcp),
            "http" => Ok(Self::Http),
            "https" => Ok(Self::Https),
            "http2" => Ok(Self::Http2),
            _ => Err(LBControllerError::Validation(format!(
                "invalid protocol {s:?} specified in annotation {:?}",
                consts::LB_PROTOCOL_ANN_NAME
            ))),
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Algorithm {
    #[default]
    RoundRobin,
    LeastConnections,
}

impl Algorithm {
    /// Unknown values fall back to round robin instead of failing.
    #[must_use]
    pub fn from_annotation(value: Option<&str>) -> Self {
        match value {
            Some("least_connections") => Self::LeastConnections,
            _ => Self::RoundRobin,
        }
    }
}

/// Provisioning state of a remote load balancer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LBStatus {
    New,
    Active,
    Errored,
    #[serde(other)]
    Unknown,
}

impl fmt::Display for LBStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = match self {
            Self::New => "new",
            Self::Active => "active",
            Self::Errored => "errored",
            Self::Unknown => "unknown",
        };
        f.write_str(status)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForwardingRule {
    pub entry_protocol: Protocol,
    pub entry_port: i32,
    pub target_protocol: Protocol,
    pub target_port: i32,
    #[serde(
        default,
        deserialize_with = "empty_as_none",
        skip_serializing_if = "Option::is_none"
    )]
    pub certificate_id: Option<String>,
    #[serde(default)]
    pub tls_passthrough: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthCheck {
    pub protocol: Protocol,
    pub port: i32,
    #[serde(
        default,
        deserialize_with = "empty_as_none",
        skip_serializing_if = "Option::is_none"
    )]
    pub path: Option<String>,
    pub check_interval_seconds: u32,
    pub response_timeout_seconds: u32,
    pub unhealthy_threshold: u32,
    pub healthy_threshold: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StickySessions {
    #[default]
    None,
    Cookies {
        cookie_name: String,
        cookie_ttl_seconds: u32,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RemoteLoadBalancer {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub ip: String,
    pub status: LBStatus,
    #[serde(default)]
    pub algorithm: Algorithm,
    #[serde(default)]
    pub forwarding_rules: Vec<ForwardingRule>,
    #[serde(default)]
    pub health_check: Option<HealthCheck>,
    #[serde(default)]
    pub sticky_sessions: Option<StickySessions>,
    #[serde(default)]
    pub droplet_ids: Vec<u64>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub redirect_http_to_https: bool,
    #[serde(default)]
    pub enable_proxy_protocol: bool,
}

impl RemoteLoadBalancer {
    /// The certificate currently attached to any of the forwarding rules.
    #[must_use]
    pub fn certificate_id(&self) -> Option<&str> {
        self.forwarding_rules
            .iter()
            .find_map(|rule| rule.certificate_id.as_deref())
    }
}

/// Body of the create and update calls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoadBalancerRequest {
    pub name: String,
    pub region: String,
    pub algorithm: Algorithm,
    pub forwarding_rules: Vec<ForwardingRule>,
    pub health_check: HealthCheck,
    pub sticky_sessions: StickySessions,
    pub droplet_ids: Vec<u64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    pub redirect_http_to_https: bool,
    pub enable_proxy_protocol: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vpc_uuid: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct NetworkAddress {
    pub ip_address: String,
    #[serde(rename = "type", default)]
    pub kind: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct DropletNetworks {
    #[serde(default)]
    pub v4: Vec<NetworkAddress>,
    #[serde(default)]
    pub v6: Vec<NetworkAddress>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Droplet {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub networks: DropletNetworks,
}

impl Droplet {
    pub fn addresses(&self) -> impl Iterator<Item = &str> {
        self.networks
            .v4
            .iter()
            .chain(&self.networks.v6)
            .map(|addr| addr.ip_address.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Certificate {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub not_after: String,
}

impl Certificate {
    /// Certificates of this kind get renewed (and re-identified) remotely.
    #[must_use]
    pub fn is_auto_managed(&self) -> bool {
        self.kind == consts::CERT_TYPE_LETS_ENCRYPT
    }
}

fn empty_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.filter(|s| !s.is_empty()))
}
