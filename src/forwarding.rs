use std::collections::BTreeSet;

use k8s_openapi::api::core::v1::ServicePort;

use crate::{
    consts,
    error::{LBControllerError, LBControllerResult},
    lb_config::LoadBalancerConfig,
    models::{ForwardingRule, Protocol},
};

/// Build one forwarding rule per service port, in port order.
///
/// Ports listed in the HTTP2 annotation use `http2`, ports listed in the TLS
/// annotation use `https`, everything else uses the default protocol. When a
/// certificate or TLS passthrough is configured but no secure ports are
/// declared, port 443 is treated as a TLS port.
pub fn build(
    config: &LoadBalancerConfig,
    ports: &[ServicePort],
) -> LBControllerResult<Vec<ForwardingRule>> {
    let mut tls_ports = config.tls_ports.iter().copied().collect::<BTreeSet<_>>();
    let http2_ports = config.http2_ports.iter().copied().collect::<BTreeSet<_>>();

    let shared = tls_ports
        .intersection(&http2_ports)
        .map(ToString::to_string)
        .collect::<Vec<_>>();
    if !shared.is_empty() {
        return Err(LBControllerError::Validation(format!(
            "{:?} and {:?} cannot share values but found: {}",
            consts::LB_TLS_PORTS_ANN_NAME,
            consts::LB_HTTP2_PORTS_ANN_NAME,
            shared.join(", ")
        )));
    }

    let needs_secure_port = config.certificate_id.is_some() || config.tls_passthrough;
    if needs_secure_port && tls_ports.is_empty() && http2_ports.is_empty() {
        tls_ports.insert(consts::DEFAULT_SECURE_PORT);
    }

    ports
        .iter()
        .map(|port| {
            let protocol = if http2_ports.contains(&port.port) {
                Protocol::Http2
            } else if tls_ports.contains(&port.port) {
                Protocol::Https
            } else {
                config.protocol
            };
            build_rule(config, port, protocol)
        })
        .collect()
}

fn build_rule(
    config: &LoadBalancerConfig,
    port: &ServicePort,
    protocol: Protocol,
) -> LBControllerResult<ForwardingRule> {
    let port_protocol = port.protocol.as_deref().unwrap_or(consts::PORT_PROTOCOL_TCP);
    if port_protocol != consts::PORT_PROTOCOL_TCP {
        return Err(LBControllerError::Validation(format!(
            "only TCP protocol is supported, got: {port_protocol:?}"
        )));
    }
    let Some(node_port) = port.node_port else {
        return Err(LBControllerError::Validation(format!(
            "no node port allocated for service port {}",
            port.port
        )));
    };

    let mut rule = ForwardingRule {
        entry_protocol: protocol,
        entry_port: port.port,
        target_protocol: protocol,
        target_port: node_port,
        certificate_id: None,
        tls_passthrough: false,
    };
    if !protocol.is_secure() {
        return Ok(rule);
    }

    match (&config.certificate_id, config.tls_passthrough) {
        (None, false) => Err(LBControllerError::Validation(format!(
            "port {}: must set certificate id or enable tls pass through",
            port.port
        ))),
        (Some(_), true) => Err(LBControllerError::Validation(format!(
            "port {}: either certificate id should be set or tls pass through enabled, not both",
            port.port
        ))),
        // Encrypted traffic goes to the nodes as is.
        (None, true) => {
            rule.tls_passthrough = true;
            Ok(rule)
        }
        // TLS terminates at the load balancer.
        (Some(certificate_id), false) => {
            rule.certificate_id = Some(certificate_id.clone());
            rule.target_protocol = Protocol::Http;
            Ok(rule)
        }
    }
}
