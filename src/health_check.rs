use k8s_openapi::api::core::v1::ServicePort;

use crate::{
    consts,
    error::{LBControllerError, LBControllerResult},
    lb_config::HealthCheckConfig,
    models::{HealthCheck, Protocol},
};

/// Derive the health check of the load balancer.
///
/// Without an explicit port, the first service port's node port is probed.
/// Without an explicit protocol, HTTP is used when a path is set and TCP
/// otherwise.
pub fn build(config: &HealthCheckConfig, ports: &[ServicePort]) -> LBControllerResult<HealthCheck> {
    let port = match config.ports.as_slice() {
        [] => ports.first().ok_or_else(|| {
            LBControllerError::Validation("service does not expose any ports".to_string())
        })?,
        [wanted] => ports.iter().find(|p| p.port == *wanted).ok_or_else(|| {
            LBControllerError::Validation(format!(
                "health check port {wanted} from annotation {:?} does not exist on the service",
                consts::LB_HC_PORT_ANN_NAME
            ))
        })?,
        many => {
            return Err(LBControllerError::Validation(format!(
                "annotation {:?} only supports a single port, but found multiple: {many:?}",
                consts::LB_HC_PORT_ANN_NAME
            )))
        }
    };
    let node_port = port.node_port.ok_or_else(|| {
        LBControllerError::Validation(format!(
            "no node port allocated for health check port {}",
            port.port
        ))
    })?;

    let protocol = config.protocol.unwrap_or(if config.path.is_some() {
        Protocol::Http
    } else {
        Protocol::Tcp
    });

    Ok(HealthCheck {
        protocol,
        port: node_port,
        path: config.path.clone(),
        check_interval_seconds: config.check_interval_seconds,
        response_timeout_seconds: config.response_timeout_seconds,
        unhealthy_threshold: config.unhealthy_threshold,
        healthy_threshold: config.healthy_threshold,
    })
}
