use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{LoadBalancerIngress, LoadBalancerStatus, Node, Service};
use kube::ResourceExt;

use crate::{
    consts,
    do_api::DoApi,
    error::{LBControllerError, LBControllerResult},
    forwarding, health_check,
    lb_config::{self, LoadBalancerConfig},
    locator::{self, Lookup},
    models::{ForwardingRule, HealthCheck, LBStatus, LoadBalancerRequest, RemoteLoadBalancer},
    nodes,
    patcher::{ServiceApi, ServicePatcher},
};

/// Lifecycle operations of the load balancer backing a `LoadBalancer`
/// service.
///
/// Every operation patches annotation changes it made on `svc` back to the
/// cluster before returning, whether it succeeded or not.
#[async_trait]
pub trait CloudLoadBalancer: Send + Sync {
    /// Current address of the load balancer, or `None` if there is none.
    async fn get_load_balancer(
        &self,
        cluster_name: &str,
        svc: &mut Service,
    ) -> LBControllerResult<Option<LoadBalancerStatus>>;

    /// Create or update the load balancer so that it balances `svc` across
    /// `nodes`.
    async fn ensure_load_balancer(
        &self,
        cluster_name: &str,
        svc: &mut Service,
        nodes: &[Node],
    ) -> LBControllerResult<LoadBalancerStatus>;

    /// Update an existing load balancer. Never creates one.
    async fn update_load_balancer(
        &self,
        cluster_name: &str,
        svc: &mut Service,
        nodes: &[Node],
    ) -> LBControllerResult<()>;

    /// Delete the load balancer if it exists.
    async fn ensure_load_balancer_deleted(
        &self,
        cluster_name: &str,
        svc: &mut Service,
    ) -> LBControllerResult<()>;
}

/// Part of the request that only depends on the service itself.
#[derive(Debug)]
struct DesiredLoadBalancer {
    name: String,
    config: LoadBalancerConfig,
    forwarding_rules: Vec<ForwardingRule>,
    health_check: HealthCheck,
}

/// Reconciler of DigitalOcean load balancers.
///
/// Holds no per-service state: everything is read from the service or
/// fetched from the API on every call.
pub struct LoadBalancers {
    api: Arc<dyn DoApi>,
    services: Arc<dyn ServiceApi>,
    region: String,
    cluster_id: Option<String>,
    vpc_id: Option<String>,
}

impl LoadBalancers {
    #[must_use]
    pub fn new(
        api: Arc<dyn DoApi>,
        services: Arc<dyn ServiceApi>,
        region: String,
        cluster_id: Option<String>,
        vpc_id: Option<String>,
    ) -> Self {
        Self {
            api,
            services,
            region,
            cluster_id,
            vpc_id,
        }
    }

    fn desired(svc: &Service) -> LBControllerResult<DesiredLoadBalancer> {
        let config = LoadBalancerConfig::try_from_svc(svc)?;
        let ports = svc
            .spec
            .as_ref()
            .and_then(|spec| spec.ports.as_deref())
            .unwrap_or_default();
        let forwarding_rules = forwarding::build(&config, ports)?;
        let health_check = health_check::build(&config.health_check, ports)?;
        Ok(DesiredLoadBalancer {
            name: locator::load_balancer_name(svc),
            config,
            forwarding_rules,
            health_check,
        })
    }

    async fn build_request(
        &self,
        desired: DesiredLoadBalancer,
        nodes: &[Node],
    ) -> LBControllerResult<LoadBalancerRequest> {
        let droplet_ids = nodes::droplet_ids(self.api.as_ref(), nodes).await?;
        let tags = self
            .cluster_id
            .iter()
            .map(|id| format!("{}:{id}", consts::CLUSTER_TAG_PREFIX))
            .collect();
        Ok(LoadBalancerRequest {
            name: desired.name,
            region: self.region.clone(),
            algorithm: desired.config.algorithm,
            forwarding_rules: desired.forwarding_rules,
            health_check: desired.health_check,
            sticky_sessions: desired.config.sticky_sessions,
            droplet_ids,
            tags,
            redirect_http_to_https: desired.config.redirect_http_to_https,
            enable_proxy_protocol: desired.config.enable_proxy_protocol,
            vpc_uuid: self.vpc_id.clone(),
        })
    }

    /// Locate the load balancer and cache its id on the service.
    async fn locate_and_annotate(&self, svc: &mut Service) -> LBControllerResult<Lookup> {
        let lookup = locator::locate(self.api.as_ref(), svc).await?;
        if let Lookup::Found(lb) = &lookup {
            set_annotation(svc, consts::LB_ID_ANN_NAME, &lb.id);
        }
        Ok(lookup)
    }

    /// Follow remote renewals of auto-managed certificates.
    ///
    /// When the load balancer carries a different certificate than the
    /// service asks for and that certificate is auto-managed, the service
    /// annotation is rewritten to the remote id.
    async fn reconcile_certificate(
        &self,
        lb: &RemoteLoadBalancer,
        svc: &mut Service,
    ) -> LBControllerResult<()> {
        let Some(lb_cert_id) = lb.certificate_id() else {
            return Ok(());
        };
        let service_cert_id = svc
            .annotations()
            .get(consts::LB_CERTIFICATE_ID_ANN_NAME)
            .map(String::as_str);
        if service_cert_id == Some(lb_cert_id) {
            return Ok(());
        }

        let certificate = match self.api.get_certificate(lb_cert_id).await {
            Ok(certificate) => certificate,
            Err(err) if err.is_not_found() => {
                tracing::debug!("Certificate {} of the load-balancer is gone", lb_cert_id);
                return Ok(());
            }
            Err(err) => {
                return Err(LBControllerError::api(
                    "failed to get certificate for load-balancer",
                    err,
                ))
            }
        };

        if certificate.is_auto_managed() {
            tracing::info!(
                "Recording renewed certificate {} of load-balancer {}",
                lb_cert_id,
                lb.id
            );
            set_annotation(svc, consts::LB_CERTIFICATE_ID_ANN_NAME, lb_cert_id);
        }
        Ok(())
    }

    async fn update_existing(
        &self,
        lb: &RemoteLoadBalancer,
        svc: &mut Service,
        nodes: &[Node],
    ) -> LBControllerResult<RemoteLoadBalancer> {
        // Validate before touching the certificate annotation.
        Self::desired(svc)?;
        self.reconcile_certificate(lb, svc).await?;

        let desired = Self::desired(svc)?;
        let request = self.build_request(desired, nodes).await?;
        tracing::info!("Updating load-balancer {}", lb.id);
        self.api
            .update_load_balancer(&lb.id, &request)
            .await
            .map_err(|err| {
                LBControllerError::api(
                    format!("failed to update load-balancer with ID {}", lb.id),
                    err,
                )
            })
    }

    #[tracing::instrument(skip_all, fields(service = svc.name_any()))]
    async fn get(&self, svc: &mut Service) -> LBControllerResult<Option<LoadBalancerStatus>> {
        match self.locate_and_annotate(svc).await? {
            Lookup::Missing => Ok(None),
            Lookup::Found(lb) => Ok(Some(address(svc, &lb))),
        }
    }

    #[tracing::instrument(skip_all, fields(service = svc.name_any()))]
    async fn ensure(
        &self,
        svc: &mut Service,
        nodes: &[Node],
    ) -> LBControllerResult<LoadBalancerStatus> {
        let desired = Self::desired(svc)?;

        let lb = match self.locate_and_annotate(svc).await? {
            Lookup::Found(lb) => self.update_existing(&lb, svc, nodes).await?,
            Lookup::Missing => {
                let request = self.build_request(desired, nodes).await?;
                tracing::info!("Creating load-balancer {}", request.name);
                let lb = self
                    .api
                    .create_load_balancer(&request)
                    .await
                    .map_err(|err| LBControllerError::api("failed to create load-balancer", err))?;
                set_annotation(svc, consts::LB_ID_ANN_NAME, &lb.id);
                lb
            }
        };

        if lb.status != LBStatus::Active {
            tracing::info!("Load-balancer {} is {}, not active yet", lb.id, lb.status);
            return Err(LBControllerError::NotYetActive(lb.status));
        }
        Ok(address(svc, &lb))
    }

    #[tracing::instrument(skip_all, fields(service = svc.name_any()))]
    async fn update(&self, svc: &mut Service, nodes: &[Node]) -> LBControllerResult<()> {
        let Lookup::Found(lb) = self.locate_and_annotate(svc).await? else {
            return Err(LBControllerError::LoadBalancerNotFound);
        };
        self.update_existing(&lb, svc, nodes).await?;
        Ok(())
    }

    #[tracing::instrument(skip_all, fields(service = svc.name_any()))]
    async fn delete(&self, svc: &Service) -> LBControllerResult<()> {
        let Lookup::Found(lb) = locator::locate(self.api.as_ref(), svc).await? else {
            tracing::debug!("Load-balancer does not exist, nothing to delete");
            return Ok(());
        };
        tracing::info!("Deleting load-balancer {}", lb.id);
        match self.api.delete_load_balancer(&lb.id).await {
            Ok(()) => Ok(()),
            Err(err) if err.is_not_found() => Ok(()),
            Err(err) => Err(LBControllerError::api("failed to delete load-balancer", err)),
        }
    }
}

#[async_trait]
impl CloudLoadBalancer for LoadBalancers {
    async fn get_load_balancer(
        &self,
        _cluster_name: &str,
        svc: &mut Service,
    ) -> LBControllerResult<Option<LoadBalancerStatus>> {
        let patcher = ServicePatcher::new(svc);
        let result = self.get(svc).await;
        patcher.finish(self.services.as_ref(), svc, result).await
    }

    async fn ensure_load_balancer(
        &self,
        _cluster_name: &str,
        svc: &mut Service,
        nodes: &[Node],
    ) -> LBControllerResult<LoadBalancerStatus> {
        let patcher = ServicePatcher::new(svc);
        let result = self.ensure(svc, nodes).await;
        patcher.finish(self.services.as_ref(), svc, result).await
    }

    async fn update_load_balancer(
        &self,
        _cluster_name: &str,
        svc: &mut Service,
        nodes: &[Node],
    ) -> LBControllerResult<()> {
        let patcher = ServicePatcher::new(svc);
        let result = self.update(svc, nodes).await;
        patcher.finish(self.services.as_ref(), svc, result).await
    }

    async fn ensure_load_balancer_deleted(
        &self,
        _cluster_name: &str,
        svc: &mut Service,
    ) -> LBControllerResult<()> {
        let patcher = ServicePatcher::new(svc);
        let result = self.delete(svc).await;
        patcher.finish(self.services.as_ref(), svc, result).await
    }
}

fn set_annotation(svc: &mut Service, key: &str, value: &str) {
    svc.annotations_mut()
        .insert(key.to_string(), value.to_string());
}

/// The hostname override when one is configured, the load-balancer IP
/// otherwise.
fn address(svc: &Service, lb: &RemoteLoadBalancer) -> LoadBalancerStatus {
    let ingress = match lb_config::hostname_override(svc.annotations()) {
        Some(hostname) => LoadBalancerIngress {
            hostname: Some(hostname),
            ..Default::default()
        },
        None => LoadBalancerIngress {
            ip: Some(lb.ip.clone()),
            ..Default::default()
        },
    };
    LoadBalancerStatus {
        ingress: Some(vec![ingress]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        do_api::{ApiError, MockDoApi},
        models::{Certificate, Protocol, StickySessions},
        patcher::{AnnotationPatch, MockServiceApi},
    };
    use k8s_openapi::{
        api::core::v1::{NodeSpec, ServicePort, ServiceSpec},
        apimachinery::pkg::apis::meta::v1::ObjectMeta,
    };
    use std::sync::Mutex;

    const CLUSTER: &str = "kubernetes";
    const LEGACY_NAME: &str = "a0b7f3c1e9d24a6f8c5e1d2b3a4f5e6d";

    /// Records what the engine sent, without coupling tests to call order.
    #[derive(Clone, Default)]
    struct Capture {
        patches: Arc<Mutex<Vec<AnnotationPatch>>>,
        requests: Arc<Mutex<Vec<LoadBalancerRequest>>>,
    }

    impl Capture {
        fn patches(&self) -> Vec<AnnotationPatch> {
            self.patches.lock().expect("mutex should not be poisoned").clone()
        }

        fn requests(&self) -> Vec<LoadBalancerRequest> {
            self.requests.lock().expect("mutex should not be poisoned").clone()
        }

        fn services(&self) -> MockServiceApi {
            let patches = self.patches.clone();
            let mut services = MockServiceApi::new();
            services
                .expect_patch_annotations()
                .returning(move |_, _, changes| {
                    patches.lock().expect("mutex should not be poisoned").push(changes.clone());
                    Ok(())
                });
            services
        }

        fn record(&self, request: &LoadBalancerRequest) {
            self.requests
                .lock()
                .expect("mutex should not be poisoned")
                .push(request.clone());
        }
    }

    fn service(annotations: &[(&str, &str)]) -> Service {
        Service {
            metadata: ObjectMeta {
                name: Some("web".to_string()),
                namespace: Some("default".to_string()),
                uid: Some("0b7f3c1e-9d24-a6f8-c5e1-d2b3a4f5e6d7".to_string()),
                annotations: Some(
                    annotations
                        .iter()
                        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                        .collect(),
                ),
                ..Default::default()
            },
            spec: Some(ServiceSpec {
                type_: Some("LoadBalancer".to_string()),
                ports: Some(vec![
                    ServicePort {
                        port: 80,
                        node_port: Some(30080),
                        protocol: Some("TCP".to_string()),
                        ..Default::default()
                    },
                    ServicePort {
                        port: 443,
                        node_port: Some(30443),
                        protocol: Some("TCP".to_string()),
                        ..Default::default()
                    },
                ]),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn nodes() -> Vec<Node> {
        ["digitalocean://101", "digitalocean://102"]
            .iter()
            .enumerate()
            .map(|(idx, provider_id)| Node {
                metadata: ObjectMeta {
                    name: Some(format!("node-{idx}")),
                    ..Default::default()
                },
                spec: Some(NodeSpec {
                    provider_id: Some((*provider_id).to_string()),
                    ..Default::default()
                }),
                ..Default::default()
            })
            .collect()
    }

    fn remote(id: &str, status: LBStatus) -> RemoteLoadBalancer {
        RemoteLoadBalancer {
            id: id.to_string(),
            name: LEGACY_NAME.to_string(),
            ip: "203.0.113.7".to_string(),
            status,
            algorithm: Default::default(),
            forwarding_rules: vec![],
            health_check: None,
            sticky_sessions: None,
            droplet_ids: vec![],
            tags: vec![],
            redirect_http_to_https: false,
            enable_proxy_protocol: false,
        }
    }

    fn with_certificate(mut lb: RemoteLoadBalancer, certificate_id: &str) -> RemoteLoadBalancer {
        lb.forwarding_rules = vec![ForwardingRule {
            entry_protocol: Protocol::Https,
            entry_port: 443,
            target_protocol: Protocol::Http,
            target_port: 30443,
            certificate_id: Some(certificate_id.to_string()),
            tls_passthrough: false,
        }];
        lb
    }

    fn engine(api: MockDoApi, services: MockServiceApi) -> LoadBalancers {
        LoadBalancers::new(
            Arc::new(api),
            Arc::new(services),
            "nyc3".to_string(),
            Some("cluster-1".to_string()),
            Some("vpc-1".to_string()),
        )
    }

    fn ip_of(status: &LoadBalancerStatus) -> Option<&str> {
        status.ingress.as_ref()?.first()?.ip.as_deref()
    }

    fn id_patch(id: &str) -> AnnotationPatch {
        AnnotationPatch::from([(consts::LB_ID_ANN_NAME.to_string(), Some(id.to_string()))])
    }

    /// Expect the update call to succeed and return a load balancer in `status`.
    fn expect_update(api: &mut MockDoApi, capture: &Capture, status: LBStatus) {
        let capture = capture.clone();
        api.expect_update_load_balancer().returning(move |id, request| {
            capture.record(request);
            Ok(remote(id, status))
        });
    }

    #[tokio::test]
    async fn get_without_match_reports_missing() {
        let mut api = MockDoApi::new();
        api.expect_list_load_balancers().returning(|| {
            Ok(vec![RemoteLoadBalancer {
                name: "someone-else".to_string(),
                ..remote("lb-9", LBStatus::Active)
            }])
        });
        let mut services = MockServiceApi::new();
        services.expect_patch_annotations().never();

        let mut svc = service(&[]);
        let status = engine(api, services)
            .get_load_balancer(CLUSTER, &mut svc)
            .await
            .unwrap();
        assert_eq!(status, None);
    }

    #[tokio::test]
    async fn get_caches_the_id_of_a_name_match() {
        let mut api = MockDoApi::new();
        api.expect_list_load_balancers()
            .times(1)
            .returning(|| Ok(vec![remote("lb-1", LBStatus::Active)]));
        let capture = Capture::default();

        let mut svc = service(&[]);
        let status = engine(api, capture.services())
            .get_load_balancer(CLUSTER, &mut svc)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(ip_of(&status), Some("203.0.113.7"));
        assert_eq!(capture.patches(), vec![id_patch("lb-1")]);
        assert_eq!(
            svc.annotations().get(consts::LB_ID_ANN_NAME).map(String::as_str),
            Some("lb-1")
        );
    }

    #[tokio::test]
    async fn get_reports_hostname_override() {
        let mut api = MockDoApi::new();
        api.expect_get_load_balancer()
            .returning(|id| Ok(remote(id, LBStatus::Active)));
        let mut services = MockServiceApi::new();
        services.expect_patch_annotations().never();

        let mut svc = service(&[
            (consts::LB_ID_ANN_NAME, "lb-1"),
            (consts::LB_HOSTNAME_ANN_NAME, "LB.example.com"),
        ]);
        let status = engine(api, services)
            .get_load_balancer(CLUSTER, &mut svc)
            .await
            .unwrap()
            .unwrap();
        let ingress = &status.ingress.unwrap()[0];
        assert_eq!(ingress.hostname.as_deref(), Some("lb.example.com"));
        assert_eq!(ingress.ip, None);
    }

    #[tokio::test]
    async fn ensure_creates_missing_load_balancer() {
        let capture = Capture::default();
        let mut api = MockDoApi::new();
        api.expect_list_load_balancers().returning(|| Ok(vec![]));
        api.expect_list_droplets().never();
        let recorder = capture.clone();
        api.expect_create_load_balancer()
            .times(1)
            .returning(move |request| {
                recorder.record(request);
                Ok(remote("lb-new", LBStatus::Active))
            });

        let mut svc = service(&[
            (consts::LB_TLS_PORTS_ANN_NAME, "443"),
            (consts::LB_CERTIFICATE_ID_ANN_NAME, "cert-1"),
        ]);
        let status = engine(api, capture.services())
            .ensure_load_balancer(CLUSTER, &mut svc, &nodes())
            .await
            .unwrap();

        assert_eq!(ip_of(&status), Some("203.0.113.7"));
        assert_eq!(capture.patches(), vec![id_patch("lb-new")]);

        let request = &capture.requests()[0];
        assert_eq!(request.name, LEGACY_NAME);
        assert_eq!(request.region, "nyc3");
        assert_eq!(request.droplet_ids, vec![101, 102]);
        assert_eq!(request.tags, vec!["k8s:cluster-1".to_string()]);
        assert_eq!(request.vpc_uuid.as_deref(), Some("vpc-1"));
        assert_eq!(request.sticky_sessions, StickySessions::None);
        assert_eq!(request.health_check.port, 30080);
        assert_eq!(request.forwarding_rules.len(), 2);
        assert_eq!(request.forwarding_rules[1].certificate_id.as_deref(), Some("cert-1"));
    }

    #[tokio::test]
    async fn ensure_reports_pending_load_balancer_and_still_caches_id() {
        let capture = Capture::default();
        let mut api = MockDoApi::new();
        api.expect_list_load_balancers()
            .returning(|| Ok(vec![remote("lb-1", LBStatus::New)]));
        expect_update(&mut api, &capture, LBStatus::New);

        let mut svc = service(&[]);
        let err = engine(api, capture.services())
            .ensure_load_balancer(CLUSTER, &mut svc, &nodes())
            .await
            .unwrap_err();

        assert!(matches!(err, LBControllerError::NotYetActive(LBStatus::New)));
        assert_eq!(capture.patches(), vec![id_patch("lb-1")]);
    }

    #[tokio::test]
    async fn ensure_rejects_invalid_annotations_before_any_call() {
        // No expectations: any remote call or patch fails the test.
        let api = MockDoApi::new();
        let services = MockServiceApi::new();

        let mut svc = service(&[
            (consts::LB_TLS_PORTS_ANN_NAME, "443"),
            (consts::LB_HTTP2_PORTS_ANN_NAME, "443"),
        ]);
        let before = svc.clone();
        let err = engine(api, services)
            .ensure_load_balancer(CLUSTER, &mut svc, &nodes())
            .await
            .unwrap_err();

        assert!(matches!(&err, LBControllerError::Validation(msg) if msg.contains("443")));
        assert_eq!(svc, before);
    }

    #[tokio::test]
    async fn ensure_twice_sends_the_same_configuration() {
        let capture = Capture::default();
        let mut api = MockDoApi::new();
        api.expect_list_load_balancers().never();
        api.expect_get_load_balancer()
            .times(2)
            .returning(|id| Ok(remote(id, LBStatus::Active)));
        expect_update(&mut api, &capture, LBStatus::Active);
        let mut services = MockServiceApi::new();
        services.expect_patch_annotations().never();

        let lbs = engine(api, services);
        let mut svc = service(&[
            (consts::LB_ID_ANN_NAME, "lb-1"),
            (consts::LB_STICKY_TYPE_ANN_NAME, "cookies"),
            (consts::LB_STICKY_COOKIE_NAME_ANN_NAME, "session"),
            (consts::LB_STICKY_COOKIE_TTL_ANN_NAME, "300"),
            (consts::LB_HC_PATH_ANN_NAME, "/healthz"),
        ]);
        let first = lbs
            .ensure_load_balancer(CLUSTER, &mut svc, &nodes())
            .await
            .unwrap();
        let second = lbs
            .ensure_load_balancer(CLUSTER, &mut svc, &nodes())
            .await
            .unwrap();

        assert_eq!(first, second);
        let requests = capture.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0], requests[1]);
        assert_eq!(requests[0].health_check.protocol, Protocol::Http);
        assert!(matches!(
            requests[0].sticky_sessions,
            StickySessions::Cookies { cookie_ttl_seconds: 300, .. }
        ));
    }

    #[tokio::test]
    async fn ensure_follows_renewed_lets_encrypt_certificate() {
        let capture = Capture::default();
        let mut api = MockDoApi::new();
        api.expect_get_load_balancer()
            .returning(|id| Ok(with_certificate(remote(id, LBStatus::Active), "cert-new")));
        api.expect_get_certificate()
            .withf(|id| id == "cert-new")
            .returning(|id| {
                Ok(Certificate {
                    id: id.to_string(),
                    name: "le".to_string(),
                    kind: consts::CERT_TYPE_LETS_ENCRYPT.to_string(),
                    state: "verified".to_string(),
                    not_after: String::new(),
                })
            });
        expect_update(&mut api, &capture, LBStatus::Active);

        let mut svc = service(&[
            (consts::LB_ID_ANN_NAME, "lb-1"),
            (consts::LB_CERTIFICATE_ID_ANN_NAME, "cert-old"),
        ]);
        engine(api, capture.services())
            .ensure_load_balancer(CLUSTER, &mut svc, &nodes())
            .await
            .unwrap();

        assert_eq!(
            capture.requests()[0].forwarding_rules[1].certificate_id.as_deref(),
            Some("cert-new")
        );
        assert_eq!(
            capture.patches(),
            vec![AnnotationPatch::from([(
                consts::LB_CERTIFICATE_ID_ANN_NAME.to_string(),
                Some("cert-new".to_string())
            )])]
        );
    }

    #[tokio::test]
    async fn custom_certificates_are_left_alone() {
        let capture = Capture::default();
        let mut api = MockDoApi::new();
        api.expect_get_load_balancer()
            .returning(|id| Ok(with_certificate(remote(id, LBStatus::Active), "cert-other")));
        api.expect_get_certificate().returning(|id| {
            Ok(Certificate {
                id: id.to_string(),
                name: "mine".to_string(),
                kind: "custom".to_string(),
                state: "verified".to_string(),
                not_after: String::new(),
            })
        });
        expect_update(&mut api, &capture, LBStatus::Active);
        let mut services = MockServiceApi::new();
        services.expect_patch_annotations().never();

        let mut svc = service(&[
            (consts::LB_ID_ANN_NAME, "lb-1"),
            (consts::LB_CERTIFICATE_ID_ANN_NAME, "cert-mine"),
        ]);
        engine(api, services)
            .ensure_load_balancer(CLUSTER, &mut svc, &nodes())
            .await
            .unwrap();
        assert_eq!(
            capture.requests()[0].forwarding_rules[1].certificate_id.as_deref(),
            Some("cert-mine")
        );
    }

    #[tokio::test]
    async fn vanished_remote_certificate_is_tolerated() {
        let capture = Capture::default();
        let mut api = MockDoApi::new();
        api.expect_get_load_balancer()
            .returning(|id| Ok(with_certificate(remote(id, LBStatus::Active), "cert-gone")));
        api.expect_get_certificate().returning(|_| {
            Err(ApiError::NotFound {
                message: "not found".to_string(),
            })
        });
        expect_update(&mut api, &capture, LBStatus::Active);
        let mut services = MockServiceApi::new();
        services.expect_patch_annotations().never();

        let mut svc = service(&[
            (consts::LB_ID_ANN_NAME, "lb-1"),
            (consts::LB_CERTIFICATE_ID_ANN_NAME, "cert-1"),
        ]);
        engine(api, services)
            .ensure_load_balancer(CLUSTER, &mut svc, &nodes())
            .await
            .unwrap();
        assert_eq!(capture.requests().len(), 1);
    }

    #[tokio::test]
    async fn certificate_lookup_failure_stops_the_update() {
        let mut api = MockDoApi::new();
        api.expect_get_load_balancer()
            .returning(|id| Ok(with_certificate(remote(id, LBStatus::Active), "cert-x")));
        api.expect_get_certificate().returning(|_| {
            Err(ApiError::Status {
                status: 500,
                message: "internal".to_string(),
            })
        });
        api.expect_update_load_balancer().never();
        let mut services = MockServiceApi::new();
        services.expect_patch_annotations().never();

        let mut svc = service(&[
            (consts::LB_ID_ANN_NAME, "lb-1"),
            (consts::LB_CERTIFICATE_ID_ANN_NAME, "cert-1"),
        ]);
        let err = engine(api, services)
            .ensure_load_balancer(CLUSTER, &mut svc, &nodes())
            .await
            .unwrap_err();
        assert!(matches!(err, LBControllerError::Api { .. }));
    }

    #[tokio::test]
    async fn patch_failure_is_combined_with_the_operation_error() {
        let capture = Capture::default();
        let mut api = MockDoApi::new();
        api.expect_list_load_balancers()
            .returning(|| Ok(vec![remote("lb-1", LBStatus::Errored)]));
        expect_update(&mut api, &capture, LBStatus::Errored);
        let mut services = MockServiceApi::new();
        services.expect_patch_annotations().returning(|_, _, _| {
            Err(kube::Error::Api(kube::error::ErrorResponse {
                status: "Failure".to_string(),
                message: "forbidden".to_string(),
                reason: "Forbidden".to_string(),
                code: 403,
            }))
        });

        let mut svc = service(&[]);
        let err = engine(api, services)
            .ensure_load_balancer(CLUSTER, &mut svc, &nodes())
            .await
            .unwrap_err();
        let LBControllerError::Aggregate(errors) = err else {
            panic!("expected aggregate error, got {err:?}");
        };
        assert!(matches!(errors[0], LBControllerError::NotYetActive(LBStatus::Errored)));
        assert!(matches!(errors[1], LBControllerError::KubeError(_)));
    }

    #[tokio::test]
    async fn update_requires_an_existing_load_balancer() {
        let mut api = MockDoApi::new();
        api.expect_list_load_balancers().returning(|| Ok(vec![]));
        api.expect_create_load_balancer().never();
        api.expect_update_load_balancer().never();
        let mut services = MockServiceApi::new();
        services.expect_patch_annotations().never();

        let mut svc = service(&[]);
        let err = engine(api, services)
            .update_load_balancer(CLUSTER, &mut svc, &nodes())
            .await
            .unwrap_err();
        assert!(matches!(err, LBControllerError::LoadBalancerNotFound));
    }

    #[tokio::test]
    async fn update_pushes_new_membership() {
        let capture = Capture::default();
        let mut api = MockDoApi::new();
        api.expect_get_load_balancer()
            .returning(|id| Ok(remote(id, LBStatus::New)));
        expect_update(&mut api, &capture, LBStatus::New);
        let mut services = MockServiceApi::new();
        services.expect_patch_annotations().never();

        let mut svc = service(&[(consts::LB_ID_ANN_NAME, "lb-1")]);
        engine(api, services)
            .update_load_balancer(CLUSTER, &mut svc, &nodes()[..1])
            .await
            .unwrap();
        assert_eq!(capture.requests()[0].droplet_ids, vec![101]);
    }

    #[tokio::test]
    async fn delete_of_missing_load_balancer_succeeds() {
        let mut api = MockDoApi::new();
        api.expect_list_load_balancers().returning(|| Ok(vec![]));
        api.expect_delete_load_balancer().never();
        let mut services = MockServiceApi::new();
        services.expect_patch_annotations().never();

        let mut svc = service(&[]);
        engine(api, services)
            .ensure_load_balancer_deleted(CLUSTER, &mut svc)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn delete_racing_remote_removal_succeeds() {
        let mut api = MockDoApi::new();
        api.expect_get_load_balancer()
            .returning(|id| Ok(remote(id, LBStatus::Active)));
        api.expect_delete_load_balancer()
            .withf(|id| id == "lb-1")
            .times(1)
            .returning(|_| {
                Err(ApiError::NotFound {
                    message: "already gone".to_string(),
                })
            });
        let mut services = MockServiceApi::new();
        services.expect_patch_annotations().never();

        let mut svc = service(&[(consts::LB_ID_ANN_NAME, "lb-1")]);
        engine(api, services)
            .ensure_load_balancer_deleted(CLUSTER, &mut svc)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn delete_surfaces_other_errors() {
        let mut api = MockDoApi::new();
        api.expect_list_load_balancers()
            .returning(|| Ok(vec![remote("lb-1", LBStatus::Active)]));
        api.expect_delete_load_balancer().returning(|_| {
            Err(ApiError::Status {
                status: 500,
                message: "internal".to_string(),
            })
        });
        let mut services = MockServiceApi::new();
        services.expect_patch_annotations().never();

        let mut svc = service(&[]);
        let err = engine(api, services)
            .ensure_load_balancer_deleted(CLUSTER, &mut svc)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("failed to delete load-balancer"));
    }
}
