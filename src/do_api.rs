//! DigitalOcean API surface used by the reconciler.

use async_trait::async_trait;
use reqwest::{Client as HttpClient, RequestBuilder, Response, StatusCode};
use serde::{de::DeserializeOwned, Deserialize};
use thiserror::Error;

#[cfg(test)]
use mockall::automock;

use crate::models::{Certificate, Droplet, LoadBalancerRequest, RemoteLoadBalancer};

const PAGE_SIZE: u32 = 200;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Resource not found: {message}")]
    NotFound { message: String },
    #[error("Unexpected response status {status}: {message}")]
    Status { status: u16, message: String },
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
}

impl ApiError {
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

/// Remote calls the reconciler depends on.
///
/// Every method is a single logical API operation; list methods return the
/// complete collection regardless of pagination.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait DoApi: Send + Sync {
    async fn get_load_balancer(&self, id: &str) -> ApiResult<RemoteLoadBalancer>;

    async fn list_load_balancers(&self) -> ApiResult<Vec<RemoteLoadBalancer>>;

    async fn create_load_balancer(
        &self,
        request: &LoadBalancerRequest,
    ) -> ApiResult<RemoteLoadBalancer>;

    async fn update_load_balancer(
        &self,
        id: &str,
        request: &LoadBalancerRequest,
    ) -> ApiResult<RemoteLoadBalancer>;

    async fn delete_load_balancer(&self, id: &str) -> ApiResult<()>;

    async fn list_droplets(&self) -> ApiResult<Vec<Droplet>>;

    async fn get_certificate(&self, id: &str) -> ApiResult<Certificate>;
}

#[derive(Deserialize)]
struct LoadBalancerEnvelope {
    load_balancer: RemoteLoadBalancer,
}

#[derive(Deserialize)]
struct CertificateEnvelope {
    certificate: Certificate,
}

#[derive(Deserialize, Default)]
struct Pages {
    next: Option<String>,
}

#[derive(Deserialize, Default)]
struct Links {
    #[serde(default)]
    pages: Option<Pages>,
}

#[derive(Deserialize)]
struct LoadBalancerPage {
    #[serde(default)]
    load_balancers: Vec<RemoteLoadBalancer>,
    #[serde(default)]
    links: Links,
}

#[derive(Deserialize)]
struct DropletPage {
    #[serde(default)]
    droplets: Vec<Droplet>,
    #[serde(default)]
    links: Links,
}

impl Links {
    fn has_next(&self) -> bool {
        self.pages.as_ref().and_then(|p| p.next.as_ref()).is_some()
    }
}

/// HTTP implementation of [`DoApi`] with bearer-token authentication.
#[derive(Debug, Clone)]
pub struct DoClient {
    base_url: String,
    token: String,
    http: HttpClient,
}

impl DoClient {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> ApiResult<Self> {
        let http = HttpClient::builder()
            .user_agent(concat!("do-lb-controller/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            base_url: base_url.into(),
            token: token.into(),
            http,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v2/{}", self.base_url.trim_end_matches('/'), path)
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        builder.bearer_auth(&self.token)
    }

    async fn send<T: DeserializeOwned>(&self, builder: RequestBuilder) -> ApiResult<T> {
        let response = self.authorized(builder).send().await?;
        Ok(check_status(response).await?.json::<T>().await?)
    }

    /// Walk a paginated collection until the API stops reporting a next page.
    async fn list_pages<P, T>(
        &self,
        path: &str,
        split: impl Fn(P) -> (Vec<T>, bool) + Send,
    ) -> ApiResult<Vec<T>>
    where
        P: DeserializeOwned,
    {
        let mut items = Vec::new();
        let mut page = 1u32;
        loop {
            let builder = self
                .http
                .get(self.url(path))
                .query(&[("page", page), ("per_page", PAGE_SIZE)]);
            let (chunk, has_next) = split(self.send::<P>(builder).await?);
            items.extend(chunk);
            if !has_next {
                return Ok(items);
            }
            page += 1;
        }
    }
}

async fn check_status(response: Response) -> ApiResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<serde_json::Value>(&body)
        .ok()
        .and_then(|json| json["message"].as_str().map(ToString::to_string))
        .unwrap_or(body);
    if status == StatusCode::NOT_FOUND {
        return Err(ApiError::NotFound { message });
    }
    Err(ApiError::Status {
        status: status.as_u16(),
        message,
    })
}

#[async_trait]
impl DoApi for DoClient {
    async fn get_load_balancer(&self, id: &str) -> ApiResult<RemoteLoadBalancer> {
        let envelope: LoadBalancerEnvelope = self
            .send(self.http.get(self.url(&format!("load_balancers/{id}"))))
            .await?;
        Ok(envelope.load_balancer)
    }

    async fn list_load_balancers(&self) -> ApiResult<Vec<RemoteLoadBalancer>> {
        self.list_pages("load_balancers", |page: LoadBalancerPage| {
            let has_next = page.links.has_next();
            (page.load_balancers, has_next)
        })
        .await
    }

    async fn create_load_balancer(
        &self,
        request: &LoadBalancerRequest,
    ) -> ApiResult<RemoteLoadBalancer> {
        let envelope: LoadBalancerEnvelope = self
            .send(self.http.post(self.url("load_balancers")).json(request))
            .await?;
        Ok(envelope.load_balancer)
    }

    async fn update_load_balancer(
        &self,
        id: &str,
        request: &LoadBalancerRequest,
    ) -> ApiResult<RemoteLoadBalancer> {
        let envelope: LoadBalancerEnvelope = self
            .send(
                self.http
                    .put(self.url(&format!("load_balancers/{id}")))
                    .json(request),
            )
            .await?;
        Ok(envelope.load_balancer)
    }

    async fn delete_load_balancer(&self, id: &str) -> ApiResult<()> {
        let builder = self.http.delete(self.url(&format!("load_balancers/{id}")));
        check_status(self.authorized(builder).send().await?).await?;
        Ok(())
    }

    async fn list_droplets(&self) -> ApiResult<Vec<Droplet>> {
        self.list_pages("droplets", |page: DropletPage| {
            let has_next = page.links.has_next();
            (page.droplets, has_next)
        })
        .await
    }

    async fn get_certificate(&self, id: &str) -> ApiResult<Certificate> {
        let envelope: CertificateEnvelope = self
            .send(self.http.get(self.url(&format!("certificates/{id}"))))
            .await?;
        Ok(envelope.certificate)
    }
}
