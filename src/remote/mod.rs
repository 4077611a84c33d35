//! Remote marketplace access.
//!
//! Every operation class gets its own `reqwest::Client` so a slow bulk
//! transfer never occupies the connections a metadata call needs. The pool is
//! picked from the job's declared [`PoolClass`], never ad hoc.

pub mod transfer;

use std::sync::Arc;

use reqwest::{Client, Method, RequestBuilder, Response, StatusCode, Url};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::config::HttpConfig;
use crate::error::{ConfigError, TaskError};
use crate::tasks::ApiKey;

pub use transfer::download_to_file;

/// Connection pool selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolClass {
    /// Small JSON calls against the marketplace API.
    Api,
    /// Asset file downloads.
    Downloads,
    /// Asset file uploads to object storage.
    Uploads,
    /// Small thumbnails and avatars.
    SmallThumbs,
    /// Full-size thumbnails.
    BigThumbs,
}

impl PoolClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Api => "api",
            Self::Downloads => "downloads",
            Self::Uploads => "uploads",
            Self::SmallThumbs => "small_thumbs",
            Self::BigThumbs => "big_thumbs",
        }
    }
}

/// The per-class HTTP clients.
#[derive(Debug, Clone)]
pub struct HttpPools {
    api: Client,
    downloads: Client,
    uploads: Client,
    small_thumbs: Client,
    big_thumbs: Client,
}

impl HttpPools {
    pub fn new(config: &HttpConfig, user_agent: &str) -> Result<Self, ConfigError> {
        let build = |class: PoolClass| -> Result<Client, ConfigError> {
            let (timeout, idle) = match class {
                PoolClass::Api => (config.api_timeout, 20),
                PoolClass::Downloads | PoolClass::Uploads => (config.transfer_timeout, 10),
                PoolClass::SmallThumbs | PoolClass::BigThumbs => (config.thumbnail_timeout, 20),
            };
            Client::builder()
                .user_agent(user_agent)
                .connect_timeout(config.connect_timeout)
                .timeout(timeout)
                .pool_max_idle_per_host(idle)
                .build()
                .map_err(|e| ConfigError::HttpClient {
                    pool: class.as_str().to_string(),
                    reason: e.to_string(),
                })
        };

        Ok(Self {
            api: build(PoolClass::Api)?,
            downloads: build(PoolClass::Downloads)?,
            uploads: build(PoolClass::Uploads)?,
            small_thumbs: build(PoolClass::SmallThumbs)?,
            big_thumbs: build(PoolClass::BigThumbs)?,
        })
    }

    pub fn get(&self, class: PoolClass) -> &Client {
        match class {
            PoolClass::Api => &self.api,
            PoolClass::Downloads => &self.downloads,
            PoolClass::Uploads => &self.uploads,
            PoolClass::SmallThumbs => &self.small_thumbs,
            PoolClass::BigThumbs => &self.big_thumbs,
        }
    }
}

/// Marketplace client: server address, daemon identity headers and pools.
#[derive(Debug, Clone)]
pub struct Marketplace {
    pools: Arc<HttpPools>,
    server: String,
    system_id: String,
}

impl Marketplace {
    pub fn new(pools: HttpPools, server: impl Into<String>, system_id: impl Into<String>) -> Self {
        let server: String = server.into();
        Self {
            pools: Arc::new(pools),
            server: server.trim_end_matches('/').to_string(),
            system_id: system_id.into(),
        }
    }

    pub fn server(&self) -> &str {
        &self.server
    }

    pub fn system_id(&self) -> &str {
        &self.system_id
    }

    /// Absolute URL for a server-relative path.
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.server, path)
    }

    pub fn pool(&self, class: PoolClass) -> &Client {
        self.pools.get(class)
    }

    /// Request with the daemon's identity headers and, when present, the
    /// user's bearer token.
    pub fn request(
        &self,
        class: PoolClass,
        method: Method,
        url: &str,
        api_key: &ApiKey,
    ) -> RequestBuilder {
        let builder = self
            .pool(class)
            .request(method, url)
            .header("X-System-ID", &self.system_id);
        match api_key.expose() {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }

    /// Send a request and require an exact success status.
    pub async fn execute(
        &self,
        builder: RequestBuilder,
        url: &str,
        expected: StatusCode,
        operation: &str,
    ) -> Result<Response, TaskError> {
        let response = builder
            .send()
            .await
            .map_err(|e| TaskError::transport(url, e))?;
        if response.status() != expected {
            return Err(TaskError::Status {
                operation: operation.to_string(),
                status: response.status(),
                url: url.to_string(),
            });
        }
        Ok(response)
    }

    /// GET a JSON document from the API pool.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        api_key: &ApiKey,
        operation: &str,
    ) -> Result<T, TaskError> {
        let builder = self.request(PoolClass::Api, Method::GET, url, api_key);
        let response = self.execute(builder, url, StatusCode::OK, operation).await?;
        decode(response, url).await
    }

    /// Send a JSON body on the API pool and decode the JSON reply.
    pub async fn send_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        method: Method,
        url: &str,
        api_key: &ApiKey,
        body: &B,
        expected: StatusCode,
        operation: &str,
    ) -> Result<T, TaskError> {
        let builder = self
            .request(PoolClass::Api, method, url, api_key)
            .json(body);
        let response = self.execute(builder, url, expected, operation).await?;
        decode(response, url).await
    }
}

/// Decode a JSON body. An empty body decodes as JSON `null`.
pub async fn decode<T: DeserializeOwned>(response: Response, url: &str) -> Result<T, TaskError> {
    let bytes = response
        .bytes()
        .await
        .map_err(|e| TaskError::transport(url, e))?;
    let body: &[u8] = if bytes.iter().all(u8::is_ascii_whitespace) {
        b"null"
    } else {
        &bytes
    };
    serde_json::from_slice(body).map_err(|e| TaskError::Decode {
        url: url.to_string(),
        reason: e.to_string(),
    })
}

/// Last non-empty path segment of a URL.
pub fn file_name_from_url(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let name = parsed.path_segments()?.next_back()?;
    (!name.is_empty()).then(|| name.to_string())
}
