use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::config::{FileHostConfig, HttpConfig};
use crate::remote::{Body, Encoding, Fetcher, Method, Progress, RemoteError, RemoteRequest, RemoteResult};

/// reqwest-backed [`Fetcher`].
pub struct HttpFetcher {
    client: reqwest::Client,
    download_timeout: Duration,
}

fn network_error(endpoint: &str, err: reqwest::Error) -> RemoteError {
    let detail = if err.is_timeout() {
        "request timed out".to_string()
    } else {
        err.to_string()
    };
    RemoteError::Network {
        endpoint: endpoint.to_string(),
        detail,
    }
}

fn io_error(path: &Path, err: std::io::Error) -> RemoteError {
    RemoteError::LocalIo {
        detail: format!("{}: {}", path.display(), err),
    }
}

impl HttpFetcher {
    pub fn new(config: &HttpConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .connect_timeout(Duration::from_secs(config.timeout_secs.min(30)))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            download_timeout: Duration::from_secs(config.download_timeout_secs),
        })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, request: &RemoteRequest) -> RemoteResult<Body> {
        let endpoint = request.display_url();
        debug!("Sending {:?} request to {}", request.method, endpoint);

        let mut builder = match request.method {
            Method::Get => self.client.get(&request.url),
            Method::Post => self.client.post(&request.url),
        };
        builder = match request.encoding {
            Encoding::Query => builder.query(&request.params),
            Encoding::Json => builder.json(&request.json_body()),
            Encoding::Form => builder.form(&request.params),
        };
        for (key, value) in &request.headers {
            builder = builder.header(key.as_str(), value.as_str());
        }

        let response = builder
            .timeout(request.timeout)
            .send()
            .await
            .map_err(|e| network_error(&endpoint, e))?;

        let status = response.status();
        if !status.is_success() {
            warn!("Remote API {} answered {}", endpoint, status);
            return Err(RemoteError::Http {
                endpoint,
                status: status.as_u16(),
            });
        }

        let raw = response
            .text()
            .await
            .map_err(|e| network_error(&endpoint, e))?;
        debug!("Received {} bytes from {}", raw.len(), endpoint);
        Ok(Body::parse(raw))
    }

    async fn download(
        &self,
        url: &str,
        referer: Option<&str>,
        dest: &Path,
        progress: Option<Progress<'_>>,
    ) -> RemoteResult<u64> {
        debug!("Downloading {} into {}", url, dest.display());

        let mut builder = self.client.get(url).timeout(self.download_timeout);
        if let Some(referer) = referer {
            builder = builder.header(reqwest::header::REFERER, referer);
        }
        let response = builder.send().await.map_err(|e| network_error(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(RemoteError::Http {
                endpoint: url.to_string(),
                status: status.as_u16(),
            });
        }

        let total = response.content_length();
        let mut file = tokio::fs::File::create(dest)
            .await
            .map_err(|e| io_error(dest, e))?;
        let mut written: u64 = 0;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| network_error(url, e))?;
            file.write_all(&chunk)
                .await
                .map_err(|e| io_error(dest, e))?;
            written += chunk.len() as u64;
            if let Some(report) = progress {
                report(written, total);
            }
        }
        file.flush().await.map_err(|e| io_error(dest, e))?;

        if written == 0 {
            return Err(RemoteError::malformed(format!("{} returned an empty file", url)));
        }
        Ok(written)
    }

    async fn publish(&self, host: &FileHostConfig, path: &Path) -> RemoteResult<String> {
        let bytes = tokio::fs::read(path).await.map_err(|e| io_error(path, e))?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload.bin".to_string());

        let mut form = reqwest::multipart::Form::new();
        for (key, value) in &host.extra {
            form = form.text(key.clone(), value.clone());
        }
        form = form.part(
            host.field.clone(),
            reqwest::multipart::Part::bytes(bytes).file_name(file_name),
        );

        let response = self
            .client
            .post(&host.url)
            .multipart(form)
            .timeout(self.download_timeout)
            .send()
            .await
            .map_err(|e| network_error(&host.url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(RemoteError::Http {
                endpoint: host.url.clone(),
                status: status.as_u16(),
            });
        }

        let link = response
            .text()
            .await
            .map_err(|e| network_error(&host.url, e))?
            .trim()
            .to_string();
        if url::Url::parse(&link).is_err() {
            return Err(RemoteError::malformed(format!(
                "file host returned a non-URL body: {}",
                link
            )));
        }
        Ok(link)
    }
}
