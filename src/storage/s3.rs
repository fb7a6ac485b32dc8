//! S3Backend — speaks the standard S3 REST API (GetObject, PutObject with
//! If-Match, DeleteObject, ListObjectsV2, HeadObject) directly over
//! `reqwest` with hand-rolled AWS SigV4 request signing, wrapped in the
//! retry/circuit-breaker/cache resilience layer.

use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

use crate::cancel::CancelToken;
use crate::error::{self, ErrorKind};
use crate::storage::backend::{HealthStatus, Stat, StorageBackend, StorageError, StorageKind};
use crate::storage::cache::TieredCache;
use crate::storage::resilience::{retry_with_backoff, CircuitBreaker};

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone)]
pub struct S3Config {
    pub bucket: String,
    pub region: String,
    pub endpoint: String,
    pub access_key_id: String,
    pub secret_access_key: String,
}

pub struct S3Backend {
    config: S3Config,
    client: reqwest::Client,
    breaker: CircuitBreaker,
    cache: TieredCache,
}

impl S3Backend {
    pub fn new(config: S3Config, cache: TieredCache) -> Self {
        S3Backend {
            config,
            client: reqwest::Client::new(),
            breaker: CircuitBreaker::new(),
            cache,
        }
    }

    fn object_url(&self, key: &str) -> String {
        format!(
            "{}/{}/{}",
            self.config.endpoint.trim_end_matches('/'),
            self.config.bucket,
            key.trim_start_matches('/')
        )
    }

    async fn send_signed(
        &self,
        method: reqwest::Method,
        key: &str,
        query: &str,
        headers: &[(&str, String)],
        body: Vec<u8>,
    ) -> Result<reqwest::Response, error::Error> {
        self.breaker.check()?;
        let url = if query.is_empty() {
            self.object_url(key)
        } else {
            format!("{}?{query}", self.object_url(key))
        };
        let parsed = reqwest::Url::parse(&url).map_err(|e| {
            error::Error::with_source(ErrorKind::Fatal, "invalid S3 request url", e)
        })?;

        let now = Utc::now();
        let signed = sign_request(&self.config, &method, &parsed, headers, &body, now);

        let mut request = self.client.request(method, parsed);
        for (name, value) in &signed.headers {
            request = request.header(name, value);
        }
        if !body.is_empty() {
            request = request.body(body);
        }

        let response = request
            .timeout(std::time::Duration::from_secs(30))
            .send()
            .await
            .map_err(|e| classify_reqwest_error(e))?;

        if response.status().is_success() {
            self.breaker.record_success();
            Ok(response)
        } else if response.status() == reqwest::StatusCode::NOT_FOUND {
            self.breaker.record_success();
            Err(StorageError::NotFound(key.to_string()).into())
        } else if response.status() == reqwest::StatusCode::PRECONDITION_FAILED {
            self.breaker.record_success();
            Err(StorageError::AlreadyExists(key.to_string()).into())
        } else if response.status() == reqwest::StatusCode::FORBIDDEN
            || response.status() == reqwest::StatusCode::UNAUTHORIZED
        {
            self.breaker.record_failure();
            Err(StorageError::Fatal(format!("authentication failed: {}", response.status())).into())
        } else if response.status().is_server_error() {
            self.breaker.record_failure();
            Err(StorageError::Transient(format!("S3 returned {}", response.status())).into())
        } else {
            self.breaker.record_failure();
            Err(StorageError::Fatal(format!("unexpected S3 response: {}", response.status())).into())
        }
    }
}

fn classify_reqwest_error(e: reqwest::Error) -> error::Error {
    if e.is_timeout() || e.is_connect() {
        StorageError::Transient(e.to_string()).into()
    } else {
        StorageError::Fatal(e.to_string()).into()
    }
}

#[async_trait::async_trait]
impl StorageBackend for S3Backend {
    fn kind(&self) -> StorageKind {
        StorageKind::S3
    }

    async fn read(&self, path: &str, cancel: &CancelToken) -> Result<Vec<u8>, error::Error> {
        cancel.check()?;
        if let Some(cached) = self.cache.get(path) {
            return Ok(cached);
        }
        if self.breaker.is_open() {
            return Err(StorageError::Transient("circuit breaker open and no cached copy available".into()).into());
        }
        let path_owned = path.to_string();
        let bytes = retry_with_backoff(|| async {
            let response = self.send_signed(reqwest::Method::GET, &path_owned, "", &[], Vec::new()).await?;
            response.bytes().await.map(|b| b.to_vec()).map_err(classify_reqwest_error)
        })
        .await?;
        self.cache.put(path, bytes.clone());
        Ok(bytes)
    }

    async fn write(
        &self,
        path: &str,
        bytes: &[u8],
        if_match: Option<&str>,
        cancel: &CancelToken,
    ) -> Result<Stat, error::Error> {
        cancel.check()?;
        let headers: Vec<(&str, String)> = if_match
            .map(|etag| vec![("if-match", etag.to_string())])
            .unwrap_or_default();
        let path_owned = path.to_string();
        let body = bytes.to_vec();
        let response = retry_with_backoff(|| {
            let headers = headers.clone();
            let body = body.clone();
            let path_owned = path_owned.clone();
            async move { self.send_signed(reqwest::Method::PUT, &path_owned, "", &headers, body).await }
        })
        .await?;
        let etag = response
            .headers()
            .get("etag")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.trim_matches('"').to_string());
        self.cache.invalidate(path);
        Ok(Stat {
            size: bytes.len() as u64,
            modified: Utc::now(),
            etag,
        })
    }

    async fn delete(&self, path: &str, cancel: &CancelToken) -> Result<(), error::Error> {
        cancel.check()?;
        let path_owned = path.to_string();
        match retry_with_backoff(|| async { self.send_signed(reqwest::Method::DELETE, &path_owned, "", &[], Vec::new()).await })
            .await
        {
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
        self.cache.invalidate(path);
        Ok(())
    }

    async fn exists(&self, path: &str, cancel: &CancelToken) -> Result<bool, error::Error> {
        match self.stat(path, cancel).await {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn list(&self, prefix: &str, cancel: &CancelToken) -> Result<Vec<String>, error::Error> {
        cancel.check()?;
        let query = format!(
            "list-type=2&prefix={}&delimiter=/",
            percent_encoding::utf8_percent_encode(prefix, percent_encoding::NON_ALPHANUMERIC)
        );
        let response = retry_with_backoff(|| async { self.send_signed(reqwest::Method::GET, "", &query, &[], Vec::new()).await })
            .await?;
        let body = response.text().await.map_err(classify_reqwest_error)?;
        Ok(parse_list_objects_keys(&body))
    }

    async fn stat(&self, path: &str, cancel: &CancelToken) -> Result<Stat, error::Error> {
        cancel.check()?;
        let path_owned = path.to_string();
        let response = retry_with_backoff(|| async { self.send_signed(reqwest::Method::HEAD, &path_owned, "", &[], Vec::new()).await })
            .await?;
        let size = response
            .headers()
            .get("content-length")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse().ok())
            .unwrap_or(0);
        let etag = response
            .headers()
            .get("etag")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.trim_matches('"').to_string());
        Ok(Stat {
            size,
            modified: Utc::now(),
            etag,
        })
    }

    async fn health(&self, _cancel: &CancelToken) -> HealthStatus {
        if self.breaker.is_open() {
            HealthStatus::Degraded
        } else {
            HealthStatus::Ok
        }
    }
}

/// Extracts `<Key>...</Key>` values from a ListObjectsV2 XML response
/// without pulling in a full XML parser — the response shape is fixed and
/// well-known.
fn parse_list_objects_keys(xml: &str) -> Vec<String> {
    let mut keys = Vec::new();
    let mut rest = xml;
    while let Some(start) = rest.find("<Key>") {
        let after = &rest[start + "<Key>".len()..];
        let Some(end) = after.find("</Key>") else { break };
        keys.push(after[..end].to_string());
        rest = &after[end + "</Key>".len()..];
    }
    keys
}

struct SignedRequest {
    headers: Vec<(String, String)>,
}

/// AWS Signature Version 4 for a single request. Scope and canonical form
/// per the published SigV4 algorithm: canonical request -> string to sign
/// -> signing key -> signature -> Authorization header.
fn sign_request(
    config: &S3Config,
    method: &reqwest::Method,
    url: &reqwest::Url,
    extra_headers: &[(&str, String)],
    body: &[u8],
    now: chrono::DateTime<Utc>,
) -> SignedRequest {
    let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
    let date_stamp = now.format("%Y%m%d").to_string();
    let host = url.host_str().unwrap_or("").to_string();
    let payload_hash = hex::encode(Sha256::digest(body));

    let mut headers: Vec<(String, String)> = vec![
        ("host".to_string(), host.clone()),
        ("x-amz-date".to_string(), amz_date.clone()),
        ("x-amz-content-sha256".to_string(), payload_hash.clone()),
    ];
    for (name, value) in extra_headers {
        headers.push((name.to_ascii_lowercase(), value.clone()));
    }
    headers.sort_by(|a, b| a.0.cmp(&b.0));

    let canonical_headers: String = headers.iter().map(|(k, v)| format!("{k}:{v}\n")).collect();
    let signed_headers = headers.iter().map(|(k, _)| k.as_str()).collect::<Vec<_>>().join(";");

    let canonical_query = canonicalize_query(url.query().unwrap_or(""));

    let canonical_request = format!(
        "{}\n{}\n{}\n{}\n{}\n{}",
        method.as_str(),
        url.path(),
        canonical_query,
        canonical_headers,
        signed_headers,
        payload_hash
    );

    let credential_scope = format!("{date_stamp}/{}/s3/aws4_request", config.region);
    let string_to_sign = format!(
        "AWS4-HMAC-SHA256\n{amz_date}\n{credential_scope}\n{}",
        hex::encode(Sha256::digest(canonical_request.as_bytes()))
    );

    let signing_key = derive_signing_key(&config.secret_access_key, &date_stamp, &config.region, "s3");
    let signature = hex::encode(hmac_bytes(&signing_key, string_to_sign.as_bytes()));

    let authorization = format!(
        "AWS4-HMAC-SHA256 Credential={}/{credential_scope}, SignedHeaders={signed_headers}, Signature={signature}",
        config.access_key_id
    );

    let mut final_headers = headers;
    final_headers.push(("authorization".to_string(), authorization));
    SignedRequest {
        headers: final_headers,
    }
}

fn canonicalize_query(query: &str) -> String {
    if query.is_empty() {
        return String::new();
    }
    let mut pairs: Vec<(&str, &str)> = query
        .split('&')
        .filter(|p| !p.is_empty())
        .map(|p| p.split_once('=').unwrap_or((p, "")))
        .collect();
    pairs.sort();
    pairs.into_iter().map(|(k, v)| format!("{k}={v}")).collect::<Vec<_>>().join("&")
}

fn derive_signing_key(secret: &str, date_stamp: &str, region: &str, service: &str) -> Vec<u8> {
    let k_date = hmac_bytes(format!("AWS4{secret}").as_bytes(), date_stamp.as_bytes());
    let k_region = hmac_bytes(&k_date, region.as_bytes());
    let k_service = hmac_bytes(&k_region, service.as_bytes());
    hmac_bytes(&k_service, b"aws4_request")
}

fn hmac_bytes(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> S3Config {
        S3Config {
            bucket: "kbvault".to_string(),
            region: "us-east-1".to_string(),
            endpoint: "https://s3.amazonaws.com".to_string(),
            access_key_id: "AKIDEXAMPLE".to_string(),
            secret_access_key: "wJalrXUtnFEMI/K7MDENG/bPxRfiCYEXAMPLEKEY".to_string(),
        }
    }

    #[test]
    fn signing_is_deterministic_for_the_same_inputs() {
        let config = config();
        let url = reqwest::Url::parse("https://s3.amazonaws.com/kbvault/notes/a.md").unwrap();
        let now = Utc::now();
        let a = sign_request(&config, &reqwest::Method::GET, &url, &[], b"", now);
        let b = sign_request(&config, &reqwest::Method::GET, &url, &[], b"", now);
        assert_eq!(a.headers, b.headers);
    }

    #[test]
    fn signing_changes_with_body() {
        let config = config();
        let url = reqwest::Url::parse("https://s3.amazonaws.com/kbvault/notes/a.md").unwrap();
        let now = Utc::now();
        let a = sign_request(&config, &reqwest::Method::PUT, &url, &[], b"one", now);
        let b = sign_request(&config, &reqwest::Method::PUT, &url, &[], b"two", now);
        let sig_a = a.headers.iter().find(|(k, _)| k == "authorization").unwrap();
        let sig_b = b.headers.iter().find(|(k, _)| k == "authorization").unwrap();
        assert_ne!(sig_a.1, sig_b.1);
    }

    #[test]
    fn parses_keys_from_list_objects_xml() {
        let xml = r#"<ListBucketResult><Contents><Key>notes/a.md</Key></Contents><Contents><Key>notes/b.md</Key></Contents></ListBucketResult>"#;
        assert_eq!(parse_list_objects_keys(xml), vec!["notes/a.md", "notes/b.md"]);
    }

    #[test]
    fn canonical_query_is_sorted() {
        assert_eq!(canonicalize_query("b=2&a=1"), "a=1&b=2");
    }
}
