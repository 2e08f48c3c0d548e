//! S3-compatible object-store backend.
//!
//! Talks to the S3 REST API directly with AWS Signature V4 (`hmac` +
//! `sha2`), so no vendor SDK is needed and MinIO/LocalStack work through
//! `endpoint_url`.
//!
//! # Keys
//!
//! ```text
//! {prefix}/{environment}/latest/{slug}/{slug}_news_data.csv
//! {prefix}/{environment}/history/{slug}/{slug}_news_{stamp}.csv
//! {prefix}/{environment}/quarantine/{slug}/{slug}_news_data_{stamp}.csv
//! ```
//!
//! # Credentials
//!
//! `AWS_ACCESS_KEY_ID` and `AWS_SECRET_ACCESS_KEY` are required,
//! `AWS_SESSION_TOKEN` is optional. Missing credentials do not prevent
//! construction; every operation then fails with `Unauthenticated`, which
//! the coordinator never retries.
//!
//! # Status mapping
//!
//! | HTTP | Error |
//! |------|-------|
//! | 401, 403 | `Unauthenticated` |
//! | 404 | `NotFound` |
//! | 408, 429, 5xx, transport errors | `TransientIo` |
//! | anything else | `Backend` |

use crate::config::S3Config;
use crate::credentials::CredentialProvider;
use crate::errors::StorageError;
use crate::models::{Dataset, Source};
use crate::storage::{
    codec, dataset_file_name, StorageBackend, StorageLocator, StoredFile, Version,
};
use crate::utils::truncate_for_log;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::Method;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

type HmacSha256 = Hmac<Sha256>;

/// AWS credentials resolved through a [`CredentialProvider`].
#[derive(Clone)]
struct AwsCredentials {
    access_key_id: String,
    secret_access_key: String,
    session_token: Option<String>,
}

impl AwsCredentials {
    fn from_provider(provider: &dyn CredentialProvider) -> Result<Self, String> {
        let access_key_id = provider
            .non_empty("AWS_ACCESS_KEY_ID")
            .ok_or("AWS_ACCESS_KEY_ID is not set")?;
        let secret_access_key = provider
            .non_empty("AWS_SECRET_ACCESS_KEY")
            .ok_or("AWS_SECRET_ACCESS_KEY is not set")?;
        Ok(Self {
            access_key_id,
            secret_access_key,
            session_token: provider.non_empty("AWS_SESSION_TOKEN"),
        })
    }
}

pub struct S3Backend {
    config: S3Config,
    credentials: Result<AwsCredentials, String>,
    client: reqwest::Client,
}

impl std::fmt::Debug for S3Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Backend")
            .field("bucket", &self.config.bucket)
            .field("region", &self.config.region)
            .field("prefix", &self.config.prefix)
            .field("authenticated", &self.credentials.is_ok())
            .finish()
    }
}

/// Where requests go: scheme, `Host` header value and the path prefix
/// (`/bucket` for path-style endpoints, empty for virtual-hosted AWS).
struct Endpoint {
    scheme: &'static str,
    host: String,
    path_prefix: String,
}

impl S3Backend {
    /// Build a backend for `config`, resolving keys through `provider`.
    ///
    /// # Errors
    ///
    /// Only if the HTTP client cannot be built. Missing keys are not an
    /// error here; every call on the backend then reports
    /// [`StorageError::Unauthenticated`].
    pub fn new(config: S3Config, provider: &dyn CredentialProvider) -> Result<Self, StorageError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| StorageError::Backend(format!("failed to build HTTP client: {e}")))?;
        let credentials = AwsCredentials::from_provider(provider);
        if let Err(reason) = &credentials {
            warn!(%reason, bucket = %config.bucket, "S3 credentials unavailable; operations will fail");
        }
        Ok(Self {
            config,
            credentials,
            client,
        })
    }

    fn credentials(&self) -> Result<&AwsCredentials, StorageError> {
        self.credentials
            .as_ref()
            .map_err(|reason| StorageError::Unauthenticated(reason.clone()))
    }

    fn root(&self) -> String {
        format!(
            "{}/{}",
            self.config.prefix.trim_matches('/'),
            self.config.environment.trim_matches('/')
        )
    }

    fn key_for(&self, source: Source, version: &Version) -> String {
        let area = match version {
            Version::Latest => "latest",
            Version::Snapshot(_) => "history",
        };
        format!(
            "{}/{}/{}/{}",
            self.root(),
            area,
            source.slug(),
            dataset_file_name(source, version)
        )
    }

    fn quarantine_key(&self, source: Source, stamp: &str) -> String {
        format!(
            "{}/quarantine/{}/{}_news_data_{}.csv",
            self.root(),
            source.slug(),
            source.slug(),
            stamp
        )
    }

    fn endpoint(&self) -> Endpoint {
        match &self.config.endpoint_url {
            Some(url) => {
                let scheme = if url.starts_with("http://") { "http" } else { "https" };
                let host = url
                    .trim_start_matches("https://")
                    .trim_start_matches("http://")
                    .trim_end_matches('/')
                    .to_string();
                Endpoint {
                    scheme,
                    host,
                    path_prefix: format!("/{}", self.config.bucket),
                }
            }
            None => Endpoint {
                scheme: "https",
                host: format!("{}.s3.{}.amazonaws.com", self.config.bucket, self.config.region),
                path_prefix: String::new(),
            },
        }
    }

    /// Sign and send one request. `key` is `None` for bucket-level calls.
    async fn send(
        &self,
        method: Method,
        key: Option<&str>,
        query: &[(String, String)],
        body: Vec<u8>,
        extra_headers: &[(&str, &str)],
    ) -> Result<reqwest::Response, StorageError> {
        let creds = self.credentials()?;
        let endpoint = self.endpoint();

        let encoded_key = key
            .map(|k| k.split('/').map(|s| urlencoding::encode(s).into_owned()).collect::<Vec<_>>().join("/"))
            .unwrap_or_default();
        let canonical_uri = format!("{}/{}", endpoint.path_prefix, encoded_key);

        let mut sorted_query = query.to_vec();
        sorted_query.sort();
        let canonical_query = sorted_query
            .iter()
            .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&");

        let now = Utc::now();
        let payload_hash = hex_sha256(&body);
        let mut headers: Vec<(String, String)> = vec![
            ("host".to_string(), endpoint.host.clone()),
            ("x-amz-content-sha256".to_string(), payload_hash.clone()),
            ("x-amz-date".to_string(), now.format("%Y%m%dT%H%M%SZ").to_string()),
        ];
        if let Some(token) = &creds.session_token {
            headers.push(("x-amz-security-token".to_string(), token.clone()));
        }
        for (name, value) in extra_headers {
            headers.push((name.to_ascii_lowercase(), value.to_string()));
        }

        let authorization = sign_v4(
            creds,
            &self.config.region,
            now,
            method.as_str(),
            &canonical_uri,
            &canonical_query,
            &mut headers,
            &payload_hash,
        );

        let mut url = format!("{}://{}{}", endpoint.scheme, endpoint.host, canonical_uri);
        if !canonical_query.is_empty() {
            url.push('?');
            url.push_str(&canonical_query);
        }

        let mut request = self
            .client
            .request(method, &url)
            .header("Authorization", authorization);
        for (name, value) in headers.iter().filter(|(n, _)| n != "host") {
            request = request.header(name.as_str(), value.as_str());
        }
        if !body.is_empty() {
            request = request.body(body);
        }

        request.send().await.map_err(|e| {
            if e.is_builder() {
                StorageError::Backend(format!("invalid S3 request to {url}: {e}"))
            } else {
                StorageError::TransientIo(format!("S3 request to {url} failed: {e}"))
            }
        })
    }

    async fn get_bytes(&self, key: &str, locator: &StorageLocator) -> Result<Vec<u8>, StorageError> {
        let resp = self.send(Method::GET, Some(key), &[], Vec::new(), &[]).await?;
        let status = resp.status().as_u16();
        if status != 200 {
            let body = resp.text().await.unwrap_or_default();
            return Err(classify_status(status, &body, locator));
        }
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| StorageError::TransientIo(format!("reading s3 body for {key}: {e}")))?;
        Ok(bytes.to_vec())
    }

    async fn put_bytes(
        &self,
        key: &str,
        bytes: Vec<u8>,
        locator: &StorageLocator,
    ) -> Result<(), StorageError> {
        let resp = self
            .send(
                Method::PUT,
                Some(key),
                &[],
                bytes,
                &[
                    ("Content-Type", "text/csv"),
                    ("x-amz-server-side-encryption", "AES256"),
                ],
            )
            .await?;
        let status = resp.status().as_u16();
        if !(200..300).contains(&status) {
            let body = resp.text().await.unwrap_or_default();
            return Err(classify_status(status, &body, locator));
        }
        Ok(())
    }
}

#[async_trait]
impl StorageBackend for S3Backend {
    fn identity(&self) -> String {
        format!("s3://{}/{}", self.config.bucket, self.root())
    }

    fn locator(&self, source: Source, version: Version) -> StorageLocator {
        let key = self.key_for(source, &version);
        StorageLocator::new(source, version, format!("s3://{}/{}", self.config.bucket, key))
    }

    #[instrument(level = "info", skip_all, fields(%source))]
    async fn read(&self, source: Source) -> Result<Dataset, StorageError> {
        let locator = self.locator(source, Version::Latest);
        let key = self.key_for(source, &Version::Latest);
        let bytes = self.get_bytes(&key, &locator).await?;
        let dataset = codec::decode(&bytes, &locator)?;
        info!(records = dataset.len(), %locator, "Downloaded dataset from S3");
        Ok(dataset)
    }

    #[instrument(level = "info", skip_all, fields(%source, records = dataset.len()))]
    async fn write(&self, source: Source, dataset: &Dataset) -> Result<(), StorageError> {
        let locator = self.locator(source, Version::Latest);
        let key = self.key_for(source, &Version::Latest);
        let bytes = codec::encode(dataset)?;
        let size = bytes.len();
        self.put_bytes(&key, bytes, &locator).await?;
        info!(%locator, bytes = size, "Uploaded dataset to S3");
        Ok(())
    }

    async fn write_snapshot(
        &self,
        source: Source,
        dataset: &Dataset,
        stamp: &str,
    ) -> Result<(), StorageError> {
        let version = Version::Snapshot(stamp.to_string());
        let key = self.key_for(source, &version);
        let locator = self.locator(source, version);
        self.put_bytes(&key, codec::encode(dataset)?, &locator).await?;
        debug!(%locator, "Uploaded snapshot to S3");
        Ok(())
    }

    async fn quarantine(&self, source: Source, stamp: &str) -> Result<(), StorageError> {
        let locator = self.locator(source, Version::Latest);
        let key = self.key_for(source, &Version::Latest);
        let bytes = self.get_bytes(&key, &locator).await?;
        let target = self.quarantine_key(source, stamp);
        self.put_bytes(&target, bytes, &locator).await?;
        error!(from = %key, to = %target, "Preserved corrupt dataset in S3");
        Ok(())
    }

    async fn stored_files(&self) -> Result<Vec<StoredFile>, StorageError> {
        let prefix = format!("{}/", self.root());
        let locator = StorageLocator::new(Source::MoneyControl, Version::Latest, self.identity());
        let mut files = Vec::new();
        let mut continuation: Option<String> = None;

        loop {
            let mut query = vec![
                ("list-type".to_string(), "2".to_string()),
                ("max-keys".to_string(), "1000".to_string()),
                ("prefix".to_string(), prefix.clone()),
            ];
            if let Some(token) = &continuation {
                query.push(("continuation-token".to_string(), token.clone()));
            }
            let resp = self.send(Method::GET, None, &query, Vec::new(), &[]).await?;
            let status = resp.status().as_u16();
            let body = resp
                .text()
                .await
                .map_err(|e| StorageError::TransientIo(format!("reading list response: {e}")))?;
            if status != 200 {
                return Err(classify_status(status, &body, &locator));
            }
            let page = parse_list_objects(&body)?;
            files.extend(
                page.contents
                    .into_iter()
                    .filter(|o| o.key.ends_with(".csv"))
                    .map(|o| StoredFile {
                        name: o.key,
                        bytes: o.size,
                        modified: o.last_modified,
                    }),
            );
            match (page.is_truncated, page.next_continuation_token) {
                (true, Some(token)) => continuation = Some(token),
                _ => break,
            }
        }
        Ok(files)
    }

    /// One ListObjectsV2 request for at most one key under the prefix.
    /// Missing keys fail before anything is sent.
    async fn test_connection(&self) -> Result<(), StorageError> {
        let locator = StorageLocator::new(Source::MoneyControl, Version::Latest, self.identity());
        let query = [
            ("list-type".to_string(), "2".to_string()),
            ("max-keys".to_string(), "1".to_string()),
            ("prefix".to_string(), format!("{}/", self.root())),
        ];
        let resp = self.send(Method::GET, None, &query, Vec::new(), &[]).await?;
        let status = resp.status().as_u16();
        if status != 200 {
            let body = resp.text().await.unwrap_or_default();
            return Err(classify_status(status, &body, &locator));
        }
        info!(bucket = %self.config.bucket, "S3 bucket reachable");
        Ok(())
    }
}

// ============ ListObjectsV2 / error XML ============

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListBucketResult {
    #[serde(default)]
    contents: Vec<ListedObject>,
    #[serde(default)]
    is_truncated: bool,
    next_continuation_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListedObject {
    key: String,
    #[serde(default)]
    size: u64,
    last_modified: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct S3ErrorBody {
    code: String,
    #[serde(default)]
    message: String,
}

fn parse_list_objects(xml: &str) -> Result<ListBucketResult, StorageError> {
    quick_xml::de::from_str(xml).map_err(|e| {
        StorageError::Backend(format!(
            "unparsable ListObjectsV2 response ({e}): {}",
            truncate_for_log(xml, 300)
        ))
    })
}

/// Map a non-success status (plus the S3 error document, if any) onto the
/// storage taxonomy.
fn classify_status(status: u16, body: &str, locator: &StorageLocator) -> StorageError {
    let detail = quick_xml::de::from_str::<S3ErrorBody>(body)
        .map(|e| format!("{}: {}", e.code, e.message))
        .unwrap_or_else(|_| truncate_for_log(body, 200));
    match status {
        401 | 403 => StorageError::Unauthenticated(format!("HTTP {status} for {locator}: {detail}")),
        404 => StorageError::NotFound(locator.clone()),
        408 | 429 | 500..=599 => {
            StorageError::TransientIo(format!("HTTP {status} for {locator}: {detail}"))
        }
        _ => StorageError::Backend(format!("HTTP {status} for {locator}: {detail}")),
    }
}

// ============ AWS SigV4 ============

/// Build the `Authorization` header value. Sorts `headers` in place, which
/// is the order they must be sent in.
#[allow(clippy::too_many_arguments)]
fn sign_v4(
    creds: &AwsCredentials,
    region: &str,
    now: DateTime<Utc>,
    method: &str,
    canonical_uri: &str,
    canonical_query: &str,
    headers: &mut [(String, String)],
    payload_hash: &str,
) -> String {
    let date_stamp = now.format("%Y%m%d").to_string();
    let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();

    headers.sort_by(|a, b| a.0.cmp(&b.0));
    let signed_headers = headers
        .iter()
        .map(|(k, _)| k.as_str())
        .collect::<Vec<_>>()
        .join(";");
    let canonical_headers: String = headers
        .iter()
        .map(|(k, v)| format!("{}:{}\n", k, v.trim()))
        .collect();

    let canonical_request = format!(
        "{method}\n{canonical_uri}\n{canonical_query}\n{canonical_headers}\n{signed_headers}\n{payload_hash}"
    );
    let credential_scope = format!("{date_stamp}/{region}/s3/aws4_request");
    let string_to_sign = format!(
        "AWS4-HMAC-SHA256\n{amz_date}\n{credential_scope}\n{}",
        hex_sha256(canonical_request.as_bytes())
    );
    let signing_key = derive_signing_key(&creds.secret_access_key, &date_stamp, region, "s3");
    let signature = hex::encode(hmac_sha256(&signing_key, string_to_sign.as_bytes()));

    format!(
        "AWS4-HMAC-SHA256 Credential={}/{credential_scope}, SignedHeaders={signed_headers}, Signature={signature}",
        creds.access_key_id
    )
}

fn hex_sha256(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    // HMAC accepts keys of any length, so this cannot fail
    let mut mac = match HmacSha256::new_from_slice(key) {
        Ok(mac) => mac,
        Err(_) => unreachable!("HMAC-SHA256 accepts any key length"),
    };
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

/// ```text
/// kDate    = HMAC("AWS4" + secret, dateStamp)
/// kRegion  = HMAC(kDate, region)
/// kService = HMAC(kRegion, service)
/// kSigning = HMAC(kService, "aws4_request")
/// ```
fn derive_signing_key(secret_key: &str, date_stamp: &str, region: &str, service: &str) -> Vec<u8> {
    let k_date = hmac_sha256(format!("AWS4{secret_key}").as_bytes(), date_stamp.as_bytes());
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, service.as_bytes());
    hmac_sha256(&k_service, b"aws4_request")
}
