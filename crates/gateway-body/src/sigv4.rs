//! AWS Signature Version 4.
//!
//! Used for Bedrock-style provider calls made from an in-memory buffer and for
//! archive uploads to S3-compatible object storage.

use chrono::{DateTime, Utc};
use gateway_core::{GatewayError, GatewayResult};
use http::HeaderMap;
use secrecy::{ExposeSecret, SecretString};
use std::collections::BTreeMap;
use url::Url;

/// Service name used for Bedrock runtime calls
pub const BEDROCK_SERVICE: &str = "bedrock";

/// Service name used for object storage
pub const S3_SERVICE: &str = "s3";

/// Payload hash placeholder for streamed bodies
pub const UNSIGNED_PAYLOAD: &str = "UNSIGNED-PAYLOAD";

const ALGORITHM: &str = "AWS4-HMAC-SHA256";

/// Inbound header carrying the access key id
pub const ACCESS_KEY_HEADER: &str = "aws-access-key";
/// Inbound header carrying the secret access key
pub const SECRET_KEY_HEADER: &str = "aws-secret-key";
/// Inbound header carrying an optional session token
pub const SESSION_TOKEN_HEADER: &str = "aws-session-token";

/// Inbound `x-amz*` headers copied into a signed provider request.
/// Every other inbound header is dropped.
pub const FORWARDED_AMZ_HEADERS: &[&str] = &[
    "x-amzn-bedrock-accept",
    "x-amzn-bedrock-trace",
    "x-amzn-bedrock-guardrailidentifier",
    "x-amzn-bedrock-guardrailversion",
    "x-amz-target",
];

/// AWS credentials
#[derive(Debug, Clone)]
pub struct AwsCredentials {
    access_key_id: String,
    secret_access_key: SecretString,
    session_token: Option<SecretString>,
}

impl AwsCredentials {
    /// Create credentials from a key pair
    pub fn new(access_key_id: impl Into<String>, secret_access_key: impl Into<String>) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_access_key: SecretString::new(secret_access_key.into()),
            session_token: None,
        }
    }

    /// Attach a session token
    #[must_use]
    pub fn with_session_token(mut self, token: impl Into<String>) -> Self {
        self.session_token = Some(SecretString::new(token.into()));
        self
    }

    /// Read credentials from the inbound `aws-*` headers
    ///
    /// # Errors
    /// Returns an authentication error if the key pair is missing
    pub fn from_headers(headers: &HeaderMap) -> GatewayResult<Self> {
        let access_key = header_str(headers, ACCESS_KEY_HEADER)
            .ok_or_else(|| GatewayError::authentication("AWS access key not provided"))?;
        let secret_key = header_str(headers, SECRET_KEY_HEADER)
            .ok_or_else(|| GatewayError::authentication("AWS secret key not provided"))?;

        let credentials = Self::new(access_key, secret_key);
        Ok(match header_str(headers, SESSION_TOKEN_HEADER) {
            Some(token) => credentials.with_session_token(token),
            None => credentials,
        })
    }

    /// Access key id
    #[must_use]
    pub fn access_key_id(&self) -> &str {
        &self.access_key_id
    }
}

/// How the request payload is represented in the canonical request
#[derive(Debug, Clone, Copy)]
pub enum PayloadHash<'a> {
    /// Hash these exact bytes
    Bytes(&'a [u8]),
    /// Body is streamed; sign `UNSIGNED-PAYLOAD`
    Unsigned,
}

impl PayloadHash<'_> {
    fn value(self) -> String {
        match self {
            Self::Bytes(body) => hex::encode(sha256_hash(body)),
            Self::Unsigned => UNSIGNED_PAYLOAD.to_string(),
        }
    }
}

/// One request to sign
#[derive(Debug, Clone)]
pub struct SigningRequest<'a> {
    /// HTTP method
    pub method: &'a str,
    /// Full request URL
    pub url: &'a Url,
    /// Signing region
    pub region: &'a str,
    /// Signing service
    pub service: &'a str,
    /// Payload representation
    pub payload: PayloadHash<'a>,
    /// Emit and sign `x-amz-content-sha256`
    pub content_sha256_header: bool,
}

impl<'a> SigningRequest<'a> {
    /// Create a request that emits `x-amz-content-sha256`
    #[must_use]
    pub fn new(
        method: &'a str,
        url: &'a Url,
        region: &'a str,
        service: &'a str,
        payload: PayloadHash<'a>,
    ) -> Self {
        Self {
            method,
            url,
            region,
            service,
            payload,
            content_sha256_header: true,
        }
    }
}

/// Sign a request at the current time.
///
/// `headers` holds lower-case header names to sign. `host` is derived from the
/// URL when absent. Signer headers (`x-amz-date`, `x-amz-content-sha256`,
/// `x-amz-security-token`, `authorization`) are inserted into `headers`.
///
/// # Errors
/// Returns error if the URL has no host
pub fn sign(
    credentials: &AwsCredentials,
    request: &SigningRequest<'_>,
    headers: &mut BTreeMap<String, String>,
) -> GatewayResult<()> {
    sign_at(credentials, request, headers, Utc::now())
}

/// Sign a request at a fixed instant
///
/// # Errors
/// Returns error if the URL has no host
pub fn sign_at(
    credentials: &AwsCredentials,
    request: &SigningRequest<'_>,
    headers: &mut BTreeMap<String, String>,
    timestamp: DateTime<Utc>,
) -> GatewayResult<()> {
    let amz_date = timestamp.format("%Y%m%dT%H%M%SZ").to_string();
    let date_stamp = timestamp.format("%Y%m%d").to_string();

    if !headers.contains_key("host") {
        headers.insert("host".to_string(), host_header(request.url)?);
    }

    let payload_hash = request.payload.value();

    headers.insert("x-amz-date".to_string(), amz_date.clone());
    if request.content_sha256_header {
        headers.insert("x-amz-content-sha256".to_string(), payload_hash.clone());
    }
    if let Some(token) = &credentials.session_token {
        headers.insert(
            "x-amz-security-token".to_string(),
            token.expose_secret().clone(),
        );
    }
    headers.remove("authorization");

    // BTreeMap iterates in sorted order
    let signed_headers_str = headers.keys().map(String::as_str).collect::<Vec<_>>().join(";");

    let mut canonical_headers = String::new();
    for (name, value) in headers.iter() {
        canonical_headers.push_str(name);
        canonical_headers.push(':');
        canonical_headers.push_str(&value.split_whitespace().collect::<Vec<_>>().join(" "));
        canonical_headers.push('\n');
    }

    let canonical_request = format!(
        "{}\n{}\n{}\n{}\n{}\n{}",
        request.method,
        canonical_uri(request.url, request.service),
        canonical_query(request.url),
        canonical_headers,
        signed_headers_str,
        payload_hash
    );

    let credential_scope = format!(
        "{}/{}/{}/aws4_request",
        date_stamp, request.region, request.service
    );
    let string_to_sign = format!(
        "{}\n{}\n{}\n{}",
        ALGORITHM,
        amz_date,
        credential_scope,
        hex::encode(sha256_hash(canonical_request.as_bytes()))
    );

    let secret = format!("AWS4{}", credentials.secret_access_key.expose_secret());
    let k_date = hmac_sha256(secret.as_bytes(), date_stamp.as_bytes())?;
    let k_region = hmac_sha256(&k_date, request.region.as_bytes())?;
    let k_service = hmac_sha256(&k_region, request.service.as_bytes())?;
    let k_signing = hmac_sha256(&k_service, b"aws4_request")?;
    let signature = hex::encode(hmac_sha256(&k_signing, string_to_sign.as_bytes())?);

    let authorization = format!(
        "{} Credential={}/{}, SignedHeaders={}, Signature={}",
        ALGORITHM, credentials.access_key_id, credential_scope, signed_headers_str, signature
    );
    headers.insert("authorization".to_string(), authorization);

    Ok(())
}

/// `host` header value for a URL (port included only when non-default)
///
/// # Errors
/// Returns a validation error if the URL has no host
pub fn host_header(url: &Url) -> GatewayResult<String> {
    let host = url
        .host_str()
        .ok_or_else(|| GatewayError::validation("URL has no host", Some("url".to_string()), "invalid_url"))?;
    Ok(match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    })
}

/// Canonical URI.
///
/// S3 signs the path as sent. Every other service URI-encodes each
/// already-encoded segment a second time.
fn canonical_uri(url: &Url, service: &str) -> String {
    let path = url.path();
    if path.is_empty() {
        return "/".to_string();
    }
    if service == S3_SERVICE {
        return path.to_string();
    }
    path.split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

fn canonical_query(url: &Url) -> String {
    let mut pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| {
            (
                urlencoding::encode(&k).into_owned(),
                urlencoding::encode(&v).into_owned(),
            )
        })
        .collect();
    pairs.sort();
    pairs
        .into_iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&")
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// Calculate SHA-256 hash
fn sha256_hash(data: &[u8]) -> [u8; 32] {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Calculate HMAC-SHA256
fn hmac_sha256(key: &[u8], data: &[u8]) -> GatewayResult<[u8; 32]> {
    use hmac::{Hmac, Mac};
    use sha2::Sha256;

    type HmacSha256 = Hmac<Sha256>;
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| GatewayError::internal(format!("HMAC key error: {e}")))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().into())
}
