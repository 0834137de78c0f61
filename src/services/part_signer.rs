//! HMAC-SHA256 signing of direct part-upload URLs.
//!
//! A signed URL names one part of one upload session and carries its own
//! expiry, so the holder can PUT exactly that part without credentials:
//!
//! ```text
//! {public_url}/uploads/{bucket}/{key}?uploadId=..&partNumber=..&expires=..&signature=..
//! ```

use crate::services::backend::{BackendError, BackendResult};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use std::time::Duration;

type HmacSha256 = Hmac<Sha256>;

/// Query string of a signed part upload.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedPartQuery {
    pub upload_id: String,
    pub part_number: u32,
    /// Unix timestamp (seconds) after which the URL is rejected.
    pub expires: i64,
    pub signature: String,
}

#[derive(Clone)]
pub struct PartSigner {
    secret: Vec<u8>,
    public_url: String,
}

impl std::fmt::Debug for PartSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PartSigner")
            .field("public_url", &self.public_url)
            .finish_non_exhaustive()
    }
}

impl PartSigner {
    pub fn new(secret: impl Into<Vec<u8>>, public_url: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            public_url: public_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn mac(&self) -> BackendResult<HmacSha256> {
        HmacSha256::new_from_slice(&self.secret)
            .map_err(|err| BackendError::InvalidArgument(format!("signing key: {err}")))
    }

    fn string_to_sign(
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: u32,
        expires: i64,
    ) -> String {
        format!("PUT\n{bucket}\n{key}\n{upload_id}\n{part_number}\n{expires}")
    }

    fn signature(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: u32,
        expires: i64,
    ) -> BackendResult<String> {
        let mut mac = self.mac()?;
        mac.update(Self::string_to_sign(bucket, key, upload_id, part_number, expires).as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    /// Build a URL valid for `ttl` starting at `now`.
    pub fn sign(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: u32,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> BackendResult<String> {
        let expires = now.timestamp() + ttl.as_secs() as i64;
        let signature = self.signature(bucket, key, upload_id, part_number, expires)?;
        let encoded_key = key
            .split('/')
            .map(|segment| urlencoding::encode(segment).into_owned())
            .collect::<Vec<_>>()
            .join("/");

        Ok(format!(
            "{}/uploads/{}/{}?uploadId={}&partNumber={}&expires={}&signature={}",
            self.public_url,
            urlencoding::encode(bucket),
            encoded_key,
            urlencoding::encode(upload_id),
            part_number,
            expires,
            signature
        ))
    }

    /// Check a presented signature in constant time, then its expiry.
    pub fn verify(
        &self,
        bucket: &str,
        key: &str,
        query: &SignedPartQuery,
        now: DateTime<Utc>,
    ) -> BackendResult<()> {
        let presented =
            hex::decode(&query.signature).map_err(|_| BackendError::SignatureDoesNotMatch)?;

        let mut mac = self.mac()?;
        mac.update(
            Self::string_to_sign(
                bucket,
                key,
                &query.upload_id,
                query.part_number,
                query.expires,
            )
            .as_bytes(),
        );
        mac.verify_slice(&presented)
            .map_err(|_| BackendError::SignatureDoesNotMatch)?;

        if now.timestamp() > query.expires {
            return Err(BackendError::RequestExpired);
        }
        Ok(())
    }
}

/// Pull the query string of a signed URL back apart.
#[cfg(test)]
pub(crate) fn parse_signed_url(url: &str) -> (String, SignedPartQuery) {
    let (path, query) = url.split_once('?').unwrap();
    let mut upload_id = String::new();
    let mut part_number = 0;
    let mut expires = 0;
    let mut signature = String::new();
    for pair in query.split('&') {
        let (name, value) = pair.split_once('=').unwrap();
        let value = urlencoding::decode(value).unwrap().into_owned();
        match name {
            "uploadId" => upload_id = value,
            "partNumber" => part_number = value.parse().unwrap(),
            "expires" => expires = value.parse().unwrap(),
            "signature" => signature = value,
            _ => {}
        }
    }
    (
        path.to_string(),
        SignedPartQuery {
            upload_id,
            part_number,
            expires,
            signature,
        },
    )
}
