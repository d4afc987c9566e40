use reqwest::Client;
use secrecy::{ExposeSecret, Secret};
use url::Url;

#[derive(thiserror::Error, Debug)]
pub enum BlobStoreError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Blob store error: {status} - {message}")]
    ApiError { status: u16, message: String },

    #[error("Object not found: {0}")]
    NotFound(String),
}

/// Typed client for the opaque blob service: put bytes, get bytes, build
/// public URLs. Keys are namespaced `bucket/key` the way the upstream
/// storage API shapes them.
#[derive(Clone)]
pub struct BlobStore {
    client: Client,
    base_url: String,
    access_token: Secret<String>,
}

impl BlobStore {
    pub fn new(base_url: &str, access_token: Secret<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            access_token,
        }
    }

    /// Uploads an object and returns its public URL. Existing objects are
    /// overwritten (same registration/ticket path means same content).
    #[tracing::instrument(skip(self, bytes), fields(bucket = %bucket, key = %key))]
    pub async fn put(
        &self,
        bucket: &str,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<String, BlobStoreError> {
        let url = format!("{}/storage/v1/object/{}/{}", self.base_url, bucket, key);

        let response = self
            .client
            .post(&url)
            .bearer_auth(self.access_token.expose_secret())
            .header("Content-Type", content_type)
            .header("x-upsert", "true")
            .header("Cache-Control", "max-age=31536000")
            .body(bytes)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(BlobStoreError::ApiError { status, message });
        }

        Ok(self.public_url(bucket, key))
    }

    #[tracing::instrument(skip(self), fields(bucket = %bucket, key = %key))]
    pub async fn download(&self, bucket: &str, key: &str) -> Result<Vec<u8>, BlobStoreError> {
        let url = format!("{}/storage/v1/object/{}/{}", self.base_url, bucket, key);

        let response = self
            .client
            .get(&url)
            .bearer_auth(self.access_token.expose_secret())
            .send()
            .await?;

        if response.status().as_u16() == 404 {
            return Err(BlobStoreError::NotFound(format!("{bucket}/{key}")));
        }
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(BlobStoreError::ApiError { status, message });
        }

        Ok(response.bytes().await?.to_vec())
    }

    pub fn public_url(&self, bucket: &str, key: &str) -> String {
        format!("{}/storage/v1/object/public/{}/{}", self.base_url, bucket, key)
    }
}

/// Canonicalizes a proof reference into `bucket/key`. Accepts a raw
/// `bucket/key`, or a public/signed/authenticated object URL; strips
/// host and API prefix, drops the query string, percent-decodes.
pub fn to_storage_key(url_or_key: &str) -> String {
    let trimmed = url_or_key.trim();

    let path = match Url::parse(trimmed) {
        Ok(parsed) if parsed.scheme().starts_with("http") => {
            let p = parsed.path().to_string();
            ["/storage/v1/object/public/", "/storage/v1/object/sign/", "/storage/v1/object/authenticated/"]
                .iter()
                .find_map(|prefix| p.strip_prefix(prefix))
                .unwrap_or(p.trim_start_matches('/'))
                .to_string()
        }
        _ => trimmed.split('?').next().unwrap_or("").to_string(),
    };

    let decoded = urlencoding::decode(&path)
        .map(|d| d.into_owned())
        .unwrap_or(path);

    decoded.trim_start_matches('/').to_string()
}

/// Splits a canonical storage key into bucket and object key.
pub fn split_bucket_key(storage_key: &str) -> Option<(&str, &str)> {
    let (bucket, key) = storage_key.split_once('/')?;
    if bucket.is_empty() || key.is_empty() {
        return None;
    }
    Some((bucket, key))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_key_passthrough() {
        assert_eq!(to_storage_key("payment-proofs/abc/def.jpg"), "payment-proofs/abc/def.jpg");
        assert_eq!(to_storage_key("/payment-proofs/x.png"), "payment-proofs/x.png");
    }

    #[test]
    fn public_url_stripped_and_decoded() {
        let url = "https://example.supabase.co/storage/v1/object/public/payment-proofs/reg%2F1%20a.jpg?token=x";
        assert_eq!(to_storage_key(url), "payment-proofs/reg/1 a.jpg");
    }

    #[test]
    fn signed_url_stripped() {
        let url = "https://host/storage/v1/object/sign/proofs/k.png?token=abc";
        assert_eq!(to_storage_key(url), "proofs/k.png");
    }

    #[test]
    fn split_bucket_and_key() {
        assert_eq!(
            split_bucket_key("payment-proofs/a/b.jpg"),
            Some(("payment-proofs", "a/b.jpg"))
        );
        assert_eq!(split_bucket_key("nokey"), None);
        assert_eq!(split_bucket_key("bucket/"), None);
    }
}
