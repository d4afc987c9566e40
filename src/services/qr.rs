use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{Duration, Utc};
use qrcode::QrCode;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::services::blob_store::{BlobStore, BlobStoreError};
use crate::services::signature;

/// Scheme marker for QR contents: `TKT|<ticket_no>[|<token>]`.
pub const QR_SCHEME: &str = "TKT";

/// Signed tokens stay valid long enough to cover late door sales and
/// re-sent emails.
const TOKEN_VALIDITY_DAYS: i64 = 365;

#[derive(thiserror::Error, Debug)]
pub enum QrGenerationError {
    #[error("QR code generation failed: {0}")]
    QrCodeError(#[from] qrcode::types::QrError),

    #[error("JSON serialization failed: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("PNG encoding failed: {0}")]
    PngEncodeError(String),

    #[error("QR upload failed: {0}")]
    UploadError(#[from] BlobStoreError),
}

/// Claims carried inside a signed ticket token; enough to verify a ticket
/// offline without a database round trip.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TicketTokenClaims {
    pub v: u8,
    pub reg: Uuid,
    pub t: String,
    pub exp: i64,
}

/// Signs and verifies compact ticket tokens:
/// `base64url(JSON claims) . hex(HMAC-SHA256)`.
#[derive(Clone)]
pub struct TicketTokenSigner {
    key: Vec<u8>,
}

impl TicketTokenSigner {
    pub fn new(key: &[u8]) -> Self {
        Self { key: key.to_vec() }
    }

    pub fn sign(&self, registration_id: Uuid, ticket_no: &str) -> Result<String, serde_json::Error> {
        let claims = TicketTokenClaims {
            v: 1,
            reg: registration_id,
            t: ticket_no.to_string(),
            exp: (Utc::now() + Duration::days(TOKEN_VALIDITY_DAYS)).timestamp(),
        };
        let payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&claims)?);
        let sig = signature::sign(&payload, &self.key);
        Ok(format!("{payload}.{sig}"))
    }

    /// Verifies signature and expiry; returns the claims on success, None
    /// on any failure (callers fall back to treating the input as a plain
    /// ticket number).
    pub fn verify(&self, token: &str) -> Option<TicketTokenClaims> {
        let (payload, sig) = token.split_once('.')?;
        if !signature::verify(payload, sig, &self.key) {
            return None;
        }
        let bytes = URL_SAFE_NO_PAD.decode(payload).ok()?;
        let claims: TicketTokenClaims = serde_json::from_slice(&bytes).ok()?;
        if claims.exp < Utc::now().timestamp() {
            return None;
        }
        Some(claims)
    }
}

/// Builds the exact string encoded into the QR image. Kept compact so the
/// code stays scannable on a phone screen.
pub fn qr_content(ticket_no: &str, token: Option<&str>) -> String {
    match token {
        Some(t) => format!("{QR_SCHEME}|{ticket_no}|{t}"),
        None => format!("{QR_SCHEME}|{ticket_no}"),
    }
}

/// Renders QR data to a PNG raster.
pub fn render_qr_png(data: &str) -> Result<Vec<u8>, QrGenerationError> {
    use image::{ImageBuffer, Luma};

    let code = QrCode::new(data.as_bytes())?;

    let module_size = 10u32;
    let width = code.width() as u32;
    let img_size = width * module_size;

    let mut img = ImageBuffer::<Luma<u8>, Vec<u8>>::new(img_size, img_size);

    for (x, y, pixel) in img.enumerate_pixels_mut() {
        let module_x = x / module_size;
        let module_y = y / module_size;
        *pixel = match code[(module_x as usize, module_y as usize)] {
            qrcode::types::Color::Dark => Luma([0u8]),
            qrcode::types::Color::Light => Luma([255u8]),
        };
    }

    let mut png_data = Vec::new();
    image::DynamicImage::ImageLuma8(img)
        .write_to(
            &mut std::io::Cursor::new(&mut png_data),
            image::ImageFormat::Png,
        )
        .map_err(|e| QrGenerationError::PngEncodeError(e.to_string()))?;

    Ok(png_data)
}

#[derive(Debug, Clone)]
pub struct IssuedCredential {
    pub qr_url: String,
    pub token: Option<String>,
}

/// Builds the (optionally signed) ticket credential, renders its QR image
/// and stores it in blob storage at `<registration>/<ticket_no>.png`.
/// An upload failure aborts this ticket; the caller must not persist a
/// ticket row without a stored QR.
#[tracing::instrument(skip(blob, signer), fields(registration_id = %registration_id, ticket_no = %ticket_no))]
pub async fn issue_credential(
    blob: &BlobStore,
    qr_bucket: &str,
    signer: Option<&TicketTokenSigner>,
    registration_id: Uuid,
    ticket_no: &str,
) -> Result<IssuedCredential, QrGenerationError> {
    let token = signer
        .map(|s| s.sign(registration_id, ticket_no))
        .transpose()?;

    let data = qr_content(ticket_no, token.as_deref());
    let png = render_qr_png(&data)?;

    let key = format!("{registration_id}/{ticket_no}.png");
    let qr_url = blob.put(qr_bucket, &key, png, "image/png").await?;

    tracing::debug!(qr_url = %qr_url, "ticket credential stored");

    Ok(IssuedCredential { qr_url, token })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_round_trip() {
        let signer = TicketTokenSigner::new(b"a-test-signing-secret");
        let reg = Uuid::new_v4();
        let token = signer.sign(reg, "NM25-ABCD").unwrap();

        let claims = signer.verify(&token).expect("token verifies");
        assert_eq!(claims.t, "NM25-ABCD");
        assert_eq!(claims.reg, reg);
        assert!(claims.exp > Utc::now().timestamp());
    }

    #[test]
    fn token_rejects_tampering_and_wrong_key() {
        let signer = TicketTokenSigner::new(b"a-test-signing-secret");
        let token = signer.sign(Uuid::new_v4(), "NM25-ABCD").unwrap();

        let mut tampered = token.clone();
        tampered.insert(0, 'x');
        assert!(signer.verify(&tampered).is_none());

        let other = TicketTokenSigner::new(b"a-different-secret!!");
        assert!(other.verify(&token).is_none());
    }

    #[test]
    fn token_rejects_expired() {
        let signer = TicketTokenSigner::new(b"a-test-signing-secret");
        let claims = TicketTokenClaims {
            v: 1,
            reg: Uuid::new_v4(),
            t: "NM25-ABCD".to_string(),
            exp: (Utc::now() - Duration::days(1)).timestamp(),
        };
        let payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&claims).unwrap());
        let sig = signature::sign(&payload, b"a-test-signing-secret");
        assert!(signer.verify(&format!("{payload}.{sig}")).is_none());
    }

    #[test]
    fn qr_content_formats() {
        assert_eq!(qr_content("NM25-ABCD", None), "TKT|NM25-ABCD");
        assert_eq!(qr_content("NM25-ABCD", Some("tok")), "TKT|NM25-ABCD|tok");
    }

    #[test]
    fn renders_png() {
        let png = render_qr_png("TKT|NM25-ABCD").unwrap();
        // PNG magic bytes
        assert_eq!(&png[..8], &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]);
    }
}
