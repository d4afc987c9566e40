use serde::Serialize;

use crate::services::amount::extract_amount;
use crate::services::blob_store::{split_bucket_key, to_storage_key, BlobStore};
use crate::services::ocr_client::OcrClient;

/// Why an OCR payment check did not match. Expected outcomes, not faults:
/// each lands the registration in manual review with this code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MismatchReason {
    NoProof,
    FetchFailed,
    NoAmount,
    AmountMismatch,
}

impl MismatchReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            MismatchReason::NoProof => "no_proof",
            MismatchReason::FetchFailed => "fetch_failed",
            MismatchReason::NoAmount => "no_amount",
            MismatchReason::AmountMismatch => "amount_mismatch",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PaymentCheck {
    pub matched: bool,
    pub detected: Option<i32>,
    pub reason: Option<MismatchReason>,
}

impl PaymentCheck {
    fn matched(detected: i32) -> Self {
        Self {
            matched: true,
            detected: Some(detected),
            reason: None,
        }
    }

    fn mismatch(reason: MismatchReason, detected: Option<i32>) -> Self {
        Self {
            matched: false,
            detected,
            reason: Some(reason),
        }
    }
}

/// Inclusive tolerance compare: |detected - expected| <= tolerance passes.
/// Tolerance absorbs OCR digit jitter, default 3 SEK.
pub fn amounts_match(detected: i64, expected: i64, tolerance: i64) -> bool {
    (detected - expected).abs() <= tolerance
}

/// Verifies a payment-proof image against the expected order amount.
///
/// Construction requires the OCR collaborator to be configured; a missing
/// configuration is the caller's fatal error (whole batch), never a
/// per-row outcome. `verify` itself never fails for "no match": every
/// non-match is a PaymentCheck with a reason code.
pub struct PaymentVerifier<'a> {
    blob: &'a BlobStore,
    ocr: &'a OcrClient,
    default_proof_bucket: &'a str,
    tolerance: i32,
}

impl<'a> PaymentVerifier<'a> {
    pub fn new(
        blob: &'a BlobStore,
        ocr: &'a OcrClient,
        default_proof_bucket: &'a str,
        tolerance: i32,
    ) -> Self {
        Self {
            blob,
            ocr,
            default_proof_bucket,
            tolerance,
        }
    }

    #[tracing::instrument(skip(self), fields(expected = expected_amount))]
    pub async fn verify(&self, proof_ref: &str, expected_amount: i32) -> PaymentCheck {
        if proof_ref.trim().is_empty() {
            return PaymentCheck::mismatch(MismatchReason::NoProof, None);
        }

        let storage_key = to_storage_key(proof_ref);
        let (bucket, key) = match split_bucket_key(&storage_key) {
            Some(pair) => pair,
            // bare key without a bucket segment
            None if !storage_key.is_empty() => (self.default_proof_bucket, storage_key.as_str()),
            None => return PaymentCheck::mismatch(MismatchReason::NoProof, None),
        };

        let image = match self.blob.download(bucket, key).await {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(error = %e, bucket = %bucket, key = %key, "proof download failed");
                return PaymentCheck::mismatch(MismatchReason::FetchFailed, None);
            }
        };

        let filename = key.rsplit('/').next().unwrap_or("proof.jpg");
        let text = match self.ocr.extract_text(image, filename).await {
            Ok(t) => t,
            Err(e) => {
                tracing::warn!(error = %e, "OCR extraction failed");
                return PaymentCheck::mismatch(MismatchReason::FetchFailed, None);
            }
        };

        let Some(detected) = extract_amount(&text) else {
            return PaymentCheck::mismatch(MismatchReason::NoAmount, None);
        };
        let detected = detected as i32;

        if amounts_match(detected as i64, expected_amount as i64, self.tolerance as i64) {
            PaymentCheck::matched(detected)
        } else {
            tracing::info!(
                detected,
                expected = expected_amount,
                tolerance = self.tolerance,
                "OCR amount outside tolerance"
            );
            PaymentCheck::mismatch(MismatchReason::AmountMismatch, Some(detected))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tolerance_is_inclusive() {
        // |625-622| = 3, exactly at tolerance: passes
        assert!(amounts_match(622, 625, 3));
        assert!(amounts_match(628, 625, 3));
        // |625-621| = 4: fails
        assert!(!amounts_match(621, 625, 3));
        assert!(!amounts_match(629, 625, 3));
        assert!(amounts_match(625, 625, 0));
    }

    #[test]
    fn reason_codes_serialize_snake_case() {
        assert_eq!(MismatchReason::AmountMismatch.as_str(), "amount_mismatch");
        assert_eq!(
            serde_json::to_string(&MismatchReason::NoProof).unwrap(),
            "\"no_proof\""
        );
    }
}
