use reqwest::multipart::{Form, Part};
use reqwest::Client;
use secrecy::{ExposeSecret, Secret};
use serde::Deserialize;

#[derive(thiserror::Error, Debug)]
pub enum OcrError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("OCR API error: {status} - {message}")]
    ApiError { status: u16, message: String },

    #[error("OCR produced no text: {0}")]
    NoText(String),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct OcrResponse {
    #[serde(rename = "OCRExitCode")]
    ocr_exit_code: Option<i32>,
    parsed_results: Option<Vec<ParsedResult>>,
    error_message: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ParsedResult {
    parsed_text: Option<String>,
}

/// Client for the opaque image-to-text extraction service. The service
/// returns unstructured text; all amount parsing stays on our side.
#[derive(Clone)]
pub struct OcrClient {
    client: Client,
    api_url: String,
    api_key: Secret<String>,
}

impl OcrClient {
    pub fn new(api_url: &str, api_key: Secret<String>) -> Self {
        Self {
            client: Client::new(),
            api_url: api_url.trim_end_matches('/').to_string(),
            api_key,
        }
    }

    /// Sends image bytes for text extraction and returns the free text.
    #[tracing::instrument(skip(self, image_bytes), fields(filename = %filename, bytes = image_bytes.len()))]
    pub async fn extract_text(
        &self,
        image_bytes: Vec<u8>,
        filename: &str,
    ) -> Result<String, OcrError> {
        let form = Form::new()
            .text("isOverlayRequired", "false")
            .text("detectOrientation", "true")
            .text("scale", "true")
            .text("language", "swe")
            .text("OCREngine", "2")
            .part(
                "file",
                Part::bytes(image_bytes)
                    .file_name(filename.to_string())
                    .mime_str("image/jpeg")?,
            );

        let response = self
            .client
            .post(&self.api_url)
            .header("apikey", self.api_key.expose_secret())
            .multipart(form)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(OcrError::ApiError { status, message });
        }

        let body: OcrResponse = response.json().await?;

        if body.ocr_exit_code != Some(1) {
            let detail = body
                .error_message
                .map(|m| m.to_string())
                .unwrap_or_else(|| format!("exit code {:?}", body.ocr_exit_code));
            return Err(OcrError::NoText(detail));
        }

        let text = body
            .parsed_results
            .unwrap_or_default()
            .into_iter()
            .filter_map(|r| r.parsed_text)
            .collect::<Vec<_>>()
            .join("\n");

        if text.trim().is_empty() {
            return Err(OcrError::NoText("empty parsed text".to_string()));
        }

        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn extracts_parsed_text() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/parse/image"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "OCRExitCode": 1,
                "ParsedResults": [{ "ParsedText": "Belopp: 625,00 kr" }]
            })))
            .mount(&server)
            .await;

        let client = OcrClient::new(
            &format!("{}/parse/image", server.uri()),
            Secret::new("key".to_string()),
        );
        let text = client.extract_text(vec![1, 2, 3], "proof.jpg").await.unwrap();
        assert!(text.contains("625,00"));
    }

    #[tokio::test]
    async fn no_text_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/parse/image"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "OCRExitCode": 3,
                "ErrorMessage": "Unable to recognize"
            })))
            .mount(&server)
            .await;

        let client = OcrClient::new(
            &format!("{}/parse/image", server.uri()),
            Secret::new("key".to_string()),
        );
        let err = client.extract_text(vec![1], "proof.jpg").await.unwrap_err();
        assert!(matches!(err, OcrError::NoText(_)));
    }
}
