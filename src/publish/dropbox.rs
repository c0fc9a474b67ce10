use crate::publish::{ObjectStore, StoreError};
use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

const TOKEN_ENDPOINT: &str = "https://api.dropbox.com/oauth2/token";
const UPLOAD_ENDPOINT: &str = "https://content.dropboxapi.com/2/files/upload";

/// Single-request uploads are limited to 150 MB by Dropbox.
const MAX_UPLOAD_SIZE: usize = 150 * 1024 * 1024;

/// App credentials plus a long-lived refresh token.
///
/// Secrets are masked in `Debug` output.
#[derive(Debug, Clone)]
pub struct DropboxCredentials {
    pub app_key: String,
    pub app_secret: SecretString,
    pub refresh_token: SecretString,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Deserialize)]
struct UploadResponse {
    path_display: String,
}

/// Uploads files to Dropbox.
///
/// Every upload first exchanges the refresh token for a short-lived access
/// token, then sends the file in one request with `mode: add` (an existing
/// file with the same name is not overwritten).
pub struct DropboxStore {
    client: reqwest::Client,
    credentials: DropboxCredentials,
    token_url: String,
    upload_url: String,
}

impl DropboxStore {
    pub fn new(client: reqwest::Client, credentials: DropboxCredentials) -> Self {
        Self {
            client,
            credentials,
            token_url: TOKEN_ENDPOINT.to_string(),
            upload_url: UPLOAD_ENDPOINT.to_string(),
        }
    }

    /// Points the store at other endpoints (used by tests).
    pub fn with_endpoints(mut self, token_url: impl Into<String>, upload_url: impl Into<String>) -> Self {
        self.token_url = token_url.into();
        self.upload_url = upload_url.into();
        self
    }

    async fn access_token(&self) -> Result<SecretString, StoreError> {
        let form = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("grant_type", "refresh_token")
            .append_pair("client_id", &self.credentials.app_key)
            .append_pair("client_secret", self.credentials.app_secret.expose_secret())
            .append_pair("refresh_token", self.credentials.refresh_token.expose_secret())
            .finish();

        let response = self
            .client
            .post(&self.token_url)
            .header(reqwest::header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(form)
            .send()
            .await?;
        let body = checked_body(response, "token exchange").await?;
        let token: TokenResponse = serde_json::from_slice(&body)?;
        Ok(SecretString::from(token.access_token))
    }
}

#[async_trait]
impl ObjectStore for DropboxStore {
    async fn put(&self, path: &str, bytes: Vec<u8>) -> Result<String, StoreError> {
        if bytes.len() > MAX_UPLOAD_SIZE {
            return Err(StoreError::TooLarge(bytes.len()));
        }
        if !path.starts_with('/') {
            return Err(StoreError::InvalidPath(path.to_string()));
        }

        let token = self.access_token().await?;
        let arg = serde_json::json!({
            "autorename": false,
            "mode": "add",
            "mute": false,
            "path": path,
            "strict_conflict": false,
        });

        let response = self
            .client
            .post(&self.upload_url)
            .bearer_auth(token.expose_secret())
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .header("Dropbox-API-Arg", header_safe_json(&arg.to_string()))
            .body(bytes)
            .send()
            .await?;
        let body = checked_body(response, "upload").await?;
        let uploaded: UploadResponse = serde_json::from_slice(&body)?;

        tracing::debug!(path = %uploaded.path_display, "Uploaded to Dropbox");
        Ok(uploaded.path_display)
    }
}

async fn checked_body(
    response: reqwest::Response,
    operation: &'static str,
) -> Result<Vec<u8>, StoreError> {
    let status = response.status();
    let body = response.bytes().await?;
    if !status.is_success() {
        return Err(StoreError::Status {
            operation,
            status: status.as_u16(),
            body: String::from_utf8_lossy(&body).chars().take(500).collect(),
        });
    }
    Ok(body.to_vec())
}

/// HTTP header values must be ASCII; Dropbox expects non-ASCII characters in
/// the JSON argument as `\uXXXX` escapes.
fn header_safe_json(json: &str) -> String {
    let mut out = String::with_capacity(json.len());
    for c in json.chars() {
        if c.is_ascii() {
            out.push(c);
        } else {
            let mut units = [0u16; 2];
            for unit in c.encode_utf16(&mut units) {
                out.push_str(&format!("\\u{:04x}", unit));
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn credentials() -> DropboxCredentials {
        DropboxCredentials {
            app_key: "key".into(),
            app_secret: SecretString::from("secret".to_string()),
            refresh_token: SecretString::from("refresh".to_string()),
        }
    }

    fn store(server: &MockServer) -> DropboxStore {
        DropboxStore::new(reqwest::Client::new(), credentials()).with_endpoints(
            format!("{}/oauth2/token", server.uri()),
            format!("{}/2/files/upload", server.uri()),
        )
    }

    #[tokio::test]
    async fn test_upload_exchanges_token_then_uploads() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth2/token"))
            .and(body_string_contains("grant_type=refresh_token"))
            .and(body_string_contains("refresh_token=refresh"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(r#"{"access_token":"short-lived","token_type":"bearer"}"#),
            )
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/2/files/upload"))
            .and(header("Authorization", "Bearer short-lived"))
            .and(header("Content-Type", "application/octet-stream"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(r#"{"path_display":"/Apps/Rakuten Kobo/a.epub","id":"id:1"}"#),
            )
            .expect(1)
            .mount(&server)
            .await;

        let path = store(&server)
            .put("/Apps/Rakuten Kobo/a.epub", b"epub".to_vec())
            .await
            .unwrap();
        assert_eq!(path, "/Apps/Rakuten Kobo/a.epub");
    }

    #[tokio::test]
    async fn test_token_failure_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth2/token"))
            .respond_with(ResponseTemplate::new(400).set_body_string(r#"{"error":"invalid_grant"}"#))
            .mount(&server)
            .await;

        let result = store(&server).put("/a.epub", b"epub".to_vec()).await;
        match result {
            Err(StoreError::Status {
                operation, status, ..
            }) => {
                assert_eq!(operation, "token exchange");
                assert_eq!(status, 400);
            }
            other => panic!("expected token exchange failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_upload_conflict_is_reported() {
        let server = MockServer::start().await;
        Mock::given(path("/oauth2/token"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"access_token":"t"}"#))
            .mount(&server)
            .await;
        Mock::given(path("/2/files/upload"))
            .respond_with(ResponseTemplate::new(409).set_body_string("path/conflict/file/"))
            .mount(&server)
            .await;

        let result = store(&server).put("/a.epub", b"epub".to_vec()).await;
        assert!(matches!(result, Err(StoreError::Status { status: 409, .. })));
    }

    #[tokio::test]
    async fn test_relative_path_rejected_before_any_request() {
        let server = MockServer::start().await;
        let result = store(&server).put("a.epub", b"epub".to_vec()).await;
        assert!(matches!(result, Err(StoreError::InvalidPath(_))));
    }

    #[test]
    fn test_header_safe_json_escapes_non_ascii() {
        assert_eq!(header_safe_json(r#"{"path":"/a b"}"#), r#"{"path":"/a b"}"#);
        assert_eq!(header_safe_json(r#"{"path":"/Café"}"#), r#"{"path":"/Caf\u00e9"}"#);
        assert_eq!(header_safe_json("😀"), "\\ud83d\\ude00");
    }

    #[test]
    fn test_debug_masks_secrets() {
        let debug = format!("{:?}", credentials());
        assert!(!debug.contains("secret\""));
        assert!(!debug.contains("refresh\""));
        assert!(debug.contains("key"));
    }
}
