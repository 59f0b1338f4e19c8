use crate::error::IngestError;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use url::Url;

pub const DEFAULT_AWS_REGION: &str = "us-east-1";

const TEXTRACT_SERVICE: &str = "textract";
const DETECT_TARGET: &str = "Textract.DetectDocumentText";
const AMZ_JSON: &str = "application/x-amz-json-1.1";

/// Extracts line-level text from raw image or PDF bytes.
#[async_trait]
pub trait OcrEngine: Send + Sync {
    /// Lines in document order, as segmented by the OCR service.
    async fn detect_lines(&self, bytes: &[u8]) -> Result<Vec<String>, IngestError>;
}

#[derive(Debug, Clone)]
pub struct AwsCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

impl AwsCredentials {
    pub fn from_env() -> Result<Self, IngestError> {
        let access_key_id = non_empty_env("AWS_ACCESS_KEY_ID").ok_or_else(|| {
            IngestError::InvalidArgument("AWS_ACCESS_KEY_ID is not set".to_string())
        })?;
        let secret_access_key = non_empty_env("AWS_SECRET_ACCESS_KEY").ok_or_else(|| {
            IngestError::InvalidArgument("AWS_SECRET_ACCESS_KEY is not set".to_string())
        })?;

        Ok(Self {
            access_key_id,
            secret_access_key,
            session_token: non_empty_env("AWS_SESSION_TOKEN"),
        })
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[derive(Debug, Clone, Serialize)]
struct DetectDocumentTextRequest {
    #[serde(rename = "Document")]
    document: DocumentBytes,
}

#[derive(Debug, Clone, Serialize)]
struct DocumentBytes {
    #[serde(rename = "Bytes")]
    bytes: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DetectDocumentTextResponse {
    #[serde(default)]
    blocks: Vec<Block>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Block {
    #[serde(default)]
    block_type: Option<String>,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct AwsErrorBody {
    #[serde(rename = "__type", default)]
    kind: Option<String>,
    #[serde(alias = "Message", default)]
    message: Option<String>,
}

/// AWS Textract `DetectDocumentText` over its JSON protocol.
pub struct TextractClient {
    endpoint: Url,
    signer: SigV4Signer,
    client: Client,
}

impl TextractClient {
    pub fn new(
        region: impl Into<String>,
        endpoint: Option<&str>,
        credentials: AwsCredentials,
    ) -> Result<Self, IngestError> {
        let region = region.into();
        let endpoint = match endpoint.map(str::trim).filter(|value| !value.is_empty()) {
            Some(custom) => Url::parse(custom)?,
            None => Url::parse(&format!("https://textract.{region}.amazonaws.com/"))?,
        };

        Ok(Self {
            endpoint,
            signer: SigV4Signer {
                credentials,
                region,
                service: TEXTRACT_SERVICE.to_string(),
            },
            client: Client::new(),
        })
    }

    pub fn from_env(
        region: impl Into<String>,
        endpoint: Option<&str>,
    ) -> Result<Self, IngestError> {
        Self::new(region, endpoint, AwsCredentials::from_env()?)
    }
}

#[async_trait]
impl OcrEngine for TextractClient {
    async fn detect_lines(&self, bytes: &[u8]) -> Result<Vec<String>, IngestError> {
        let body = serde_json::to_vec(&DetectDocumentTextRequest {
            document: DocumentBytes {
                bytes: STANDARD.encode(bytes),
            },
        })
        .map_err(|error| IngestError::OcrFailed(error.to_string()))?;

        let headers = vec![
            ("content-type".to_string(), AMZ_JSON.to_string()),
            ("x-amz-target".to_string(), DETECT_TARGET.to_string()),
        ];
        let signed = self
            .signer
            .sign("POST", &self.endpoint, &headers, &body, Utc::now())?;

        let mut request = self.client.post(self.endpoint.clone()).body(body);
        for (name, value) in headers.iter().chain(signed.iter()) {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = request.send().await?;
        let status = response.status();
        let raw = response.bytes().await?;

        if !status.is_success() {
            let error: AwsErrorBody = serde_json::from_slice(&raw).unwrap_or_default();
            return Err(IngestError::OcrFailed(format!(
                "textract returned {status}: {} {}",
                error.kind.unwrap_or_default(),
                error.message.unwrap_or_default()
            )));
        }

        let parsed: DetectDocumentTextResponse = serde_json::from_slice(&raw).map_err(|error| {
            IngestError::OcrFailed(format!("unreadable textract response: {error}"))
        })?;
        Ok(line_texts(parsed))
    }
}

fn line_texts(response: DetectDocumentTextResponse) -> Vec<String> {
    response
        .blocks
        .into_iter()
        .filter(|block| block.block_type.as_deref() == Some("LINE"))
        .map(|block| block.text.unwrap_or_default())
        .collect()
}

/// AWS Signature Version 4 for single-shot JSON requests.
#[derive(Debug, Clone)]
pub struct SigV4Signer {
    pub credentials: AwsCredentials,
    pub region: String,
    pub service: String,
}

impl SigV4Signer {
    /// Returns the headers to add to the request: `x-amz-date`, the session
    /// token when present, and `authorization`.
    pub fn sign(
        &self,
        method: &str,
        url: &Url,
        headers: &[(String, String)],
        body: &[u8],
        now: DateTime<Utc>,
    ) -> Result<Vec<(String, String)>, IngestError> {
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
        let date = now.format("%Y%m%d").to_string();

        let host = url
            .host_str()
            .ok_or_else(|| IngestError::InvalidArgument(format!("endpoint has no host: {url}")))?;
        let host = match url.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        };

        let mut added = vec![("x-amz-date".to_string(), amz_date.clone())];
        if let Some(token) = &self.credentials.session_token {
            added.push(("x-amz-security-token".to_string(), token.clone()));
        }

        let mut canonical = headers
            .iter()
            .chain(added.iter())
            .map(|(name, value)| (name.to_lowercase(), value.trim().to_string()))
            .collect::<Vec<_>>();
        canonical.push(("host".to_string(), host));
        canonical.sort();

        let canonical_headers = canonical
            .iter()
            .map(|(name, value)| format!("{name}:{value}\n"))
            .collect::<String>();
        let signed_headers = canonical
            .iter()
            .map(|(name, _)| name.as_str())
            .collect::<Vec<_>>()
            .join(";");

        let canonical_request = format!(
            "{method}\n{path}\n{query}\n{canonical_headers}\n{signed_headers}\n{payload}",
            path = url.path(),
            query = url.query().unwrap_or_default(),
            payload = hex::encode(Sha256::digest(body)),
        );

        let scope = format!("{date}/{}/{}/aws4_request", self.region, self.service);
        let string_to_sign = format!(
            "AWS4-HMAC-SHA256\n{amz_date}\n{scope}\n{}",
            hex::encode(Sha256::digest(canonical_request.as_bytes()))
        );

        let key = signing_key(
            &self.credentials.secret_access_key,
            &date,
            &self.region,
            &self.service,
        )?;
        let signature = hex::encode(hmac_sha256(&key, string_to_sign.as_bytes())?);

        added.push((
            "authorization".to_string(),
            format!(
                "AWS4-HMAC-SHA256 Credential={}/{scope}, SignedHeaders={signed_headers}, Signature={signature}",
                self.credentials.access_key_id
            ),
        ));
        Ok(added)
    }
}

fn signing_key(
    secret: &str,
    date: &str,
    region: &str,
    service: &str,
) -> Result<Vec<u8>, IngestError> {
    let date_key = hmac_sha256(format!("AWS4{secret}").as_bytes(), date.as_bytes())?;
    let region_key = hmac_sha256(&date_key, region.as_bytes())?;
    let service_key = hmac_sha256(&region_key, service.as_bytes())?;
    hmac_sha256(&service_key, b"aws4_request")
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Result<Vec<u8>, IngestError> {
    let mut mac = Hmac::<Sha256>::new_from_slice(key)
        .map_err(|error| IngestError::InvalidArgument(format!("bad signing key: {error}")))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn signer(session_token: Option<&str>) -> SigV4Signer {
        SigV4Signer {
            credentials: AwsCredentials {
                access_key_id: "AKIDEXAMPLE".to_string(),
                secret_access_key: "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY".to_string(),
                session_token: session_token.map(str::to_string),
            },
            region: "us-east-1".to_string(),
            service: "textract".to_string(),
        }
    }

    #[test]
    fn signing_key_matches_published_derivation() -> Result<(), IngestError> {
        let key = signing_key(
            "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY",
            "20120215",
            "us-east-1",
            "iam",
        )?;
        assert_eq!(
            hex::encode(key),
            "f4780e2d9f65fa895f9c67b32ce1baf0b0d8a43505a000a1a9e090d414db404d"
        );
        Ok(())
    }

    #[test]
    fn authorization_header_lists_sorted_signed_headers() -> Result<(), Box<dyn std::error::Error>> {
        let url = Url::parse("https://textract.us-east-1.amazonaws.com/")?;
        let now = Utc
            .with_ymd_and_hms(2024, 3, 9, 12, 30, 0)
            .single()
            .ok_or("invalid timestamp")?;
        let headers = vec![
            ("x-amz-target".to_string(), DETECT_TARGET.to_string()),
            ("content-type".to_string(), AMZ_JSON.to_string()),
        ];

        let signed = signer(Some("token")).sign("POST", &url, &headers, b"{}", now)?;
        let authorization = signed
            .iter()
            .find(|(name, _)| name == "authorization")
            .map(|(_, value)| value.clone())
            .ok_or("missing authorization header")?;

        assert!(signed.contains(&("x-amz-date".to_string(), "20240309T123000Z".to_string())));
        assert!(signed.contains(&("x-amz-security-token".to_string(), "token".to_string())));
        assert!(authorization.starts_with(
            "AWS4-HMAC-SHA256 Credential=AKIDEXAMPLE/20240309/us-east-1/textract/aws4_request, "
        ));
        assert!(authorization.contains(
            "SignedHeaders=content-type;host;x-amz-date;x-amz-security-token;x-amz-target, "
        ));

        let again = signer(Some("token")).sign("POST", &url, &headers, b"{}", now)?;
        assert_eq!(signed, again);

        let other_body = signer(Some("token")).sign("POST", &url, &headers, b"{ }", now)?;
        assert_ne!(signed, other_body);
        Ok(())
    }

    #[test]
    fn only_line_blocks_are_kept_in_order() -> Result<(), serde_json::Error> {
        let response: DetectDocumentTextResponse = serde_json::from_str(
            r#"{
                "DocumentMetadata": {"Pages": 1},
                "Blocks": [
                    {"BlockType": "PAGE", "Id": "p"},
                    {"BlockType": "LINE", "Text": "Dear diary,"},
                    {"BlockType": "WORD", "Text": "Dear"},
                    {"BlockType": "LINE", "Text": "it rained again"},
                    {"BlockType": "LINE"}
                ]
            }"#,
        )?;

        assert_eq!(
            line_texts(response),
            vec!["Dear diary,".to_string(), "it rained again".to_string(), String::new()]
        );
        Ok(())
    }

    #[test]
    fn response_without_blocks_yields_no_lines() -> Result<(), serde_json::Error> {
        let response: DetectDocumentTextResponse = serde_json::from_str("{}")?;
        assert!(line_texts(response).is_empty());
        Ok(())
    }

    #[test]
    fn custom_endpoint_overrides_regional_default() -> Result<(), IngestError> {
        let credentials = signer(None).credentials;
        let regional = TextractClient::new("eu-west-1", None, credentials.clone())?;
        assert_eq!(
            regional.endpoint.as_str(),
            "https://textract.eu-west-1.amazonaws.com/"
        );

        let local = TextractClient::new("eu-west-1", Some("http://localhost:4566"), credentials)?;
        assert_eq!(local.endpoint.as_str(), "http://localhost:4566/");
        Ok(())
    }
}
