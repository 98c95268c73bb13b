use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use blob_store::BlobError;
use serde::{Deserialize, Serialize};
use tracing::error;

/// Service-level error codes carried in the response envelope, kept apart
/// from the HTTP status.
pub mod codes {
    pub const STORE_FAILED: (u16, &str) = (900, "File store failed");
    pub const STORE_COULD_NOT_OPEN: (u16, &str) = (902, "Could not open the file store");
    pub const UNLINK_FAILED: (u16, &str) = (1000, "Unlink failed");
    pub const FILE_EXISTS: (u16, &str) = (1100, "File exists");
    pub const FILE_EXISTS_FAILED: (u16, &str) = (1101, "File exists failed");
}

/// Structured error envelope: `{ status, message, err? }` serialized as the
/// body of a 400 response.
#[derive(Debug, Serialize, Deserialize)]
pub struct DepotAPIError {
    pub status: u16,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub err: Option<String>,
}

impl DepotAPIError {
    pub fn new(code: (u16, &str)) -> Self {
        Self {
            status: code.0,
            message: code.1.to_string(),
            err: None,
        }
    }

    pub fn with_cause(code: (u16, &str), cause: &BlobError) -> Self {
        Self {
            status: code.0,
            message: code.1.to_string(),
            err: Some(cause.to_string()),
        }
    }
}

impl IntoResponse for DepotAPIError {
    fn into_response(self) -> Response {
        error!("API Error: {} - {}", self.status, self.message);
        (StatusCode::BAD_REQUEST, Json(self)).into_response()
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ExistsRequest {
    #[serde(rename = "fileName")]
    pub file_name: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UnlinkRequest {
    #[serde(default)]
    pub files: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probe_failure_envelope_carries_code_and_cause() {
        let err = BlobError::ExistsProbeFailed {
            key: "thing.bin".to_string(),
            source: object_store::Error::Generic {
                store: "test",
                source: "probe offline".into(),
            },
        };
        let envelope = DepotAPIError::with_cause(codes::FILE_EXISTS_FAILED, &err);
        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["status"], 1101);
        assert_eq!(json["message"], "File exists failed");
        assert!(json["err"].as_str().unwrap().contains("probe offline"));
    }

    #[test]
    fn envelope_without_cause_omits_err() {
        let json = serde_json::to_value(DepotAPIError::new(codes::FILE_EXISTS)).unwrap();
        assert_eq!(json["status"], 1100);
        assert_eq!(json["message"], "File exists");
        assert!(json.get("err").is_none());
    }
}
