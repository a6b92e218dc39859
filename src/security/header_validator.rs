use crate::utils::error::ApiError;
use axum::http::HeaderMap;
use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::{debug, warn};

type HmacSha256 = Hmac<Sha256>;

/// Identity of an authenticated request, extracted by the security
/// middleware and read by handlers.
#[derive(Debug, Clone, Copy)]
pub struct AuthenticatedOperator {
    pub operator_id: i64,
    pub timestamp: i64,
}

#[derive(Debug, Clone)]
pub struct CustomHeaderValidator {
    pub expected_app_id: String,
    pub expected_api_key: String,
    pub signature_enabled: bool,
    pub timestamp_tolerance: i64, // seconds
}

impl CustomHeaderValidator {
    pub fn new(
        app_id: String,
        api_key: String,
        signature_enabled: bool,
        timestamp_tolerance: i64,
    ) -> Self {
        Self {
            expected_app_id: app_id,
            expected_api_key: api_key,
            signature_enabled,
            timestamp_tolerance,
        }
    }

    /// Validate custom headers and resolve the acting operator.
    pub fn validate(&self, headers: &HeaderMap) -> Result<AuthenticatedOperator, ApiError> {
        // 1. Check X-App-ID
        let app_id = headers
            .get("X-App-ID")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| ApiError::Unauthorized("Missing X-App-ID header".to_string()))?;

        if app_id != self.expected_app_id {
            warn!("Invalid X-App-ID: expected {}, got {}", self.expected_app_id, app_id);
            return Err(ApiError::Unauthorized("Invalid X-App-ID".to_string()));
        }

        // 2. Check X-API-Key
        let api_key = headers
            .get("X-API-Key")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| ApiError::Unauthorized("Missing X-API-Key header".to_string()))?;

        if api_key != self.expected_api_key {
            warn!("Invalid X-API-Key");
            return Err(ApiError::Unauthorized("Invalid X-API-Key".to_string()));
        }

        // 3. Check X-Request-Timestamp (replay window)
        let timestamp = headers
            .get("X-Request-Timestamp")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<i64>().ok())
            .ok_or_else(|| {
                ApiError::Unauthorized("Missing or invalid X-Request-Timestamp header".to_string())
            })?;

        let now = Utc::now().timestamp();
        let diff = (now - timestamp).abs();

        if diff > self.timestamp_tolerance {
            warn!("Timestamp too old/future: {} seconds difference", diff);
            return Err(ApiError::Unauthorized(
                "Request timestamp out of tolerance window".to_string(),
            ));
        }

        // 4. X-Operator-Id names the acting operator
        let operator_id = headers
            .get("X-Operator-Id")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<i64>().ok())
            .ok_or_else(|| {
                ApiError::Unauthorized("Missing or invalid X-Operator-Id header".to_string())
            })?;

        // 5. Optional: X-Request-Signature (HMAC)
        if self.signature_enabled {
            let signature = headers
                .get("X-Request-Signature")
                .and_then(|v| v.to_str().ok())
                .ok_or_else(|| {
                    ApiError::Unauthorized("Missing X-Request-Signature header".to_string())
                })?;

            // HMAC-SHA256(api_key, app_id + timestamp)
            let message = format!("{}{}", app_id, timestamp);

            if !self.verify_signature(&message, signature)? {
                warn!("Invalid request signature");
                return Err(ApiError::Unauthorized("Invalid signature".to_string()));
            }
        }

        debug!("Headers validated for operator {}", operator_id);

        Ok(AuthenticatedOperator {
            operator_id,
            timestamp,
        })
    }

    fn verify_signature(&self, message: &str, signature: &str) -> Result<bool, ApiError> {
        let mut mac = HmacSha256::new_from_slice(self.expected_api_key.as_bytes())
            .map_err(|e| ApiError::InternalError(format!("HMAC error: {}", e)))?;

        mac.update(message.as_bytes());

        let expected = hex::encode(mac.finalize().into_bytes());

        Ok(expected.eq_ignore_ascii_case(signature))
    }

    /// Generate signature (for clients and tests).
    pub fn generate_signature(&self, app_id: &str, timestamp: i64) -> Result<String, ApiError> {
        let message = format!("{}{}", app_id, timestamp);

        let mut mac = HmacSha256::new_from_slice(self.expected_api_key.as_bytes())
            .map_err(|e| ApiError::InternalError(format!("HMAC error: {}", e)))?;

        mac.update(message.as_bytes());

        Ok(hex::encode(mac.finalize().into_bytes()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn validator() -> CustomHeaderValidator {
        CustomHeaderValidator::new("menu-admin".into(), "secret".into(), false, 300)
    }

    fn valid_headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("X-App-ID", HeaderValue::from_static("menu-admin"));
        headers.insert("X-API-Key", HeaderValue::from_static("secret"));
        headers.insert(
            "X-Request-Timestamp",
            HeaderValue::from_str(&Utc::now().timestamp().to_string()).unwrap(),
        );
        headers.insert("X-Operator-Id", HeaderValue::from_static("42"));
        headers
    }

    #[test]
    fn accepts_valid_headers_and_extracts_operator() {
        let operator = validator().validate(&valid_headers()).unwrap();
        assert_eq!(operator.operator_id, 42);
    }

    #[test]
    fn rejects_wrong_api_key() {
        let mut headers = valid_headers();
        headers.insert("X-API-Key", HeaderValue::from_static("wrong"));
        assert!(validator().validate(&headers).is_err());
    }

    #[test]
    fn rejects_stale_timestamp() {
        let mut headers = valid_headers();
        let stale = Utc::now().timestamp() - 3600;
        headers.insert(
            "X-Request-Timestamp",
            HeaderValue::from_str(&stale.to_string()).unwrap(),
        );
        assert!(validator().validate(&headers).is_err());
    }

    #[test]
    fn signature_round_trips_when_enabled() {
        let validator =
            CustomHeaderValidator::new("menu-admin".into(), "secret".into(), true, 300);
        let mut headers = valid_headers();
        let ts: i64 = headers["X-Request-Timestamp"].to_str().unwrap().parse().unwrap();
        let sig = validator.generate_signature("menu-admin", ts).unwrap();
        headers.insert("X-Request-Signature", HeaderValue::from_str(&sig).unwrap());

        assert!(validator.validate(&headers).is_ok());
    }
}
