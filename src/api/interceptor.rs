use reqwest::{RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;

use super::notify::Notifier;
use super::types::{ApiEnvelope, ApiError, ApiReply, IgnoreCodes, EMPTY_BODY};

pub const REQUEST_ERROR_TITLE: &str = "Request error";
pub const DEFAULT_FAILURE: &str = "The interface is abnormal. Please try again later";

/// Send a request and normalise the outcome.
///
/// Transport failures, non-2xx statuses and unreadable bodies notify once
/// and return `Err`. A `success: false` envelope is still `Ok`: the caller
/// gets the data back, and the failure is only notified when its code is
/// not in `ignore`.
pub async fn intercept<T: DeserializeOwned>(
    request: RequestBuilder,
    ignore: &IgnoreCodes,
    notifier: &dyn Notifier,
) -> Result<ApiReply<T>, ApiError> {
    let result = fetch(request).await;
    match result {
        Ok((status, body)) => match parse_body(status, &body) {
            Ok(envelope) => Ok(screen(envelope, status, ignore, notifier)),
            Err(e) => Err(report(e, notifier)),
        },
        Err(e) => Err(report(e, notifier)),
    }
}

/// Apply the soft-failure policy to an already parsed envelope.
pub fn screen<T>(
    envelope: ApiEnvelope<T>,
    status: StatusCode,
    ignore: &IgnoreCodes,
    notifier: &dyn Notifier,
) -> ApiReply<T> {
    if !envelope.success {
        if ignore.ignores(envelope.err_code.as_ref()) {
            tracing::debug!(
                "Ignoring soft failure {:?}: {:?}",
                envelope.err_code,
                envelope.err_msg
            );
        } else {
            let description = envelope
                .err_msg
                .as_deref()
                .filter(|m| !m.is_empty())
                .unwrap_or(DEFAULT_FAILURE);
            notifier.error(REQUEST_ERROR_TITLE, description);
        }
    }
    ApiReply { envelope, status }
}

async fn fetch(request: RequestBuilder) -> Result<(StatusCode, String), ApiError> {
    let response = request
        .send()
        .await
        .map_err(|e| ApiError::from_transport(&e))?;
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| ApiError::from_transport(&e))?;
    Ok((status, body))
}

fn parse_body<T: DeserializeOwned>(status: StatusCode, body: &str) -> Result<ApiEnvelope<T>, ApiError> {
    if !status.is_success() {
        let message = serde_json::from_str::<ApiEnvelope<serde_json::Value>>(body)
            .ok()
            .and_then(|e| e.err_msg)
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| {
                status
                    .canonical_reason()
                    .unwrap_or("Request failed")
                    .to_string()
            });
        return Err(ApiError::Http {
            status: status.as_u16(),
            message,
        });
    }

    if body.trim().is_empty() {
        return Err(ApiError::InvalidResponse(EMPTY_BODY.to_string()));
    }

    serde_json::from_str(body).map_err(|e| ApiError::InvalidResponse(e.to_string()))
}

fn report(error: ApiError, notifier: &dyn Notifier) -> ApiError {
    tracing::warn!("API request failed: {}", error);
    notifier.error(REQUEST_ERROR_TITLE, &error.description());
    error
}
