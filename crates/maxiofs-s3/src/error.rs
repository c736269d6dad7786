//! S3 error envelope.
//!
//! Every failure on the S3 surface renders as the AWS XML error body
//! with the matching HTTP status:
//! `<Error><Code/><Message/><Resource/><RequestId/></Error>`.

use axum::body::Body;
use axum::http::{header, StatusCode};
use axum::response::Response;
use quick_xml::se::to_string as to_xml;
use serde::Serialize;
use uuid::Uuid;

use maxiofs_common::Error;

/// The wire shape of an S3 error
#[derive(Serialize)]
#[serde(rename = "Error")]
pub struct S3ErrorBody {
    #[serde(rename = "Code")]
    pub code: String,
    #[serde(rename = "Message")]
    pub message: String,
    #[serde(rename = "Resource")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,
    #[serde(rename = "RequestId")]
    pub request_id: String,
}

/// Render an explicit code/message/status as an S3 error response.
pub fn s3_error_response(code: &str, message: &str, status: u16, resource: Option<&str>) -> Response {
    let body = S3ErrorBody {
        code: code.to_string(),
        message: message.to_string(),
        resource: resource.map(String::from),
        request_id: Uuid::new_v4().to_string(),
    };

    let xml = format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n{}",
        to_xml(&body).unwrap_or_default()
    );

    Response::builder()
        .status(StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR))
        .header(header::CONTENT_TYPE, "application/xml")
        .body(Body::from(xml))
        .unwrap()
}

/// Render a domain error as an S3 error response.
pub fn error_response(err: &Error, resource: Option<&str>) -> Response {
    if err.http_status_code() >= 500 {
        tracing::error!(error = %err, "request failed");
    }
    s3_error_response(
        err.s3_error_code(),
        &err.to_string(),
        err.http_status_code(),
        resource,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_envelope_shape() {
        let resp = error_response(&Error::BucketNotFound("photos".into()), Some("/photos"));
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            resp.headers().get(header::CONTENT_TYPE).unwrap(),
            "application/xml"
        );
    }

    #[test]
    fn test_xml_body_serializes() {
        let body = S3ErrorBody {
            code: "NoSuchKey".into(),
            message: "not found".into(),
            resource: Some("/b/k".into()),
            request_id: "req-1".into(),
        };
        let xml = to_xml(&body).unwrap();
        assert!(xml.contains("<Code>NoSuchKey</Code>"));
        assert!(xml.contains("<Resource>/b/k</Resource>"));
        assert!(xml.contains("<RequestId>req-1</RequestId>"));
    }
}
