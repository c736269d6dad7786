//! S3 XML wire types.
//!
//! Request and response bodies matching the AWS S3 schemas, serialized
//! with quick-xml. Field names mirror the wire, so every struct is
//! rename-heavy.

use serde::{Deserialize, Serialize};

/// Unix seconds to the ISO-8601 form S3 uses in listings
#[must_use]
pub fn timestamp_to_iso(ts: u64) -> String {
    use chrono::{DateTime, Utc};
    DateTime::<Utc>::from_timestamp(ts as i64, 0)
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string())
        .unwrap_or_else(|| "1970-01-01T00:00:00.000Z".to_string())
}

/// Unix seconds to the RFC 7231 form used in Last-Modified headers
#[must_use]
pub fn timestamp_to_http_date(ts: u64) -> String {
    use chrono::{DateTime, Utc};
    DateTime::<Utc>::from_timestamp(ts as i64, 0)
        .map(|dt| dt.format("%a, %d %b %Y %H:%M:%S GMT").to_string())
        .unwrap_or_else(|| "Thu, 01 Jan 1970 00:00:00 GMT".to_string())
}

/// Wrap a serializable wire type with the XML declaration
pub fn to_xml_document<T: Serialize>(value: &T) -> String {
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n{}",
        quick_xml::se::to_string(value).unwrap_or_default()
    )
}

// ============================================================================
// Service / bucket listings
// ============================================================================

#[derive(Serialize)]
#[serde(rename = "ListAllMyBucketsResult")]
pub struct ListBucketsResult {
    #[serde(rename = "Owner")]
    pub owner: Owner,
    #[serde(rename = "Buckets")]
    pub buckets: Buckets,
}

#[derive(Serialize)]
pub struct Owner {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(rename = "DisplayName")]
    pub display_name: String,
}

#[derive(Serialize)]
pub struct Buckets {
    #[serde(rename = "Bucket")]
    pub bucket: Vec<BucketEntry>,
}

#[derive(Serialize)]
pub struct BucketEntry {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "CreationDate")]
    pub creation_date: String,
}

#[derive(Serialize)]
#[serde(rename = "ListBucketResult")]
pub struct ListBucketResult {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Prefix")]
    pub prefix: String,
    #[serde(rename = "Delimiter")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delimiter: Option<String>,
    #[serde(rename = "MaxKeys")]
    pub max_keys: u32,
    #[serde(rename = "KeyCount")]
    pub key_count: u32,
    #[serde(rename = "IsTruncated")]
    pub is_truncated: bool,
    #[serde(rename = "NextContinuationToken")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_continuation_token: Option<String>,
    #[serde(rename = "CommonPrefixes")]
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub common_prefixes: Vec<CommonPrefix>,
    #[serde(rename = "Contents")]
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub contents: Vec<ObjectContent>,
}

#[derive(Serialize)]
pub struct CommonPrefix {
    #[serde(rename = "Prefix")]
    pub prefix: String,
}

#[derive(Serialize)]
pub struct ObjectContent {
    #[serde(rename = "Key")]
    pub key: String,
    #[serde(rename = "LastModified")]
    pub last_modified: String,
    #[serde(rename = "ETag")]
    pub etag: String,
    #[serde(rename = "Size")]
    pub size: u64,
    #[serde(rename = "StorageClass")]
    pub storage_class: String,
}

#[derive(Serialize)]
#[serde(rename = "ListVersionsResult")]
pub struct ListVersionsResult {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Prefix")]
    pub prefix: String,
    #[serde(rename = "MaxKeys")]
    pub max_keys: u32,
    #[serde(rename = "IsTruncated")]
    pub is_truncated: bool,
    #[serde(rename = "NextKeyMarker")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_key_marker: Option<String>,
    #[serde(rename = "Version")]
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub versions: Vec<VersionEntry>,
    #[serde(rename = "DeleteMarker")]
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub delete_markers: Vec<DeleteMarkerEntry>,
}

#[derive(Serialize)]
pub struct VersionEntry {
    #[serde(rename = "Key")]
    pub key: String,
    #[serde(rename = "VersionId")]
    pub version_id: String,
    #[serde(rename = "IsLatest")]
    pub is_latest: bool,
    #[serde(rename = "LastModified")]
    pub last_modified: String,
    #[serde(rename = "ETag")]
    pub etag: String,
    #[serde(rename = "Size")]
    pub size: u64,
    #[serde(rename = "StorageClass")]
    pub storage_class: String,
}

#[derive(Serialize)]
pub struct DeleteMarkerEntry {
    #[serde(rename = "Key")]
    pub key: String,
    #[serde(rename = "VersionId")]
    pub version_id: String,
    #[serde(rename = "IsLatest")]
    pub is_latest: bool,
    #[serde(rename = "LastModified")]
    pub last_modified: String,
}

#[derive(Serialize)]
#[serde(rename = "LocationConstraint")]
pub struct LocationConstraint {
    #[serde(rename = "$text")]
    pub region: String,
}

// ============================================================================
// Multipart upload
// ============================================================================

#[derive(Serialize)]
#[serde(rename = "InitiateMultipartUploadResult")]
pub struct InitiateMultipartUploadResult {
    #[serde(rename = "Bucket")]
    pub bucket: String,
    #[serde(rename = "Key")]
    pub key: String,
    #[serde(rename = "UploadId")]
    pub upload_id: String,
}

#[derive(Serialize)]
#[serde(rename = "CompleteMultipartUploadResult")]
pub struct CompleteMultipartUploadResult {
    #[serde(rename = "Location")]
    pub location: String,
    #[serde(rename = "Bucket")]
    pub bucket: String,
    #[serde(rename = "Key")]
    pub key: String,
    #[serde(rename = "ETag")]
    pub etag: String,
}

#[derive(Serialize)]
#[serde(rename = "ListPartsResult")]
pub struct ListPartsResult {
    #[serde(rename = "Bucket")]
    pub bucket: String,
    #[serde(rename = "Key")]
    pub key: String,
    #[serde(rename = "UploadId")]
    pub upload_id: String,
    #[serde(rename = "PartNumberMarker")]
    pub part_number_marker: u32,
    #[serde(rename = "MaxParts")]
    pub max_parts: u32,
    #[serde(rename = "IsTruncated")]
    pub is_truncated: bool,
    #[serde(rename = "Part")]
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub parts: Vec<PartItem>,
}

#[derive(Serialize)]
pub struct PartItem {
    #[serde(rename = "PartNumber")]
    pub part_number: u32,
    #[serde(rename = "LastModified")]
    pub last_modified: String,
    #[serde(rename = "ETag")]
    pub etag: String,
    #[serde(rename = "Size")]
    pub size: u64,
}

#[derive(Serialize)]
#[serde(rename = "ListMultipartUploadsResult")]
pub struct ListMultipartUploadsResult {
    #[serde(rename = "Bucket")]
    pub bucket: String,
    #[serde(rename = "MaxUploads")]
    pub max_uploads: u32,
    #[serde(rename = "IsTruncated")]
    pub is_truncated: bool,
    #[serde(rename = "Upload")]
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub uploads: Vec<UploadItem>,
}

#[derive(Serialize)]
pub struct UploadItem {
    #[serde(rename = "Key")]
    pub key: String,
    #[serde(rename = "UploadId")]
    pub upload_id: String,
    #[serde(rename = "Initiated")]
    pub initiated: String,
    #[serde(rename = "StorageClass")]
    pub storage_class: String,
}

/// Request body for CompleteMultipartUpload (XML from client)
#[derive(Debug, Deserialize)]
#[serde(rename = "CompleteMultipartUpload")]
pub struct CompleteMultipartUploadXml {
    #[serde(rename = "Part", default)]
    pub parts: Vec<CompletePartXml>,
}

#[derive(Debug, Deserialize)]
pub struct CompletePartXml {
    #[serde(rename = "PartNumber")]
    pub part_number: u32,
    #[serde(rename = "ETag")]
    pub etag: String,
}

// ============================================================================
// Batch delete
// ============================================================================

/// Request body for DeleteObjects (XML from client)
#[derive(Debug, Deserialize)]
#[serde(rename = "Delete")]
pub struct DeleteObjectsRequest {
    #[serde(rename = "Quiet", default)]
    pub quiet: bool,
    #[serde(rename = "Object", default)]
    pub objects: Vec<DeleteObjectIdentifier>,
}

#[derive(Debug, Deserialize)]
pub struct DeleteObjectIdentifier {
    #[serde(rename = "Key")]
    pub key: String,
    #[serde(rename = "VersionId")]
    #[serde(default)]
    pub version_id: Option<String>,
}

#[derive(Serialize)]
#[serde(rename = "DeleteResult")]
pub struct DeleteObjectsResult {
    #[serde(rename = "Deleted")]
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub deleted: Vec<DeletedObject>,
    #[serde(rename = "Error")]
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<DeleteError>,
}

#[derive(Serialize)]
pub struct DeletedObject {
    #[serde(rename = "Key")]
    pub key: String,
    #[serde(rename = "VersionId")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version_id: Option<String>,
    #[serde(rename = "DeleteMarker")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delete_marker: Option<bool>,
}

#[derive(Serialize)]
pub struct DeleteError {
    #[serde(rename = "Key")]
    pub key: String,
    #[serde(rename = "Code")]
    pub code: String,
    #[serde(rename = "Message")]
    pub message: String,
}

#[derive(Serialize)]
#[serde(rename = "CopyObjectResult")]
pub struct CopyObjectResult {
    #[serde(rename = "ETag")]
    pub etag: String,
    #[serde(rename = "LastModified")]
    pub last_modified: String,
}

// ============================================================================
// Bucket subresources
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename = "VersioningConfiguration")]
pub struct VersioningConfigurationXml {
    #[serde(rename = "Status")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename = "LifecycleConfiguration")]
pub struct LifecycleConfigurationXml {
    #[serde(rename = "Rule", default)]
    pub rules: Vec<LifecycleRuleXml>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LifecycleRuleXml {
    #[serde(rename = "ID", default)]
    pub id: Option<String>,
    #[serde(rename = "Status")]
    pub status: String,
    #[serde(rename = "Prefix", default)]
    pub prefix: Option<String>,
    #[serde(rename = "Filter", default)]
    pub filter: Option<LifecycleFilterXml>,
    #[serde(rename = "Expiration", default)]
    pub expiration: Option<ExpirationXml>,
    #[serde(rename = "NoncurrentVersionExpiration", default)]
    pub noncurrent_version_expiration: Option<NoncurrentVersionExpirationXml>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LifecycleFilterXml {
    #[serde(rename = "Prefix", default)]
    pub prefix: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ExpirationXml {
    #[serde(rename = "Days", default)]
    pub days: Option<u32>,
    #[serde(rename = "ExpiredObjectDeleteMarker", default)]
    pub expired_object_delete_marker: Option<bool>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct NoncurrentVersionExpirationXml {
    #[serde(rename = "NoncurrentDays")]
    pub noncurrent_days: u32,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename = "CORSConfiguration")]
pub struct CorsConfigurationXml {
    #[serde(rename = "CORSRule", default)]
    pub rules: Vec<CorsRuleXml>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CorsRuleXml {
    #[serde(rename = "AllowedOrigin", default)]
    pub allowed_origins: Vec<String>,
    #[serde(rename = "AllowedMethod", default)]
    pub allowed_methods: Vec<String>,
    #[serde(rename = "AllowedHeader", default)]
    pub allowed_headers: Vec<String>,
    #[serde(rename = "ExposeHeader", default)]
    pub expose_headers: Vec<String>,
    #[serde(rename = "MaxAgeSeconds", default)]
    pub max_age_seconds: Option<u32>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename = "ServerSideEncryptionConfiguration")]
pub struct EncryptionConfigurationXml {
    #[serde(rename = "Rule", default)]
    pub rules: Vec<EncryptionRuleXml>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EncryptionRuleXml {
    #[serde(rename = "ApplyServerSideEncryptionByDefault", default)]
    pub apply: Option<EncryptionDefaultXml>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EncryptionDefaultXml {
    #[serde(rename = "SSEAlgorithm")]
    pub sse_algorithm: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename = "ObjectLockConfiguration")]
pub struct ObjectLockConfigurationXml {
    #[serde(rename = "ObjectLockEnabled", default)]
    pub object_lock_enabled: Option<String>,
    #[serde(rename = "Rule", default)]
    pub rule: Option<ObjectLockRuleXml>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ObjectLockRuleXml {
    #[serde(rename = "DefaultRetention", default)]
    pub default_retention: Option<DefaultRetentionXml>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DefaultRetentionXml {
    #[serde(rename = "Mode", default)]
    pub mode: Option<String>,
    #[serde(rename = "Days", default)]
    pub days: Option<u32>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename = "Retention")]
pub struct RetentionXml {
    #[serde(rename = "Mode")]
    pub mode: String,
    #[serde(rename = "RetainUntilDate")]
    pub retain_until_date: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename = "LegalHold")]
pub struct LegalHoldXml {
    #[serde(rename = "Status")]
    pub status: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename = "PublicAccessBlockConfiguration")]
pub struct PublicAccessBlockXml {
    #[serde(rename = "BlockPublicAcls", default)]
    pub block_public_acls: bool,
    #[serde(rename = "IgnorePublicAcls", default)]
    pub ignore_public_acls: bool,
    #[serde(rename = "BlockPublicPolicy", default)]
    pub block_public_policy: bool,
    #[serde(rename = "RestrictPublicBuckets", default)]
    pub restrict_public_buckets: bool,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename = "NotificationConfiguration")]
pub struct NotificationConfigurationXml {
    #[serde(rename = "WebhookConfiguration", default)]
    pub webhooks: Vec<WebhookConfigurationXml>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct WebhookConfigurationXml {
    #[serde(rename = "Event", default)]
    pub events: Vec<String>,
    #[serde(rename = "Prefix", default)]
    pub prefix: Option<String>,
    #[serde(rename = "Url")]
    pub url: String,
}

// ============================================================================
// ACLs
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename = "AccessControlPolicy")]
pub struct AccessControlPolicyXml {
    #[serde(rename = "Owner")]
    pub owner: OwnerXml,
    #[serde(rename = "AccessControlList")]
    pub access_control_list: AccessControlListXml,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct OwnerXml {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(rename = "DisplayName", default)]
    pub display_name: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AccessControlListXml {
    #[serde(rename = "Grant", default)]
    pub grants: Vec<GrantXml>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GrantXml {
    #[serde(rename = "Grantee")]
    pub grantee: GranteeXml,
    #[serde(rename = "Permission")]
    pub permission: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GranteeXml {
    #[serde(rename = "ID", default)]
    pub id: Option<String>,
    #[serde(rename = "DisplayName", default)]
    pub display_name: Option<String>,
    #[serde(rename = "URI", default)]
    pub uri: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_bucket_result_serializes() {
        let result = ListBucketResult {
            name: "b".into(),
            prefix: String::new(),
            delimiter: None,
            max_keys: 1000,
            key_count: 1,
            is_truncated: false,
            next_continuation_token: None,
            common_prefixes: vec![],
            contents: vec![ObjectContent {
                key: "k.txt".into(),
                last_modified: timestamp_to_iso(0),
                etag: "\"abc\"".into(),
                size: 3,
                storage_class: "STANDARD".into(),
            }],
        };
        let xml = to_xml_document(&result);
        assert!(xml.starts_with("<?xml"));
        assert!(xml.contains("<ListBucketResult>"));
        assert!(xml.contains("<Key>k.txt</Key>"));
        assert!(xml.contains("<KeyCount>1</KeyCount>"));
    }

    #[test]
    fn test_complete_multipart_request_parses() {
        let xml = r#"<CompleteMultipartUpload>
            <Part><PartNumber>1</PartNumber><ETag>"etag1"</ETag></Part>
            <Part><PartNumber>2</PartNumber><ETag>"etag2"</ETag></Part>
        </CompleteMultipartUpload>"#;
        let parsed: CompleteMultipartUploadXml = quick_xml::de::from_str(xml).unwrap();
        assert_eq!(parsed.parts.len(), 2);
        assert_eq!(parsed.parts[0].part_number, 1);
        assert_eq!(parsed.parts[1].etag, "\"etag2\"");
    }

    #[test]
    fn test_delete_objects_request_parses() {
        let xml = r#"<Delete>
            <Quiet>true</Quiet>
            <Object><Key>a</Key></Object>
            <Object><Key>b</Key><VersionId>v1</VersionId></Object>
        </Delete>"#;
        let parsed: DeleteObjectsRequest = quick_xml::de::from_str(xml).unwrap();
        assert!(parsed.quiet);
        assert_eq!(parsed.objects.len(), 2);
        assert_eq!(parsed.objects[1].version_id.as_deref(), Some("v1"));
    }

    #[test]
    fn test_lifecycle_configuration_parses() {
        let xml = r#"<LifecycleConfiguration>
            <Rule>
                <ID>expire-logs</ID>
                <Status>Enabled</Status>
                <Filter><Prefix>logs/</Prefix></Filter>
                <Expiration><Days>30</Days></Expiration>
                <NoncurrentVersionExpiration><NoncurrentDays>7</NoncurrentDays></NoncurrentVersionExpiration>
            </Rule>
        </LifecycleConfiguration>"#;
        let parsed: LifecycleConfigurationXml = quick_xml::de::from_str(xml).unwrap();
        assert_eq!(parsed.rules.len(), 1);
        let rule = &parsed.rules[0];
        assert_eq!(rule.id.as_deref(), Some("expire-logs"));
        assert_eq!(rule.expiration.as_ref().unwrap().days, Some(30));
        assert_eq!(
            rule.noncurrent_version_expiration
                .as_ref()
                .unwrap()
                .noncurrent_days,
            7
        );
    }

    #[test]
    fn test_versioning_configuration_roundtrip() {
        let xml = r#"<VersioningConfiguration><Status>Enabled</Status></VersioningConfiguration>"#;
        let parsed: VersioningConfigurationXml = quick_xml::de::from_str(xml).unwrap();
        assert_eq!(parsed.status.as_deref(), Some("Enabled"));
    }

    #[test]
    fn test_retention_parses() {
        let xml = r#"<Retention><Mode>COMPLIANCE</Mode><RetainUntilDate>2030-01-01T00:00:00Z</RetainUntilDate></Retention>"#;
        let parsed: RetentionXml = quick_xml::de::from_str(xml).unwrap();
        assert_eq!(parsed.mode, "COMPLIANCE");
    }
}
