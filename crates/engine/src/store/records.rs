//! Projection of open wire JSON into typed column sets.
//!
//! The remote payloads have scanner-dependent shape. Only a closed set of
//! fields is projected into columns; the full record is preserved verbatim
//! in `raw_data` for downstream reprocessing.

use serde_json::Value;

use crate::types::Severity;

pub(crate) struct VulnerabilityRecord {
    pub id: String,
    pub name: Option<String>,
    pub description: Option<String>,
    pub vulnerability_type: Option<String>,
    pub integration_id: Option<String>,
    pub target_id: Option<String>,
    pub package_identifier: Option<String>,
    pub severity: &'static str,
    pub cvss_score: Option<f64>,
    pub scanner_score: Option<f64>,
    pub is_fixable: Option<bool>,
    pub first_detected: Option<String>,
    pub last_detected: Option<String>,
    pub remediate_by: Option<String>,
    pub deactivated_on: Option<String>,
    pub related_vulns: String,
    pub related_urls: String,
    pub raw: String,
}

pub(crate) struct RemediationRecord {
    pub id: String,
    pub vulnerability_id: Option<String>,
    pub vulnerable_asset_id: Option<String>,
    pub severity: &'static str,
    pub detected_date: Option<String>,
    pub sla_deadline_date: Option<String>,
    pub remediation_date: Option<String>,
    pub remediated_on_time: Option<bool>,
    pub integration_id: Option<String>,
    pub integration_type: Option<String>,
    pub status: Option<String>,
    pub raw: String,
}

pub(crate) struct AssetRecord {
    pub id: String,
    pub name: Option<String>,
    pub asset_type: Option<String>,
    pub integration_id: Option<String>,
    pub environment: Option<String>,
    pub platform: Option<String>,
    pub owner: Option<String>,
    pub external_identifier: Option<String>,
    pub ip_addresses: String,
    pub hostnames: String,
    pub raw: String,
}

/// Project a wire vulnerability. Returns `None` when the record has no
/// usable id.
pub(crate) fn project_vulnerability(value: &Value) -> Option<VulnerabilityRecord> {
    let id = text(value, "id")?;
    Some(VulnerabilityRecord {
        id,
        name: text(value, "name"),
        description: text(value, "description"),
        vulnerability_type: text(value, "vulnerabilityType"),
        integration_id: text(value, "integrationId"),
        target_id: text(value, "targetId"),
        package_identifier: text(value, "packageIdentifier"),
        severity: severity(value),
        cvss_score: real(value, "cvssSeverityScore"),
        scanner_score: real(value, "scannerScore"),
        is_fixable: boolean(value, "isFixable"),
        first_detected: text(value, "firstDetectedDate"),
        last_detected: text(value, "lastDetectedDate"),
        remediate_by: text(value, "remediateByDate"),
        deactivated_on: deactivation_date(value),
        related_vulns: string_list(value, "relatedVulns"),
        related_urls: string_list(value, "relatedUrls"),
        raw: value.to_string(),
    })
}

pub(crate) fn project_remediation(value: &Value) -> Option<RemediationRecord> {
    let id = text(value, "id")?;
    Some(RemediationRecord {
        id,
        vulnerability_id: text(value, "vulnerabilityId"),
        vulnerable_asset_id: text(value, "vulnerableAssetId"),
        severity: severity(value),
        detected_date: text(value, "detectedDate"),
        sla_deadline_date: text(value, "slaDeadlineDate"),
        remediation_date: text(value, "remediationDate"),
        remediated_on_time: boolean(value, "remediatedOnTime"),
        integration_id: text(value, "integrationId"),
        integration_type: text(value, "integrationType"),
        status: text(value, "status"),
        raw: value.to_string(),
    })
}

pub(crate) fn project_asset(value: &Value) -> Option<AssetRecord> {
    let id = text(value, "id")?;
    Some(AssetRecord {
        id,
        name: text(value, "name"),
        asset_type: text(value, "assetType"),
        integration_id: text(value, "integrationId"),
        environment: text(value, "environment"),
        platform: text(value, "platform"),
        owner: text(value, "owner"),
        external_identifier: text(value, "externalIdentifier"),
        ip_addresses: string_list(value, "ipAddresses"),
        hostnames: string_list(value, "hostnames"),
        raw: value.to_string(),
    })
}

/// Deactivation timestamp carried by a wire vulnerability, if any.
pub(crate) fn deactivation_date(value: &Value) -> Option<String> {
    value
        .pointer("/deactivateMetadata/deactivatedOnDate")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
}

/// Whether a stored raw payload carries a deactivation timestamp.
pub(crate) fn raw_has_deactivation(raw: &str) -> bool {
    serde_json::from_str::<Value>(raw)
        .ok()
        .as_ref()
        .and_then(deactivation_date)
        .is_some()
}

fn text(value: &Value, key: &str) -> Option<String> {
    value
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
}

fn real(value: &Value, key: &str) -> Option<f64> {
    value.get(key).and_then(Value::as_f64)
}

fn boolean(value: &Value, key: &str) -> Option<bool> {
    value.get(key).and_then(Value::as_bool)
}

fn severity(value: &Value) -> &'static str {
    value
        .get("severity")
        .and_then(Value::as_str)
        .map(Severity::parse)
        .unwrap_or(Severity::Unknown)
        .as_str()
}

fn string_list(value: &Value, key: &str) -> String {
    match value.get(key) {
        Some(list @ Value::Array(_)) => list.to_string(),
        _ => "[]".to_string(),
    }
}
