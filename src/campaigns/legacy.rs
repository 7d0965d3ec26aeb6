//! Read-time decode of stored campaign records.
//!
//! Stored records come in three shapes:
//!
//! - current: carries `schema_version`
//! - legacy: the flat admin-form layout (`base_pipeline_id`, `v1_value`, `exp_days`, ...)
//! - anything else, which is reported as unknown and skipped by callers
//!
//! Older writers sometimes stored the JSON as a string, or inside a
//! `{"value": ...}` envelope. One layer of each is unwrapped before
//! the shape is decided.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;

use crate::models::{
    CAMPAIGN_SCHEMA_VERSION, Campaign, ExpiryStep, RuleOp, StagePair, TriggerRule, VariantStep,
};
use crate::utils::serde_ext::{string_or_number, string_or_number_opt};

/// Outcome of decoding one stored record.
#[derive(Debug)]
pub enum StoredCampaign {
    Current(Campaign),
    Legacy(Campaign),
    Unknown(String),
}

/// Decode a raw stored value.
pub fn decode(raw: &str) -> StoredCampaign {
    let value = match serde_json::from_str::<Value>(raw) {
        Ok(v) => v,
        Err(e) => return StoredCampaign::Unknown(format!("not JSON: {e}")),
    };

    // One layer of JSON-in-string.
    let value = match value {
        Value::String(inner) => match serde_json::from_str::<Value>(&inner) {
            Ok(v) => v,
            Err(e) => return StoredCampaign::Unknown(format!("string payload is not JSON: {e}")),
        },
        other => other,
    };

    // One `{"value": ...}` envelope, itself possibly a JSON string.
    let value = match value {
        Value::Object(mut map) if map.len() == 1 && map.contains_key("value") => {
            match map.remove("value") {
                Some(Value::String(inner)) => match serde_json::from_str::<Value>(&inner) {
                    Ok(v) => v,
                    Err(e) => {
                        return StoredCampaign::Unknown(format!("envelope is not JSON: {e}"));
                    }
                },
                Some(v) => v,
                None => Value::Null,
            }
        }
        other => other,
    };

    let Value::Object(map) = &value else {
        return StoredCampaign::Unknown("record is not an object".to_string());
    };

    if map.contains_key("schema_version") {
        return match serde_json::from_value::<Campaign>(value) {
            Ok(c) => StoredCampaign::Current(c),
            Err(e) => StoredCampaign::Unknown(format!("current schema mismatch: {e}")),
        };
    }

    if map.contains_key("id") && (map.contains_key("base_pipeline_id") || map.contains_key("v1_value"))
    {
        return match serde_json::from_value::<LegacyCampaign>(value) {
            Ok(legacy) => StoredCampaign::Legacy(legacy.migrate()),
            Err(e) => StoredCampaign::Unknown(format!("legacy schema mismatch: {e}")),
        };
    }

    StoredCampaign::Unknown("unrecognized campaign shape".to_string())
}

/// Flat layout written by the first admin form.
#[derive(Debug, Deserialize)]
struct LegacyCampaign {
    #[serde(deserialize_with = "string_or_number")]
    id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default, alias = "active")]
    enabled: Option<bool>,
    #[serde(default)]
    deleted: bool,

    #[serde(default, deserialize_with = "string_or_number_opt")]
    base_pipeline_id: Option<String>,
    #[serde(default, deserialize_with = "string_or_number_opt")]
    base_status_id: Option<String>,

    #[serde(default)]
    v1_op: Option<RuleOp>,
    #[serde(default)]
    v1_value: Option<String>,
    #[serde(default, deserialize_with = "string_or_number_opt")]
    v1_pipeline_id: Option<String>,
    #[serde(default, deserialize_with = "string_or_number_opt")]
    v1_status_id: Option<String>,

    #[serde(default)]
    v2_enabled: bool,
    #[serde(default)]
    v2_op: Option<RuleOp>,
    #[serde(default)]
    v2_value: Option<String>,
    #[serde(default, deserialize_with = "string_or_number_opt")]
    v2_pipeline_id: Option<String>,
    #[serde(default, deserialize_with = "string_or_number_opt")]
    v2_status_id: Option<String>,

    #[serde(default)]
    exp_days: Option<u32>,
    #[serde(default, deserialize_with = "string_or_number_opt")]
    exp_pipeline_id: Option<String>,
    #[serde(default, deserialize_with = "string_or_number_opt")]
    exp_status_id: Option<String>,

    #[serde(default)]
    v1_count: u64,
    #[serde(default)]
    v2_count: u64,
    #[serde(default)]
    exp_count: u64,

    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    updated_at: Option<DateTime<Utc>>,
}

fn pair(pipeline: Option<String>, status: Option<String>) -> Option<StagePair> {
    match (pipeline, status) {
        (Some(p), Some(s)) => Some(StagePair::new(p, s)),
        _ => None,
    }
}

fn step(
    enabled: bool,
    op: Option<RuleOp>,
    value: Option<String>,
    target: Option<StagePair>,
) -> Option<VariantStep> {
    let value = value.filter(|v| !v.trim().is_empty())?;
    Some(VariantStep {
        enabled,
        trigger_rule: TriggerRule::new(op.unwrap_or_default(), value),
        target: target?,
    })
}

impl LegacyCampaign {
    fn migrate(self) -> Campaign {
        let created_at = self.created_at.unwrap_or_default();
        let exp = match (self.exp_days, pair(self.exp_pipeline_id, self.exp_status_id)) {
            (Some(days), Some(target)) => Some(ExpiryStep { days, target }),
            _ => None,
        };
        Campaign {
            schema_version: CAMPAIGN_SCHEMA_VERSION,
            id: self.id,
            name: self.name,
            active: self.enabled.unwrap_or(true),
            deleted: self.deleted,
            base: pair(self.base_pipeline_id, self.base_status_id),
            v1: step(
                true,
                self.v1_op,
                self.v1_value,
                pair(self.v1_pipeline_id, self.v1_status_id),
            ),
            v2: step(
                self.v2_enabled,
                self.v2_op,
                self.v2_value,
                pair(self.v2_pipeline_id, self.v2_status_id),
            ),
            exp,
            v1_count: self.v1_count,
            v2_count: self.v2_count,
            exp_count: self.exp_count,
            created_at,
            updated_at: self.updated_at.unwrap_or(created_at),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CampaignInput;

    fn current_json() -> String {
        let campaign = CampaignInput {
            name: Some("Spring".into()),
            base: Some(StagePair::new("1", "2")),
            ..Default::default()
        }
        .into_campaign("c1".into(), Utc::now());
        serde_json::to_string(&campaign).unwrap()
    }

    #[test]
    fn test_current_record() {
        let decoded = decode(&current_json());
        assert!(matches!(decoded, StoredCampaign::Current(ref c) if c.id == "c1"));
    }

    #[test]
    fn test_string_and_envelope_wrapped() {
        let as_string = serde_json::to_string(&current_json()).unwrap();
        assert!(matches!(decode(&as_string), StoredCampaign::Current(_)));

        let envelope = serde_json::json!({ "value": current_json() }).to_string();
        assert!(matches!(decode(&envelope), StoredCampaign::Current(_)));

        let envelope_obj = format!(r#"{{"value": {}}}"#, current_json());
        assert!(matches!(decode(&envelope_obj), StoredCampaign::Current(_)));
    }

    #[test]
    fn test_deeper_nesting_is_not_chased() {
        let twice = serde_json::to_string(&serde_json::to_string(&current_json()).unwrap()).unwrap();
        assert!(matches!(decode(&twice), StoredCampaign::Unknown(_)));
    }

    #[test]
    fn test_legacy_record_migrates() {
        let raw = r#"{
            "id": 17, "name": "Old", "enabled": true,
            "base_pipeline_id": 5, "base_status_id": "51",
            "v1_op": "equals", "v1_value": "sale", "v1_pipeline_id": 5, "v1_status_id": 52,
            "v2_enabled": false, "v2_value": "promo", "v2_pipeline_id": 5, "v2_status_id": 53,
            "exp_days": 3, "exp_pipeline_id": 5, "exp_status_id": 59,
            "v1_count": 12, "created_at": "2025-06-01T10:00:00Z"
        }"#;
        let StoredCampaign::Legacy(campaign) = decode(raw) else {
            panic!("expected legacy record");
        };
        assert_eq!(campaign.id, "17");
        assert_eq!(campaign.base, Some(StagePair::new("5", "51")));
        let v1 = campaign.v1.unwrap();
        assert_eq!(v1.trigger_rule.op, RuleOp::Equals);
        assert_eq!(v1.target.status_id, "52");
        assert!(!campaign.v2.unwrap().enabled);
        assert_eq!(campaign.exp.unwrap().days, 3);
        assert_eq!(campaign.v1_count, 12);
        assert_eq!(campaign.updated_at, campaign.created_at);
    }

    #[test]
    fn test_unknown_shapes() {
        assert!(matches!(decode("nope"), StoredCampaign::Unknown(_)));
        assert!(matches!(decode("[1,2]"), StoredCampaign::Unknown(_)));
        assert!(matches!(decode(r#"{"title":"x"}"#), StoredCampaign::Unknown(_)));
        assert!(matches!(
            decode(r#"{"schema_version": 2, "id": "x"}"#),
            StoredCampaign::Unknown(_)
        ));
    }
}
