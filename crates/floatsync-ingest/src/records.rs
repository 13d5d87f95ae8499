//! Typed records produced by the record extractor.
//!
//! Every field the upstream files may omit is an `Option`. Records are
//! checked with `validate()` before they reach the writer so that a bad file
//! fails as a parse error instead of as a database error.

use chrono::{DateTime, Utc};
use floatsync_common::CycleNumber;
use serde::{Deserialize, Serialize};

/// Platform-level fields. Profiles and the entity metadata file both carry
/// some of them; missing values never erase known ones.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlatformMetadata {
    pub wmo_id: Option<String>,
    pub platform_type: Option<String>,
    pub project_name: Option<String>,
    pub pi_name: Option<String>,
    pub end_mission_status: Option<String>,
    pub end_mission_date: Option<DateTime<Utc>>,
}

impl PlatformMetadata {
    /// Fill gaps in `self` from `fallback`.
    pub fn or(&self, fallback: &PlatformMetadata) -> PlatformMetadata {
        PlatformMetadata {
            wmo_id: self.wmo_id.clone().or_else(|| fallback.wmo_id.clone()),
            platform_type: self
                .platform_type
                .clone()
                .or_else(|| fallback.platform_type.clone()),
            project_name: self
                .project_name
                .clone()
                .or_else(|| fallback.project_name.clone()),
            pi_name: self.pi_name.clone().or_else(|| fallback.pi_name.clone()),
            end_mission_status: self
                .end_mission_status
                .clone()
                .or_else(|| fallback.end_mission_status.clone()),
            end_mission_date: self.end_mission_date.or(fallback.end_mission_date),
        }
    }
}

/// One value observed by one sensor at one depth.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    pub depth_m: Option<f64>,
    pub sensor: String,
    pub value: Option<f64>,
    pub qc: Option<String>,
}

/// Content of one cycle's profile file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfileRecords {
    pub profile_number: Option<i32>,
    pub juld: Option<DateTime<Utc>>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub pres: Vec<Option<f64>>,
    pub temp: Vec<Option<f64>>,
    pub psal: Vec<Option<f64>>,
    pub temp_qc: Option<String>,
    pub psal_qc: Option<String>,
    pub platform: PlatformMetadata,
    pub measurements: Vec<Measurement>,
}

impl ProfileRecords {
    pub fn validate(&self) -> Result<(), String> {
        validate_position(self.latitude, self.longitude)?;

        let len = self.pres.len();
        if !self.temp.is_empty() && self.temp.len() != len {
            return Err(format!(
                "temp has {} levels but pres has {}",
                self.temp.len(),
                len
            ));
        }
        if !self.psal.is_empty() && self.psal.len() != len {
            return Err(format!(
                "psal has {} levels but pres has {}",
                self.psal.len(),
                len
            ));
        }
        if let Some(m) = self.measurements.iter().find(|m| m.sensor.trim().is_empty()) {
            return Err(format!("measurement at depth {:?} has no sensor name", m.depth_m));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetaAttribute {
    pub var_name: String,
    pub attr_name: Option<String>,
    pub value_text: Option<String>,
    pub dtype: Option<String>,
    pub shape: Option<String>,
}

/// Content of the entity metadata file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetadataRecords {
    pub platform: PlatformMetadata,
    pub attributes: Vec<MetaAttribute>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TechRecord {
    pub cycle: Option<CycleNumber>,
    pub param_name: String,
    pub param_value: Option<String>,
    pub units: Option<String>,
    pub collected_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrajectoryRecord {
    pub cycle: Option<CycleNumber>,
    pub profile_number: Option<i32>,
    pub juld: Option<DateTime<Utc>>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub position_qc: Option<String>,
    pub location_system: Option<String>,
    pub measurement_code: Option<i32>,
    pub satellite_name: Option<String>,
    pub juld_qc: Option<String>,
}

/// Decoded content of any staged file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RecordSet {
    Profile(ProfileRecords),
    Metadata(MetadataRecords),
    Technical { records: Vec<TechRecord> },
    Trajectory { records: Vec<TrajectoryRecord> },
}

impl RecordSet {
    pub fn validate(&self) -> Result<(), String> {
        match self {
            RecordSet::Profile(p) => p.validate(),
            RecordSet::Metadata(m) => {
                if let Some(a) = m.attributes.iter().find(|a| a.var_name.trim().is_empty()) {
                    return Err(format!("metadata attribute {:?} has no variable name", a.attr_name));
                }
                Ok(())
            },
            RecordSet::Technical { records } => {
                if records.iter().any(|r| r.param_name.trim().is_empty()) {
                    return Err("technical record without parameter name".to_string());
                }
                Ok(())
            },
            RecordSet::Trajectory { records } => records
                .iter()
                .try_for_each(|r| validate_position(r.latitude, r.longitude)),
        }
    }

    /// Number of rows this set will produce, for logs and summaries.
    pub fn row_count(&self) -> usize {
        match self {
            RecordSet::Profile(p) => 1 + p.measurements.len(),
            RecordSet::Metadata(m) => m.attributes.len(),
            RecordSet::Technical { records } => records.len(),
            RecordSet::Trajectory { records } => records.len(),
        }
    }
}

fn validate_position(latitude: Option<f64>, longitude: Option<f64>) -> Result<(), String> {
    if let Some(lat) = latitude {
        if !(-90.0..=90.0).contains(&lat) {
            return Err(format!("latitude {} out of range", lat));
        }
    }
    if let Some(lon) = longitude {
        if !(-180.0..=180.0).contains(&lon) {
            return Err(format!("longitude {} out of range", lon));
        }
    }
    Ok(())
}

/// A sibling file's records together with the file they came from.
#[derive(Debug, Clone, PartialEq)]
pub struct SourcedRecords<T> {
    pub source_file: String,
    pub records: T,
}

/// Entity-level data loaded once per run before the per-cycle fan-out.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntityRecords {
    pub metadata: Option<SourcedRecords<MetadataRecords>>,
    pub tech: Option<SourcedRecords<Vec<TechRecord>>>,
    pub trajectory: Option<SourcedRecords<Vec<TrajectoryRecord>>>,
}

impl EntityRecords {
    pub fn is_empty(&self) -> bool {
        self.metadata.is_none() && self.tech.is_none() && self.trajectory.is_none()
    }

    pub fn platform(&self) -> Option<&PlatformMetadata> {
        self.metadata.as_ref().map(|m| &m.records.platform)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_profile_validation() {
        let mut profile = ProfileRecords {
            latitude: Some(-45.0),
            longitude: Some(170.2),
            pres: vec![Some(5.0), Some(10.0)],
            temp: vec![Some(12.1), None],
            ..Default::default()
        };
        assert!(profile.validate().is_ok());

        profile.psal = vec![Some(34.5)];
        assert!(profile.validate().unwrap_err().contains("psal"));

        profile.psal.clear();
        profile.latitude = Some(91.0);
        assert!(profile.validate().unwrap_err().contains("latitude"));
    }

    #[test]
    fn test_platform_fallback_keeps_known_values() {
        let from_profile = PlatformMetadata {
            wmo_id: Some("4903220".into()),
            ..Default::default()
        };
        let from_meta = PlatformMetadata {
            wmo_id: Some("ignored".into()),
            platform_type: Some("APEX".into()),
            ..Default::default()
        };
        let merged = from_profile.or(&from_meta);
        assert_eq!(merged.wmo_id.as_deref(), Some("4903220"));
        assert_eq!(merged.platform_type.as_deref(), Some("APEX"));
        assert_eq!(merged.pi_name, None);
    }

    #[test]
    fn test_record_set_json_shape() {
        let json = r#"{"kind":"technical","records":[{"cycle":3,"param_name":"VOLTAGE","param_value":"14.2","units":"V","collected_at":null}]}"#;
        let set: RecordSet = serde_json::from_str(json).unwrap();
        assert_eq!(set.row_count(), 1);
        assert!(set.validate().is_ok());

        let profile: RecordSet =
            serde_json::from_str(r#"{"kind":"profile","latitude":10.5,"longitude":-30.0}"#).unwrap();
        match profile {
            RecordSet::Profile(p) => assert_eq!(p.latitude, Some(10.5)),
            other => panic!("unexpected {:?}", other),
        }
    }
}
