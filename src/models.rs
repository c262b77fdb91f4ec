use chrono::{Datelike, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// Earliest and latest capture years accepted from a photo source.
pub const MIN_PLAUSIBLE_YEAR: i32 = 1900;
pub const MAX_PLAUSIBLE_YEAR: i32 = 2100;

/// A photo as delivered by the photo source. Never mutated by the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhotoRecord {
    pub id: String,
    /// Local capture time (no timezone).
    pub taken_at: NaiveDateTime,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
    #[serde(default)]
    pub make: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub original_file_name: String,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
}

impl PhotoRecord {
    /// Own GPS position, when both coordinates are present.
    pub fn gps(&self) -> Option<(f64, f64)> {
        match (self.latitude, self.longitude) {
            (Some(lat), Some(lon)) => Some((lat, lon)),
            _ => None,
        }
    }

    pub fn has_device_info(&self) -> bool {
        !self.make.trim().is_empty() || !self.model.trim().is_empty()
    }

    /// Zero timestamps and years outside [1900, 2100] are treated as corrupt.
    pub fn has_plausible_timestamp(&self) -> bool {
        let year = self.taken_at.year();
        self.taken_at.and_utc().timestamp() != 0
            && (MIN_PLAUSIBLE_YEAR..=MAX_PLAUSIBLE_YEAR).contains(&year)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub id: String,
    pub make: String,
    pub model: String,
    pub photo_count: usize,
    #[serde(default)]
    pub photographer: Option<String>,
}

impl Device {
    /// Label of the device, ignoring blank labels.
    pub fn photographer(&self) -> Option<&str> {
        self.photographer
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
    }
}

/// Where an effective location came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LocationSource {
    /// The photo's own GPS tags.
    Gps,
    /// Copied from the photographer's closest GPS photo in time.
    Nearby,
    /// Interpolated between two bracketing GPS photos.
    Interpolated,
}

impl std::fmt::Display for LocationSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            LocationSource::Gps => "gps",
            LocationSource::Nearby => "nearby",
            LocationSource::Interpolated => "interpolated",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationInference {
    pub photo_id: String,
    pub latitude: f64,
    pub longitude: f64,
    /// In [0, 1].
    pub confidence: f64,
    pub source: LocationSource,
    pub method: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: u64,
    pub start_time: NaiveDateTime,
    pub end_time: NaiveDateTime,
    pub photo_ids: Vec<String>,
    pub center_lat: f64,
    pub center_lon: f64,
    /// Kilometres from the centroid to the farthest member.
    pub radius_km: f64,
    pub photographer: String,
}

/// Why the segmenter closed a trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TripEnd {
    ForcedSplit,
    SessionGap,
    HomeStay,
    EndOfInput,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trip {
    pub id: u64,
    pub name: String,
    pub start_time: NaiveDateTime,
    pub end_time: NaiveDateTime,
    pub sessions: Vec<Session>,
    pub photo_ids: Vec<String>,
    pub photographers: Vec<String>,
    /// Distance from the first session to the nearest home; absent without homes.
    pub home_distance_km: Option<f64>,
    pub total_distance_km: f64,
    pub center_lat: f64,
    pub center_lon: f64,
    pub ended_by: TripEnd,
    #[serde(default)]
    pub excluded: bool,
    #[serde(default)]
    pub album_id: Option<String>,
    /// Set when the user renamed the trip; survives regeneration.
    #[serde(default)]
    pub custom_name: bool,
}

impl Trip {
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn duration(&self) -> chrono::Duration {
        self.end_time - self.start_time
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HomeLocation {
    pub id: u64,
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    pub radius_km: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn record_at(year: i32) -> PhotoRecord {
        PhotoRecord {
            id: "p1".to_string(),
            taken_at: NaiveDate::from_ymd_opt(year, 6, 1)
                .unwrap()
                .and_hms_opt(12, 0, 0)
                .unwrap(),
            latitude: Some(1.0),
            longitude: None,
            make: "  ".to_string(),
            model: String::new(),
            original_file_name: "IMG_0001.JPG".to_string(),
            city: None,
            state: None,
            country: None,
        }
    }

    #[test]
    fn test_gps_requires_both_coordinates() {
        let mut record = record_at(2020);
        assert_eq!(record.gps(), None);
        record.longitude = Some(2.0);
        assert_eq!(record.gps(), Some((1.0, 2.0)));
    }

    #[test]
    fn test_plausible_timestamp_bounds() {
        assert!(record_at(2020).has_plausible_timestamp());
        assert!(record_at(1900).has_plausible_timestamp());
        assert!(!record_at(1899).has_plausible_timestamp());
        assert!(!record_at(2101).has_plausible_timestamp());

        let mut epoch = record_at(2020);
        epoch.taken_at = chrono::DateTime::from_timestamp(0, 0).unwrap().naive_utc();
        assert!(!epoch.has_plausible_timestamp());
    }

    #[test]
    fn test_blank_make_model_has_no_device_info() {
        assert!(!record_at(2020).has_device_info());
    }

    #[test]
    fn test_blank_photographer_label_is_unlabeled() {
        let device = Device {
            id: "apple-iphone 13".to_string(),
            make: "Apple".to_string(),
            model: "iPhone 13".to_string(),
            photo_count: 3,
            photographer: Some("   ".to_string()),
        };
        assert_eq!(device.photographer(), None);
    }

    #[test]
    fn test_location_source_serializes_lowercase() {
        let json = serde_json::to_string(&LocationSource::Interpolated).unwrap();
        assert_eq!(json, "\"interpolated\"");
    }
}
