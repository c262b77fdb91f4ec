//! Coverage analysis: how the library's geotagged photos end up categorised.

use crate::models::{HomeLocation, PhotoRecord, Session, Trip};
use crate::processor::geo::haversine_km;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CoverageReport {
    pub total_photos: usize,
    pub with_gps: usize,
    pub without_gps: usize,
    /// `None` when no home locations are defined.
    pub at_home: Option<usize>,
    pub in_trips: usize,
    pub in_sessions_not_trips: usize,
    /// Subset of `in_sessions_not_trips`; `None` without homes.
    pub away_not_in_trips: Option<usize>,
    pub not_in_sessions: usize,
    pub sessions: usize,
    pub trips: usize,
    pub homes: usize,
}

impl CoverageReport {
    /// Share of geotagged photos, in percent.
    pub fn percent_of_located(&self, count: usize) -> f64 {
        percent(count, self.with_gps)
    }

    pub fn percent_of_total(&self, count: usize) -> f64 {
        percent(count, self.total_photos)
    }
}

fn percent(count: usize, of: usize) -> f64 {
    if of == 0 {
        0.0
    } else {
        count as f64 * 100.0 / of as f64
    }
}

fn within_any_home(lat: f64, lon: f64, homes: &[HomeLocation]) -> bool {
    homes
        .iter()
        .any(|home| haversine_km(lat, lon, home.latitude, home.longitude) <= home.radius_km)
}

/// Categorise photos by their own GPS position. Photos without GPS only count
/// towards `without_gps`.
pub fn analyze_coverage(
    photos: &[PhotoRecord],
    sessions: &[Session],
    trips: &[Trip],
    homes: &[HomeLocation],
) -> CoverageReport {
    let in_sessions: HashSet<&str> = sessions
        .iter()
        .flat_map(|s| s.photo_ids.iter().map(String::as_str))
        .collect();
    let in_trips: HashSet<&str> = trips
        .iter()
        .flat_map(|t| t.photo_ids.iter().map(String::as_str))
        .collect();

    let mut report = CoverageReport {
        total_photos: photos.len(),
        sessions: sessions.len(),
        trips: trips.len(),
        homes: homes.len(),
        ..CoverageReport::default()
    };
    let mut at_home = 0;
    let mut away_not_in_trips = 0;

    for photo in photos {
        let Some((lat, lon)) = photo.gps() else {
            report.without_gps += 1;
            continue;
        };
        report.with_gps += 1;

        let home = within_any_home(lat, lon, homes);
        if home {
            at_home += 1;
        }

        if in_trips.contains(photo.id.as_str()) {
            report.in_trips += 1;
        } else if in_sessions.contains(photo.id.as_str()) {
            report.in_sessions_not_trips += 1;
            if !home {
                away_not_in_trips += 1;
            }
        } else {
            report.not_in_sessions += 1;
        }
    }

    if !homes.is_empty() {
        report.at_home = Some(at_home);
        report.away_not_in_trips = Some(away_not_in_trips);
    }
    report
}
