//! Location inference for photos without GPS tags.
//!
//! A photographer's GPS-less camera is usually carried alongside their phone.
//! The phone's geotagged photos, taken close in time, locate the camera's shots.

use crate::models::{LocationInference, LocationSource, PhotoRecord};
use crate::processor::devices::DeviceMatcher;
use crate::processor::hours_between;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info};

/// Confidence multiplier applied to interpolated positions.
pub const INTERPOLATION_PENALTY: f64 = 0.9;
/// Inferences at or below this confidence are discarded.
pub const MIN_CONFIDENCE_FLOOR: f64 = 0.1;

/// Confidence for a location borrowed from a photo `hours` away in time.
pub fn time_decay_confidence(hours: f64) -> f64 {
    match hours {
        h if h < 1.0 => 1.0,
        h if h < 6.0 => 0.9,
        h if h < 24.0 => 0.7,
        h if h < 72.0 => 0.5,
        h if h < 168.0 => 0.3,
        h if h < 336.0 => 0.15,
        _ => 0.1,
    }
}

#[derive(Debug, Clone, Copy)]
struct GpsPoint {
    taken_at: NaiveDateTime,
    latitude: f64,
    longitude: f64,
}

/// Infer locations for every GPS-less photo whose device is labelled.
///
/// Output is a fresh, complete inference set; callers replace any previous set.
pub fn infer_locations(photos: &[PhotoRecord], matcher: &DeviceMatcher) -> Vec<LocationInference> {
    let (mut with_gps, mut without_gps): (Vec<&PhotoRecord>, Vec<&PhotoRecord>) =
        photos.iter().partition(|photo| photo.gps().is_some());
    with_gps.sort_by_key(|photo| photo.taken_at);
    without_gps.sort_by_key(|photo| photo.taken_at);

    info!(
        with_gps = with_gps.len(),
        without_gps = without_gps.len(),
        "partitioned photos by GPS presence"
    );

    let mut gps_by_photographer: BTreeMap<&str, Vec<GpsPoint>> = BTreeMap::new();
    for photo in &with_gps {
        let (Some(photographer), Some((latitude, longitude))) =
            (matcher.photographer_for(photo), photo.gps())
        else {
            continue;
        };
        gps_by_photographer
            .entry(photographer)
            .or_default()
            .push(GpsPoint {
                taken_at: photo.taken_at,
                latitude,
                longitude,
            });
    }
    debug!(
        photographers = gps_by_photographer.len(),
        "grouped GPS photos by photographer"
    );

    let inferences: Vec<LocationInference> = without_gps
        .iter()
        .filter_map(|photo| {
            let photographer = matcher.photographer_for(photo)?;
            let points = gps_by_photographer.get(photographer)?;
            infer_single(photo, points)
        })
        .collect();

    info!(inferred = inferences.len(), "location inference complete");
    inferences
}

fn infer_single(target: &PhotoRecord, points: &[GpsPoint]) -> Option<LocationInference> {
    let insertion = points.partition_point(|point| point.taken_at < target.taken_at);

    if let Some(nearest) = nearest_in_time(points, insertion, target.taken_at) {
        let hours = hours_between(nearest.taken_at, target.taken_at).abs();
        let confidence = time_decay_confidence(hours);
        if confidence > MIN_CONFIDENCE_FLOOR {
            return Some(LocationInference {
                photo_id: target.id.clone(),
                latitude: nearest.latitude,
                longitude: nearest.longitude,
                confidence,
                source: LocationSource::Nearby,
                method: format!("nearest photo {hours:.1} hours away"),
            });
        }
    }

    interpolate(target, points, insertion)
}

/// Closest point on either side of the insertion index. Equidistant neighbours
/// give no single answer and leave the decision to interpolation.
fn nearest_in_time(
    points: &[GpsPoint],
    insertion: usize,
    target: NaiveDateTime,
) -> Option<&GpsPoint> {
    let before = insertion.checked_sub(1).map(|i| &points[i]);
    let after = points.get(insertion);

    match (before, after) {
        (Some(before), Some(after)) => {
            let to_before = (target - before.taken_at).abs();
            let to_after = (after.taken_at - target).abs();
            if to_before < to_after {
                Some(before)
            } else if to_after < to_before {
                Some(after)
            } else {
                None
            }
        }
        (Some(only), None) | (None, Some(only)) => Some(only),
        (None, None) => None,
    }
}

fn interpolate(
    target: &PhotoRecord,
    points: &[GpsPoint],
    insertion: usize,
) -> Option<LocationInference> {
    if insertion == 0 || insertion >= points.len() {
        return None;
    }
    let before = &points[insertion - 1];
    let after = &points[insertion];

    let total_hours = hours_between(before.taken_at, after.taken_at);
    if total_hours == 0.0 {
        return None;
    }

    let hours_before = hours_between(before.taken_at, target.taken_at);
    let hours_after = hours_between(target.taken_at, after.taken_at);
    let weight = hours_before / total_hours;

    let latitude = before.latitude + (after.latitude - before.latitude) * weight;
    let longitude = before.longitude + (after.longitude - before.longitude) * weight;

    let confidence =
        time_decay_confidence(hours_before.max(hours_after)) * INTERPOLATION_PENALTY;
    if confidence < MIN_CONFIDENCE_FLOOR {
        return None;
    }

    Some(LocationInference {
        photo_id: target.id.clone(),
        latitude,
        longitude,
        confidence,
        source: LocationSource::Interpolated,
        method: format!(
            "interpolated between photos {hours_before:.1}h before and {hours_after:.1}h after"
        ),
    })
}

/// Best available position for a photo.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EffectiveLocation {
    pub latitude: f64,
    pub longitude: f64,
    pub confidence: f64,
    pub source: LocationSource,
}

/// Photo id → stored inference.
pub struct InferenceIndex<'a>(HashMap<&'a str, &'a LocationInference>);

impl<'a> InferenceIndex<'a> {
    pub fn new(inferences: &'a [LocationInference]) -> Self {
        Self(
            inferences
                .iter()
                .map(|inference| (inference.photo_id.as_str(), inference))
                .collect(),
        )
    }

    pub fn get(&self, photo_id: &str) -> Option<&'a LocationInference> {
        self.0.get(photo_id).copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Own GPS first (confidence 1.0), then a stored inference, else nothing.
pub fn effective_location(
    photo: &PhotoRecord,
    inferences: &InferenceIndex,
) -> Option<EffectiveLocation> {
    if let Some((latitude, longitude)) = photo.gps() {
        return Some(EffectiveLocation {
            latitude,
            longitude,
            confidence: 1.0,
            source: LocationSource::Gps,
        });
    }

    inferences.get(&photo.id).map(|inference| EffectiveLocation {
        latitude: inference.latitude,
        longitude: inference.longitude,
        confidence: inference.confidence,
        source: inference.source,
    })
}

/// Inference counts per confidence band, for reporting.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfidenceDistribution {
    pub very_high: usize,
    pub high: usize,
    pub good: usize,
    pub moderate: usize,
    pub low: usize,
}

impl ConfidenceDistribution {
    pub fn from_inferences(inferences: &[LocationInference]) -> Self {
        let mut distribution = Self::default();
        for inference in inferences {
            match inference.confidence {
                c if c >= 0.9 => distribution.very_high += 1,
                c if c >= 0.7 => distribution.high += 1,
                c if c >= 0.5 => distribution.good += 1,
                c if c >= 0.3 => distribution.moderate += 1,
                _ => distribution.low += 1,
            }
        }
        distribution
    }

    /// Non-empty bands as (label, count), highest band first.
    pub fn bands(&self) -> Vec<(&'static str, usize)> {
        [
            ("Very High (0.9-1.0)", self.very_high),
            ("High (0.7-0.9)", self.high),
            ("Good (0.5-0.7)", self.good),
            ("Moderate (0.3-0.5)", self.moderate),
            ("Low (0.1-0.3)", self.low),
        ]
        .into_iter()
        .filter(|(_, count)| *count > 0)
        .collect()
    }
}
