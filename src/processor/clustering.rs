//! Spatio-temporal session detection.

use crate::models::{PhotoRecord, Session};
use crate::processor::devices::DeviceMatcher;
use crate::processor::geo::{centroid, haversine_km};
use crate::processor::hours_between;
use crate::processor::inference::{InferenceIndex, effective_location};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use tracing::{debug, info};

/// A merged session may not spread further than this from its centre.
pub const MAX_MERGED_RADIUS_KM: f64 = 50.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusteringParams {
    /// Maximum hours between consecutive photos of one session.
    pub max_time_gap_hours: f64,
    /// Maximum kilometres between consecutive photos of one session.
    pub max_distance_km: f64,
    pub min_photos_per_session: usize,
    /// Inferred locations below this confidence are ignored.
    pub min_confidence: f64,
}

impl Default for ClusteringParams {
    fn default() -> Self {
        Self {
            max_time_gap_hours: 6.0,
            max_distance_km: 5.0,
            min_photos_per_session: 2,
            min_confidence: 0.3,
        }
    }
}

/// Cross-photographer merge pass settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeParams {
    pub enabled: bool,
    pub max_time_gap_hours: f64,
    pub max_distance_km: f64,
}

impl Default for MergeParams {
    fn default() -> Self {
        Self {
            enabled: false,
            max_time_gap_hours: 2.0,
            max_distance_km: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct LocatedPhoto<'a> {
    photo: &'a PhotoRecord,
    latitude: f64,
    longitude: f64,
}

/// Group each labelled photographer's located photos into sessions.
///
/// Sessions come back ordered by start time and numbered from 1.
pub fn detect_sessions(
    photos: &[PhotoRecord],
    inferences: &InferenceIndex,
    matcher: &DeviceMatcher,
    params: &ClusteringParams,
) -> Vec<Session> {
    let mut located: Vec<LocatedPhoto> = photos
        .iter()
        .filter_map(|photo| {
            let location = effective_location(photo, inferences)?;
            (location.confidence >= params.min_confidence).then_some(LocatedPhoto {
                photo,
                latitude: location.latitude,
                longitude: location.longitude,
            })
        })
        .collect();
    located.sort_by_key(|located| located.photo.taken_at);

    info!(located = located.len(), "photos with usable locations");

    let mut by_photographer: BTreeMap<&str, Vec<LocatedPhoto>> = BTreeMap::new();
    for item in located {
        if let Some(photographer) = matcher.photographer_for(item.photo) {
            by_photographer.entry(photographer).or_default().push(item);
        }
    }

    let partitions: Vec<(&str, Vec<LocatedPhoto>)> = by_photographer.into_iter().collect();
    let mut sessions: Vec<Session> = partitions
        .par_iter()
        .flat_map_iter(|(photographer, photos)| {
            let sessions = cluster_photographer(photos, photographer, params);
            debug!(
                photographer,
                photos = photos.len(),
                sessions = sessions.len(),
                "clustered photographer"
            );
            sessions
        })
        .collect();

    sort_and_number(&mut sessions);
    info!(sessions = sessions.len(), "session detection complete");
    sessions
}

fn sort_and_number(sessions: &mut [Session]) {
    sessions.sort_by(|a, b| {
        a.start_time
            .cmp(&b.start_time)
            .then_with(|| a.photographer.cmp(&b.photographer))
    });
    for (index, session) in sessions.iter_mut().enumerate() {
        session.id = index as u64 + 1;
    }
}

/// Single greedy pass over one photographer's time-sorted photos.
fn cluster_photographer(
    photos: &[LocatedPhoto],
    photographer: &str,
    params: &ClusteringParams,
) -> Vec<Session> {
    let Some(first) = photos.first() else {
        return Vec::new();
    };

    let mut sessions = Vec::new();
    let mut current = vec![*first];

    for pair in photos.windows(2) {
        let (prev, curr) = (&pair[0], &pair[1]);
        let gap_hours = hours_between(prev.photo.taken_at, curr.photo.taken_at);
        let distance = haversine_km(prev.latitude, prev.longitude, curr.latitude, curr.longitude);

        if gap_hours <= params.max_time_gap_hours && distance <= params.max_distance_km {
            current.push(*curr);
            continue;
        }

        if current.len() >= params.min_photos_per_session {
            sessions.push(build_session(&current, photographer));
        }
        current = vec![*curr];
    }

    if current.len() >= params.min_photos_per_session {
        sessions.push(build_session(&current, photographer));
    }

    sessions
}

fn build_session(members: &[LocatedPhoto], photographer: &str) -> Session {
    let (center_lat, center_lon) = centroid(members.iter().map(|m| (m.latitude, m.longitude)))
        .unwrap_or_default();
    let radius_km = members
        .iter()
        .map(|m| haversine_km(center_lat, center_lon, m.latitude, m.longitude))
        .fold(0.0, f64::max);

    Session {
        id: 0,
        start_time: members[0].photo.taken_at,
        end_time: members[members.len() - 1].photo.taken_at,
        photo_ids: members.iter().map(|m| m.photo.id.clone()).collect(),
        center_lat,
        center_lon,
        radius_km,
        photographer: photographer.to_string(),
    }
}

/// Greedily merge overlapping sessions from different photographers.
pub fn merge_sessions(mut sessions: Vec<Session>, params: &MergeParams) -> Vec<Session> {
    if sessions.len() <= 1 {
        return sessions;
    }
    sessions.sort_by_key(|session| session.start_time);

    let before = sessions.len();
    let mut merged = Vec::new();
    let mut iter = sessions.into_iter();
    let mut group: Vec<Session> = iter.next().into_iter().collect();

    for session in iter {
        // Groups are time-sorted: too far past the earliest member means no match.
        let gap_from_earliest = hours_between(group[0].end_time, session.start_time);
        let can_merge = gap_from_earliest <= params.max_time_gap_hours
            && group.iter().any(|member| {
                let gap = hours_between(member.end_time, session.start_time);
                let distance = haversine_km(
                    member.center_lat,
                    member.center_lon,
                    session.center_lat,
                    session.center_lon,
                );
                gap <= params.max_time_gap_hours && distance <= params.max_distance_km
            })
            && merged_radius_km(&group, Some(&session)) <= MAX_MERGED_RADIUS_KM;

        if can_merge {
            group.push(session);
        } else {
            merged.push(combine_group(std::mem::take(&mut group)));
            group.push(session);
        }
    }
    if !group.is_empty() {
        merged.push(combine_group(group));
    }

    sort_and_number(&mut merged);
    info!(before, after = merged.len(), "merged sessions across photographers");
    merged
}

/// Distance from the mean centre to the far edge of the farthest member.
fn merged_radius_km(group: &[Session], candidate: Option<&Session>) -> f64 {
    let members = || group.iter().chain(candidate);
    let Some((center_lat, center_lon)) =
        centroid(members().map(|s| (s.center_lat, s.center_lon)))
    else {
        return 0.0;
    };
    members()
        .map(|s| haversine_km(center_lat, center_lon, s.center_lat, s.center_lon) + s.radius_km)
        .fold(0.0, f64::max)
}

fn combine_group(mut group: Vec<Session>) -> Session {
    if group.len() == 1 {
        return group.remove(0);
    }

    let start_time = group.iter().map(|s| s.start_time).min().unwrap_or_default();
    let end_time = group.iter().map(|s| s.end_time).max().unwrap_or_default();

    let mut seen = HashSet::new();
    let photo_ids: Vec<String> = group
        .iter()
        .flat_map(|s| s.photo_ids.iter())
        .filter(|id| seen.insert(id.as_str()))
        .cloned()
        .collect();

    let photographers: BTreeSet<&str> = group
        .iter()
        .flat_map(|s| s.photographer.split(", "))
        .collect();

    let (center_lat, center_lon) =
        centroid(group.iter().map(|s| (s.center_lat, s.center_lon))).unwrap_or_default();
    let radius_km = merged_radius_km(&group, None);

    Session {
        id: 0,
        start_time,
        end_time,
        photo_ids,
        center_lat,
        center_lon,
        radius_km,
        photographer: photographers.into_iter().collect::<Vec<_>>().join(", "),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Device, LocationInference, LocationSource};
    use crate::processor::devices::CounterRanges;
    use chrono::{Duration, NaiveDate, NaiveDateTime};

    fn base_time() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 5, 10)
            .unwrap()
            .and_hms_opt(9, 0, 0)
            .unwrap()
    }

    fn photo(id: &str, make: &str, minutes: i64, gps: Option<(f64, f64)>) -> PhotoRecord {
        PhotoRecord {
            id: id.to_string(),
            taken_at: base_time() + Duration::minutes(minutes),
            latitude: gps.map(|(lat, _)| lat),
            longitude: gps.map(|(_, lon)| lon),
            make: make.to_string(),
            model: "Cam".to_string(),
            original_file_name: format!("{id}.jpg"),
            city: None,
            state: None,
            country: None,
        }
    }

    fn devices() -> Vec<Device> {
        ["alice", "bob"]
            .into_iter()
            .map(|name| Device {
                id: format!("{name}-cam"),
                make: name.to_string(),
                model: "Cam".to_string(),
                photo_count: 0,
                photographer: Some(name.to_uppercase()),
            })
            .chain(std::iter::once(Device {
                id: "stray-cam".to_string(),
                make: "stray".to_string(),
                model: "Cam".to_string(),
                photo_count: 0,
                photographer: None,
            }))
            .collect()
    }

    fn detect(
        photos: &[PhotoRecord],
        inferences: &[LocationInference],
        params: &ClusteringParams,
    ) -> Vec<Session> {
        let devices = devices();
        let ranges = CounterRanges::default();
        let matcher = DeviceMatcher::new(&devices, &ranges);
        let index = InferenceIndex::new(inferences);
        detect_sessions(photos, &index, &matcher, params)
    }

    #[test]
    fn test_time_gap_splits_sessions() {
        let photos = vec![
            photo("a1", "alice", 0, Some((45.0, 7.0))),
            photo("a2", "alice", 30, Some((45.001, 7.0))),
            photo("a3", "alice", 60, Some((45.0, 7.001))),
            photo("a4", "alice", 60 * 11, Some((45.0, 7.0))),
            photo("a5", "alice", 60 * 12, Some((45.0, 7.0))),
        ];
        let sessions = detect(&photos, &[], &ClusteringParams::default());

        assert_eq!(sessions.len(), 2);
        assert_eq!(sessions[0].photo_ids, vec!["a1", "a2", "a3"]);
        assert_eq!(sessions[1].photo_ids, vec!["a4", "a5"]);
        assert_eq!(sessions[0].id, 1);
        assert_eq!(sessions[1].id, 2);
        assert_eq!(sessions[0].photographer, "ALICE");
        assert_eq!(sessions[0].end_time, base_time() + Duration::minutes(60));
    }

    #[test]
    fn test_distance_splits_and_min_photos_drops_singletons() {
        let photos = vec![
            photo("a1", "alice", 0, Some((45.0, 7.0))),
            photo("a2", "alice", 60, Some((46.0, 7.0))),
            photo("a3", "alice", 90, Some((46.0, 7.001))),
        ];
        let sessions = detect(&photos, &[], &ClusteringParams::default());
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].photo_ids, vec!["a2", "a3"]);
    }

    #[test]
    fn test_centroid_and_radius() {
        let photos = vec![
            photo("a1", "alice", 0, Some((0.0, 0.0))),
            photo("a2", "alice", 10, Some((0.0, 0.02))),
        ];
        let sessions = detect(&photos, &[], &ClusteringParams::default());
        let session = &sessions[0];
        assert!((session.center_lat - 0.0).abs() < 1e-12);
        assert!((session.center_lon - 0.01).abs() < 1e-12);
        let expected = haversine_km(0.0, 0.01, 0.0, 0.02);
        assert!((session.radius_km - expected).abs() < 1e-9);
    }

    #[test]
    fn test_photographers_are_clustered_separately() {
        let photos = vec![
            photo("a1", "alice", 0, Some((45.0, 7.0))),
            photo("b1", "bob", 5, Some((45.0, 7.0))),
            photo("a2", "alice", 10, Some((45.0, 7.0))),
            photo("b2", "bob", 15, Some((45.0, 7.0))),
            photo("s1", "stray", 16, Some((45.0, 7.0))),
            photo("s2", "stray", 17, Some((45.0, 7.0))),
        ];
        let sessions = detect(&photos, &[], &ClusteringParams::default());
        assert_eq!(sessions.len(), 2);
        assert_eq!(sessions[0].photographer, "ALICE");
        assert_eq!(sessions[0].photo_ids, vec!["a1", "a2"]);
        assert_eq!(sessions[1].photographer, "BOB");
        assert_eq!(sessions[1].photo_ids, vec!["b1", "b2"]);
    }

    #[test]
    fn test_low_confidence_inferences_are_excluded() {
        let photos = vec![
            photo("a1", "alice", 0, Some((45.0, 7.0))),
            photo("a2", "alice", 10, None),
            photo("a3", "alice", 20, None),
        ];
        let inference = |id: &str, confidence| LocationInference {
            photo_id: id.to_string(),
            latitude: 45.0,
            longitude: 7.0,
            confidence,
            source: LocationSource::Nearby,
            method: String::new(),
        };
        let inferences = vec![inference("a2", 0.9), inference("a3", 0.15)];
        let sessions = detect(&photos, &inferences, &ClusteringParams::default());
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].photo_ids, vec!["a1", "a2"]);
    }

    #[test]
    fn test_adjacent_members_respect_thresholds() {
        let params = ClusteringParams::default();
        let photos: Vec<PhotoRecord> = (0..60)
            .map(|i| {
                let minutes = i * 97 % 1440 + i * 300;
                let lat = 40.0 + (i % 7) as f64 * 0.02;
                photo(&format!("a{i}"), "alice", minutes, Some((lat, 3.0)))
            })
            .collect();
        let by_id: BTreeMap<&str, &PhotoRecord> =
            photos.iter().map(|p| (p.id.as_str(), p)).collect();

        for session in detect(&photos, &[], &params) {
            assert!(session.photo_ids.len() >= params.min_photos_per_session);
            for pair in session.photo_ids.windows(2) {
                let (a, b) = (by_id[pair[0].as_str()], by_id[pair[1].as_str()]);
                let gap = hours_between(a.taken_at, b.taken_at);
                let (a_lat, a_lon) = a.gps().unwrap();
                let (b_lat, b_lon) = b.gps().unwrap();
                assert!(gap >= 0.0 && gap <= params.max_time_gap_hours);
                assert!(haversine_km(a_lat, a_lon, b_lat, b_lon) <= params.max_distance_km);
            }
        }
    }

    fn session(photographer: &str, start_minutes: i64, end_minutes: i64, at: (f64, f64), ids: &[&str]) -> Session {
        Session {
            id: 0,
            start_time: base_time() + Duration::minutes(start_minutes),
            end_time: base_time() + Duration::minutes(end_minutes),
            photo_ids: ids.iter().map(|id| id.to_string()).collect(),
            center_lat: at.0,
            center_lon: at.1,
            radius_km: 0.2,
            photographer: photographer.to_string(),
        }
    }

    #[test]
    fn test_merge_overlapping_sessions() {
        let sessions = vec![
            session("BOB", 30, 120, (45.0, 7.0), &["b1", "shared"]),
            session("ALICE", 0, 90, (45.001, 7.0), &["a1", "shared"]),
            session("ALICE", 60 * 24, 60 * 25, (45.0, 7.0), &["a2"]),
        ];
        let merged = merge_sessions(sessions, &MergeParams::default());

        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].photographer, "ALICE, BOB");
        assert_eq!(merged[0].photo_ids, vec!["a1", "shared", "b1"]);
        assert_eq!(merged[0].start_time, base_time());
        assert_eq!(merged[0].end_time, base_time() + Duration::minutes(120));
        assert_eq!((merged[0].id, merged[1].id), (1, 2));
        assert_eq!(merged[1].photo_ids, vec!["a2"]);
    }

    #[test]
    fn test_merge_rejects_distant_sessions() {
        let sessions = vec![
            session("ALICE", 0, 60, (45.0, 7.0), &["a1"]),
            session("BOB", 10, 60, (45.1, 7.0), &["b1"]),
        ];
        let merged = merge_sessions(sessions, &MergeParams::default());
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn test_merge_radius_cap() {
        let mut wide_a = session("ALICE", 0, 60, (45.0, 7.0), &["a1"]);
        let mut wide_b = session("BOB", 10, 60, (45.27, 7.0), &["b1"]);
        wide_a.radius_km = 40.0;
        wide_b.radius_km = 40.0;
        let params = MergeParams {
            enabled: true,
            max_time_gap_hours: 2.0,
            max_distance_km: 100.0,
        };
        let merged = merge_sessions(vec![wide_a, wide_b], &params);
        assert_eq!(merged.len(), 2);
    }
}
