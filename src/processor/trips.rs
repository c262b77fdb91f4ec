//! Trip segmentation: a small state machine over time-sorted sessions.
//!
//! Sessions near a home location never start a trip. Once a trip is open it
//! stays open through short returns home and closes on a forced split date, on
//! a long gap between sessions, or after staying home too long.

use crate::models::{HomeLocation, PhotoRecord, Session, Trip, TripEnd};
use crate::processor::geo::{centroid, haversine_km};
use crate::processor::hours_between;
use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TripCriteria {
    /// Sessions closer than this to a home are "at home".
    pub min_distance_from_home_km: f64,
    /// Longest gap between consecutive away sessions of one trip.
    pub max_session_gap_hours: f64,
    pub min_duration_hours: f64,
    pub min_sessions: usize,
    /// Longest stay at home that still counts as a brief return.
    pub max_home_stay_hours: f64,
    /// Trips never span midnight at the start of these dates.
    pub split_dates: Vec<NaiveDate>,
}

impl Default for TripCriteria {
    fn default() -> Self {
        Self {
            min_distance_from_home_km: 50.0,
            max_session_gap_hours: 48.0,
            min_duration_hours: 2.0,
            min_sessions: 1,
            max_home_stay_hours: 36.0,
            split_dates: Vec::new(),
        }
    }
}

impl TripCriteria {
    /// First split date whose midnight lies in `(previous_end, next_start)`,
    /// counting a previous end exactly at midnight as before the split.
    fn forced_split_between(
        &self,
        previous_end: NaiveDateTime,
        next_start: NaiveDateTime,
    ) -> Option<NaiveDate> {
        self.split_dates.iter().copied().find(|date| {
            let boundary = date.and_time(NaiveTime::MIN);
            previous_end <= boundary && next_start > boundary
        })
    }
}

/// Distance to the closest home, or `None` without homes.
pub fn nearest_home_distance_km(lat: f64, lon: f64, homes: &[HomeLocation]) -> Option<f64> {
    homes
        .iter()
        .map(|home| haversine_km(lat, lon, home.latitude, home.longitude))
        .min_by(f64::total_cmp)
}

enum State {
    Idle,
    Open {
        sessions: Vec<Session>,
        pending_home_return: Option<NaiveDateTime>,
    },
}

impl State {
    fn open(session: Session) -> Self {
        State::Open {
            sessions: vec![session],
            pending_home_return: None,
        }
    }
}

struct TripBuilder<'a> {
    criteria: &'a TripCriteria,
    homes: &'a [HomeLocation],
    photos: HashMap<&'a str, &'a PhotoRecord>,
    trips: Vec<Trip>,
}

impl TripBuilder<'_> {
    fn finalize(&mut self, sessions: Vec<Session>, ended_by: TripEnd) {
        if sessions.len() < self.criteria.min_sessions {
            debug!(sessions = sessions.len(), "dropping trip below minimum sessions");
            return;
        }
        let trip = self.build(sessions, ended_by);
        let hours = hours_between(trip.start_time, trip.end_time);
        if hours < self.criteria.min_duration_hours {
            debug!(name = %trip.name, hours, "dropping trip below minimum duration");
            return;
        }
        info!(name = %trip.name, ?ended_by, "trip closed");
        self.trips.push(trip);
    }

    fn build(&self, sessions: Vec<Session>, ended_by: TripEnd) -> Trip {
        let start_time = sessions[0].start_time;
        let end_time = sessions
            .iter()
            .map(|s| s.end_time)
            .max()
            .unwrap_or(start_time);

        let (center_lat, center_lon) =
            centroid(sessions.iter().map(|s| (s.center_lat, s.center_lon))).unwrap_or_default();
        let home_distance_km =
            nearest_home_distance_km(sessions[0].center_lat, sessions[0].center_lon, self.homes);
        let total_distance_km = sessions
            .windows(2)
            .map(|pair| {
                haversine_km(
                    pair[0].center_lat,
                    pair[0].center_lon,
                    pair[1].center_lat,
                    pair[1].center_lon,
                )
            })
            .sum();

        let photo_ids: Vec<String> = sessions
            .iter()
            .flat_map(|s| s.photo_ids.iter().cloned())
            .collect();
        let photographers: Vec<String> = sessions
            .iter()
            .flat_map(|s| s.photographer.split(", "))
            .filter(|name| !name.is_empty())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .map(str::to_string)
            .collect();

        let place = dominant_place(&photo_ids, &self.photos);
        let name = trip_name(place.as_deref(), start_time.date(), end_time.date());

        Trip {
            id: 0,
            name,
            start_time,
            end_time,
            sessions,
            photo_ids,
            photographers,
            home_distance_km,
            total_distance_km,
            center_lat,
            center_lon,
            ended_by,
            excluded: false,
            album_id: None,
            custom_name: false,
        }
    }
}

/// Segment sessions into trips. Trips come back in start order, numbered from 1.
pub fn detect_trips(
    sessions: &[Session],
    homes: &[HomeLocation],
    criteria: &TripCriteria,
    photos: &[PhotoRecord],
) -> Vec<Trip> {
    if sessions.is_empty() {
        info!("no sessions to analyse");
        return Vec::new();
    }

    let mut sorted = sessions.to_vec();
    sorted.sort_by_key(|session| session.start_time);

    let classified: Vec<(Session, bool)> = sorted
        .into_iter()
        .map(|session| {
            let at_home =
                nearest_home_distance_km(session.center_lat, session.center_lon, homes)
                    .is_some_and(|distance| distance < criteria.min_distance_from_home_km);
            (session, at_home)
        })
        .collect();

    let away = classified.iter().filter(|(_, at_home)| !at_home).count();
    info!(
        away,
        at_home = classified.len() - away,
        min_distance_km = criteria.min_distance_from_home_km,
        "classified sessions"
    );
    if away == 0 {
        warn!("no sessions away from home");
        return Vec::new();
    }

    let mut builder = TripBuilder {
        criteria,
        homes,
        photos: photos.iter().map(|p| (p.id.as_str(), p)).collect(),
        trips: Vec::new(),
    };
    let mut state = State::Idle;

    for (session, at_home) in classified {
        state = match state {
            State::Idle if at_home => State::Idle,
            State::Idle => State::open(session),
            State::Open {
                mut sessions,
                pending_home_return,
            } => {
                let last_end = sessions
                    .last()
                    .map(|s| s.end_time)
                    .unwrap_or(session.start_time);

                if let Some(date) = criteria.forced_split_between(last_end, session.start_time) {
                    debug!(%date, "forced split");
                    builder.finalize(sessions, TripEnd::ForcedSplit);
                    State::open(session)
                } else if at_home {
                    State::Open {
                        sessions,
                        pending_home_return: pending_home_return.or(Some(session.start_time)),
                    }
                } else if let Some(returned_home) = pending_home_return {
                    let stay_hours = hours_between(returned_home, session.start_time);
                    if stay_hours > criteria.max_home_stay_hours {
                        debug!(stay_hours, "home stay ends trip");
                        builder.finalize(sessions, TripEnd::HomeStay);
                        State::open(session)
                    } else {
                        sessions.push(session);
                        State::Open {
                            sessions,
                            pending_home_return: None,
                        }
                    }
                } else {
                    let gap_hours = hours_between(last_end, session.start_time);
                    if gap_hours <= criteria.max_session_gap_hours {
                        sessions.push(session);
                        State::Open {
                            sessions,
                            pending_home_return: None,
                        }
                    } else {
                        debug!(gap_hours, "session gap ends trip");
                        builder.finalize(sessions, TripEnd::SessionGap);
                        State::open(session)
                    }
                }
            }
        };
    }

    if let State::Open { sessions, .. } = state {
        builder.finalize(sessions, TripEnd::EndOfInput);
    }

    let mut trips = builder.trips;
    for (index, trip) in trips.iter_mut().enumerate() {
        trip.id = index as u64 + 1;
    }
    info!(trips = trips.len(), "trip detection complete");
    trips
}

/// Most frequent value; ties go to the alphabetically first.
fn most_frequent<'a>(values: impl Iterator<Item = &'a str>) -> Option<&'a str> {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for value in values.filter(|v| !v.trim().is_empty()) {
        *counts.entry(value).or_default() += 1;
    }
    counts
        .into_iter()
        .max_by(|a, b| a.1.cmp(&b.1).then_with(|| b.0.cmp(a.0)))
        .map(|(value, _)| value)
}

/// `"City, Country"`, or whichever of the two the member photos carry.
fn dominant_place(photo_ids: &[String], photos: &HashMap<&str, &PhotoRecord>) -> Option<String> {
    let members: Vec<&PhotoRecord> = photo_ids
        .iter()
        .filter_map(|id| photos.get(id.as_str()).copied())
        .collect();
    let city = most_frequent(members.iter().filter_map(|p| p.city.as_deref()));
    let country = most_frequent(members.iter().filter_map(|p| p.country.as_deref()));

    match (city, country) {
        (Some(city), Some(country)) => Some(format!("{city}, {country}")),
        (Some(place), None) | (None, Some(place)) => Some(place.to_string()),
        (None, None) => None,
    }
}

/// `Jan 2, 2006`, `Jan 2-5, 2006` or `Jan 30 - Feb 2, 2006`.
pub fn format_date_range(start: NaiveDate, end: NaiveDate) -> String {
    if start == end {
        start.format("%b %-d, %Y").to_string()
    } else if start.year() == end.year() && start.month() == end.month() {
        format!(
            "{} {}-{}, {}",
            start.format("%b"),
            start.day(),
            end.day(),
            start.year()
        )
    } else {
        format!("{} - {}", start.format("%b %-d"), end.format("%b %-d, %Y"))
    }
}

fn trip_name(place: Option<&str>, start: NaiveDate, end: NaiveDate) -> String {
    format!("{} - {}", place.unwrap_or("Trip"), format_date_range(start, end))
}

/// Carry user edits (custom name, exclusion, album link) from previously stored
/// trips onto regenerated trips covering the same time span.
pub fn preserve_user_edits(previous: &[Trip], current: &mut [Trip]) -> usize {
    let edited: HashMap<(NaiveDateTime, NaiveDateTime), &Trip> = previous
        .iter()
        .filter(|trip| trip.custom_name || trip.excluded || trip.album_id.is_some())
        .map(|trip| ((trip.start_time, trip.end_time), trip))
        .collect();

    let mut preserved = 0;
    for trip in current.iter_mut() {
        let Some(old) = edited.get(&(trip.start_time, trip.end_time)) else {
            continue;
        };
        if old.custom_name {
            trip.name = old.name.clone();
            trip.custom_name = true;
        }
        trip.excluded = old.excluded;
        trip.album_id = old.album_id.clone();
        preserved += 1;
    }
    preserved
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    const HOME: (f64, f64) = (52.37, 4.89);
    const AWAY: (f64, f64) = (48.85, 2.35);

    fn t0() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 6, 1)
            .unwrap()
            .and_hms_opt(8, 0, 0)
            .unwrap()
    }

    fn at(hours: i64) -> NaiveDateTime {
        t0() + Duration::hours(hours)
    }

    fn session(id: u64, start_hours: i64, end_hours: i64, place: (f64, f64)) -> Session {
        Session {
            id,
            start_time: at(start_hours),
            end_time: at(end_hours),
            photo_ids: vec![format!("s{id}-a"), format!("s{id}-b")],
            center_lat: place.0,
            center_lon: place.1,
            radius_km: 0.5,
            photographer: "Alice".to_string(),
        }
    }

    fn homes() -> Vec<HomeLocation> {
        vec![HomeLocation {
            id: 1,
            name: "Home".to_string(),
            latitude: HOME.0,
            longitude: HOME.1,
            radius_km: 5.0,
        }]
    }

    fn criteria() -> TripCriteria {
        TripCriteria {
            min_duration_hours: 0.0,
            ..TripCriteria::default()
        }
    }

    fn session_ids(trip: &Trip) -> Vec<u64> {
        trip.sessions.iter().map(|s| s.id).collect()
    }

    #[test]
    fn test_brief_home_stay_keeps_one_trip() {
        let sessions = vec![
            session(1, 0, 2, AWAY),
            session(2, 4, 5, HOME),
            session(3, 14, 16, AWAY),
        ];
        let trips = detect_trips(&sessions, &homes(), &criteria(), &[]);
        assert_eq!(trips.len(), 1);
        assert_eq!(session_ids(&trips[0]), vec![1, 3]);
        assert_eq!(trips[0].ended_by, TripEnd::EndOfInput);
    }

    #[test]
    fn test_long_home_stay_splits_trip() {
        let sessions = vec![
            session(1, 0, 2, AWAY),
            session(2, 4, 5, HOME),
            session(3, 44, 46, AWAY),
        ];
        let trips = detect_trips(&sessions, &homes(), &criteria(), &[]);
        assert_eq!(trips.len(), 2);
        assert_eq!(session_ids(&trips[0]), vec![1]);
        assert_eq!(trips[0].ended_by, TripEnd::HomeStay);
        assert_eq!(session_ids(&trips[1]), vec![3]);
        assert_eq!((trips[0].id, trips[1].id), (1, 2));
    }

    #[test]
    fn test_forced_split_overrides_thresholds() {
        let sessions = vec![session(1, 0, 2, AWAY), session(2, 26, 28, AWAY)];
        let criteria = TripCriteria {
            split_dates: vec![NaiveDate::from_ymd_opt(2024, 6, 2).unwrap()],
            max_session_gap_hours: 1000.0,
            max_home_stay_hours: 1000.0,
            ..criteria()
        };
        let trips = detect_trips(&sessions, &homes(), &criteria, &[]);
        assert_eq!(trips.len(), 2);
        assert_eq!(trips[0].ended_by, TripEnd::ForcedSplit);
        assert_eq!(trips[1].ended_by, TripEnd::EndOfInput);
    }

    #[test]
    fn test_split_date_outside_gap_has_no_effect() {
        let sessions = vec![session(1, 0, 2, AWAY), session(2, 4, 6, AWAY)];
        let criteria = TripCriteria {
            split_dates: vec![NaiveDate::from_ymd_opt(2024, 6, 3).unwrap()],
            ..criteria()
        };
        assert_eq!(detect_trips(&sessions, &homes(), &criteria, &[]).len(), 1);
    }

    #[test]
    fn test_session_gap_splits_trip() {
        let sessions = vec![session(1, 0, 2, AWAY), session(2, 60, 62, AWAY)];
        let trips = detect_trips(&sessions, &homes(), &criteria(), &[]);
        assert_eq!(trips.len(), 2);
        assert_eq!(trips[0].ended_by, TripEnd::SessionGap);
    }

    #[test]
    fn test_only_home_sessions_make_no_trips() {
        let sessions = vec![session(1, 0, 2, HOME), session(2, 10, 12, HOME)];
        assert!(detect_trips(&sessions, &homes(), &criteria(), &[]).is_empty());
        assert!(detect_trips(&[], &homes(), &criteria(), &[]).is_empty());
    }

    #[test]
    fn test_without_homes_everything_is_away() {
        let sessions = vec![session(1, 0, 2, HOME), session(2, 4, 6, HOME)];
        let trips = detect_trips(&sessions, &[], &criteria(), &[]);
        assert_eq!(trips.len(), 1);
        assert_eq!(trips[0].home_distance_km, None);
    }

    #[test]
    fn test_minimum_sessions_and_duration() {
        let sessions = vec![
            session(1, 0, 1, AWAY),
            session(2, 100, 101, AWAY),
            session(3, 102, 104, AWAY),
        ];
        let min_sessions = TripCriteria {
            min_sessions: 2,
            ..criteria()
        };
        let trips = detect_trips(&sessions, &homes(), &min_sessions, &[]);
        assert_eq!(trips.len(), 1);
        assert_eq!(session_ids(&trips[0]), vec![2, 3]);
        assert_eq!(trips[0].id, 1);

        let min_duration = TripCriteria {
            min_duration_hours: 2.0,
            ..criteria()
        };
        let trips = detect_trips(&sessions, &homes(), &min_duration, &[]);
        assert_eq!(trips.len(), 1);
        assert_eq!(session_ids(&trips[0]), vec![2, 3]);
    }

    #[test]
    fn test_trip_opened_by_last_session_is_finalized() {
        let sessions = vec![session(1, 0, 2, AWAY), session(2, 26, 28, HOME)];
        let criteria = TripCriteria {
            split_dates: vec![NaiveDate::from_ymd_opt(2024, 6, 2).unwrap()],
            ..criteria()
        };
        let trips = detect_trips(&sessions, &homes(), &criteria, &[]);
        assert_eq!(trips.len(), 2);
        assert_eq!(session_ids(&trips[1]), vec![2]);
    }

    #[test]
    fn test_every_boundary_is_explained() {
        let sessions = vec![
            session(1, 0, 2, AWAY),
            session(2, 5, 6, HOME),
            session(3, 20, 22, AWAY),
            session(4, 80, 81, AWAY),
            session(5, 83, 84, HOME),
            session(6, 200, 202, AWAY),
        ];
        let trips = detect_trips(&sessions, &homes(), &criteria(), &[]);
        let reasons: Vec<TripEnd> = trips.iter().map(|t| t.ended_by).collect();
        assert_eq!(
            reasons,
            vec![TripEnd::SessionGap, TripEnd::HomeStay, TripEnd::EndOfInput]
        );
    }

    #[test]
    fn test_trip_aggregates() {
        let mut bob = session(2, 3, 5, (48.86, 2.36));
        bob.photographer = "Bob, Alice".to_string();
        let sessions = vec![session(1, 0, 2, AWAY), bob];
        let trips = detect_trips(&sessions, &homes(), &criteria(), &[]);
        let trip = &trips[0];

        assert_eq!(trip.photographers, vec!["Alice", "Bob"]);
        assert_eq!(trip.photo_ids, vec!["s1-a", "s1-b", "s2-a", "s2-b"]);
        assert_eq!(trip.start_time, at(0));
        assert_eq!(trip.end_time, at(5));
        assert!((trip.center_lat - 48.855).abs() < 1e-9);
        let expected = haversine_km(AWAY.0, AWAY.1, 48.86, 2.36);
        assert!((trip.total_distance_km - expected).abs() < 1e-9);
        let home = haversine_km(AWAY.0, AWAY.1, HOME.0, HOME.1);
        assert!((trip.home_distance_km.unwrap() - home).abs() < 1e-9);
    }

    fn placed(id: &str, city: Option<&str>, country: Option<&str>) -> PhotoRecord {
        PhotoRecord {
            id: id.to_string(),
            taken_at: t0(),
            latitude: None,
            longitude: None,
            make: String::new(),
            model: String::new(),
            original_file_name: String::new(),
            city: city.map(str::to_string),
            state: None,
            country: country.map(str::to_string),
        }
    }

    #[test]
    fn test_name_uses_most_frequent_place_with_alphabetical_ties() {
        let photos = vec![
            placed("s1-a", Some("Paris"), Some("France")),
            placed("s1-b", Some("Lyon"), Some("France")),
        ];
        let sessions = vec![session(1, 0, 2, AWAY)];
        let trips = detect_trips(&sessions, &homes(), &criteria(), &photos);
        assert_eq!(trips[0].name, "Lyon, France - Jun 1, 2024");
    }

    #[test]
    fn test_name_without_place_data() {
        let sessions = vec![session(1, 0, 2, AWAY), session(2, 30, 32, AWAY)];
        let trips = detect_trips(&sessions, &homes(), &criteria(), &[]);
        assert_eq!(trips[0].name, "Trip - Jun 1-2, 2024");
    }

    #[test]
    fn test_name_with_country_only() {
        let photos = vec![placed("s1-a", None, Some("France"))];
        let sessions = vec![session(1, 0, 2, AWAY)];
        let trips = detect_trips(&sessions, &homes(), &criteria(), &photos);
        assert_eq!(trips[0].name, "France - Jun 1, 2024");
    }

    #[test]
    fn test_date_range_formats() {
        let d = |m, day| NaiveDate::from_ymd_opt(2024, m, day).unwrap();
        assert_eq!(format_date_range(d(1, 2), d(1, 2)), "Jan 2, 2024");
        assert_eq!(format_date_range(d(1, 2), d(1, 5)), "Jan 2-5, 2024");
        assert_eq!(format_date_range(d(1, 30), d(2, 2)), "Jan 30 - Feb 2, 2024");
    }

    #[test]
    fn test_preserve_user_edits() {
        let sessions = vec![session(1, 0, 2, AWAY), session(2, 60, 62, AWAY)];
        let mut previous = detect_trips(&sessions, &homes(), &criteria(), &[]);
        previous[0].name = "Paris weekend".to_string();
        previous[0].custom_name = true;
        previous[1].excluded = true;
        previous[1].album_id = Some("album-42".to_string());

        let mut current = detect_trips(&sessions, &homes(), &criteria(), &[]);
        assert_eq!(preserve_user_edits(&previous, &mut current), 2);
        assert_eq!(current[0].name, "Paris weekend");
        assert!(!current[0].excluded);
        assert!(current[1].excluded);
        assert_eq!(current[1].album_id.as_deref(), Some("album-42"));
        assert!(!current[1].custom_name);
    }
}
