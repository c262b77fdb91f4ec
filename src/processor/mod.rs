pub mod clustering;
pub mod devices;
pub mod geo;
pub mod inference;
pub mod trips;

use chrono::NaiveDateTime;

pub use clustering::{ClusteringParams, MergeParams, detect_sessions, merge_sessions};
pub use devices::{CounterRanges, DeviceMatcher, DeviceResolution, resolve_devices};
pub use inference::{InferenceIndex, effective_location, infer_locations};
pub use trips::{TripCriteria, detect_trips, preserve_user_edits};

/// Signed hours from `from` to `to`, with sub-second precision dropped.
pub(crate) fn hours_between(from: NaiveDateTime, to: NaiveDateTime) -> f64 {
    (to - from).num_milliseconds() as f64 / 3_600_000.0
}
