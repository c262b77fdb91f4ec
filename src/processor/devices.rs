//! Device resolution: turns make/model strings into physical devices.
//!
//! Several people often own the same phone model. Each camera numbers its files
//! with its own monotonically increasing counter (`IMG_0412`, `DSC_1033`, ...),
//! so a make/model group whose counters fall into well-separated ranges is split
//! into one device per range.

use crate::models::{Device, PhotoRecord};
use rayon::prelude::*;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::LazyLock;
use tracing::{debug, info};

/// Groups smaller than this are never split.
pub const MIN_PHOTOS_FOR_SPLIT: usize = 20;
/// Minimum number of extractable counters needed to analyse a group.
pub const MIN_COUNTERS_FOR_SPLIT: usize = 10;
/// A counter jump must exceed this to start a new device.
pub const MIN_COUNTER_GAP: i64 = 1000;
/// ...and must also exceed this multiple of the cluster's mean increment.
pub const RELATIVE_GAP_FACTOR: i64 = 20;
/// Clusters below this size are noise (messaging-app re-saves and the like).
pub const MIN_CLUSTER_SIZE: usize = 5;

const SUB_DEVICE_MARKER: &str = "-device";

/// Filename counter patterns, tried in order. Only the first capture group is
/// the counter: `PXL_20240101_123456` yields the date `20240101`, and a bare
/// `20240101_123456` timestamp yields nothing, so timestamp-named files never
/// split a phone by day.
static COUNTER_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"IMG_(\d+)",
        r"DSC_(\d+)",
        r"_MG_(\d+)",
        r"DSCF(\d+)",
        r"P\d+_(\d+)",
        r"PXL_(\d{8})_(\d{6})",
        r"(\d{8}_\d{6})",
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).expect("counter pattern is a valid regex"))
    .collect()
});

/// Extract the camera's file counter from an original filename.
pub fn extract_filename_counter(filename: &str) -> Option<i64> {
    for pattern in COUNTER_PATTERNS.iter() {
        let Some(counter) = pattern
            .captures(filename)
            .and_then(|captures| captures.get(1))
        else {
            continue;
        };
        if let Ok(counter) = counter.as_str().parse::<i64>() {
            return Some(counter);
        }
    }
    None
}

/// Normalised make/model key, e.g. `apple-iphone 13`.
pub fn device_key(make: &str, model: &str) -> String {
    let make = make.trim().to_lowercase();
    let model = model.trim().to_lowercase();
    if make.is_empty() && model.is_empty() {
        return "unknown".to_string();
    }
    format!("{make}-{model}")
}

/// Accepted filename counters for a split device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterRange {
    pub min: i64,
    pub max: i64,
}

impl CounterRange {
    /// A quarter of the range on each side.
    pub fn tolerance(&self) -> i64 {
        self.max.saturating_sub(self.min) / 4
    }

    pub fn accepts(&self, counter: i64) -> bool {
        let tolerance = self.tolerance();
        counter >= self.min.saturating_sub(tolerance)
            && counter <= self.max.saturating_add(tolerance)
    }
}

/// Device id → accepted counter range, produced alongside the device list.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CounterRanges(BTreeMap<String, CounterRange>);

impl CounterRanges {
    pub fn get(&self, device_id: &str) -> Option<&CounterRange> {
        self.0.get(device_id)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(String, CounterRange)> for CounterRanges {
    fn from_iter<T: IntoIterator<Item = (String, CounterRange)>>(iter: T) -> Self {
        CounterRanges(iter.into_iter().collect())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceResolution {
    pub devices: Vec<Device>,
    pub counter_ranges: CounterRanges,
}

struct CounterCluster<'a> {
    min: i64,
    max: i64,
    photos: Vec<&'a PhotoRecord>,
}

impl CounterCluster<'_> {
    fn mean_increment(&self) -> i64 {
        (self.max - self.min) / self.photos.len().max(1) as i64
    }
}

/// Resolve every photo with make/model information into devices.
pub fn resolve_devices(photos: &[PhotoRecord]) -> DeviceResolution {
    let mut groups: BTreeMap<String, Vec<&PhotoRecord>> = BTreeMap::new();
    let mut skipped = 0usize;
    for photo in photos {
        if !photo.has_device_info() {
            skipped += 1;
            continue;
        }
        groups
            .entry(device_key(&photo.make, &photo.model))
            .or_default()
            .push(photo);
    }

    info!(
        with_device_info = photos.len() - skipped,
        skipped,
        make_models = groups.len(),
        "grouped photos by make/model"
    );

    let groups: Vec<(String, Vec<&PhotoRecord>)> = groups.into_iter().collect();
    let resolved: Vec<DeviceResolution> = groups
        .par_iter()
        .map(|(key, group)| resolve_group(key, group))
        .collect();

    let mut resolution = DeviceResolution::default();
    let mut ranges = BTreeMap::new();
    for group in resolved {
        resolution.devices.extend(group.devices);
        ranges.extend(group.counter_ranges.0);
    }
    resolution.counter_ranges = CounterRanges(ranges);

    info!(devices = resolution.devices.len(), "device resolution complete");
    resolution
}

fn resolve_group(key: &str, photos: &[&PhotoRecord]) -> DeviceResolution {
    let whole_group = || DeviceResolution {
        devices: vec![Device {
            id: key.to_string(),
            make: photos[0].make.clone(),
            model: photos[0].model.clone(),
            photo_count: photos.len(),
            photographer: None,
        }],
        counter_ranges: CounterRanges::default(),
    };

    if photos.len() < MIN_PHOTOS_FOR_SPLIT {
        return whole_group();
    }

    let mut with_counters: Vec<(i64, &PhotoRecord)> = photos
        .iter()
        .filter_map(|photo| {
            extract_filename_counter(&photo.original_file_name).map(|counter| (counter, *photo))
        })
        .collect();

    if with_counters.len() < MIN_COUNTERS_FOR_SPLIT {
        return whole_group();
    }

    with_counters.sort_by_key(|(counter, _)| *counter);

    let (first_counter, first_photo) = with_counters[0];
    let mut clusters = vec![CounterCluster {
        min: first_counter,
        max: first_counter,
        photos: vec![first_photo],
    }];

    for pair in with_counters.windows(2) {
        let (prev_counter, _) = pair[0];
        let (counter, photo) = pair[1];
        let gap = counter - prev_counter;

        let Some(current) = clusters.last_mut() else {
            break;
        };
        let mean_increment = current.mean_increment();
        let should_split = gap > MIN_COUNTER_GAP
            && (mean_increment == 0 || gap > mean_increment * RELATIVE_GAP_FACTOR);

        if should_split {
            clusters.push(CounterCluster {
                min: counter,
                max: counter,
                photos: vec![photo],
            });
        } else {
            current.max = counter;
            current.photos.push(photo);
        }
    }

    let significant: Vec<CounterCluster> = clusters
        .into_iter()
        .filter(|cluster| cluster.photos.len() >= MIN_CLUSTER_SIZE)
        .collect();

    match significant.len() {
        0 => whole_group(),
        1 => {
            let mut resolution = whole_group();
            resolution.counter_ranges = CounterRanges(BTreeMap::from([(
                key.to_string(),
                CounterRange {
                    min: significant[0].min,
                    max: significant[0].max,
                },
            )]));
            resolution
        }
        _ => {
            let mut resolution = DeviceResolution::default();
            let mut ranges = BTreeMap::new();
            for (index, cluster) in significant.iter().enumerate() {
                let id = format!("{key}{SUB_DEVICE_MARKER}{}", index + 1);
                debug!(
                    device = %id,
                    min = cluster.min,
                    max = cluster.max,
                    photos = cluster.photos.len(),
                    "split make/model by counter range"
                );
                ranges.insert(
                    id.clone(),
                    CounterRange {
                        min: cluster.min,
                        max: cluster.max,
                    },
                );
                resolution.devices.push(Device {
                    id,
                    make: cluster.photos[0].make.clone(),
                    model: cluster.photos[0].model.clone(),
                    photo_count: cluster.photos.len(),
                    photographer: None,
                });
            }
            info!(
                make_model = key,
                devices = resolution.devices.len(),
                "make/model split into sub-devices"
            );
            resolution.counter_ranges = CounterRanges(ranges);
            resolution
        }
    }
}

/// Split `apple-iphone 13-device2` into (`apple-iphone 13`, 2).
fn parse_sub_device_id(id: &str) -> Option<(&str, u32)> {
    let index = id.rfind(SUB_DEVICE_MARKER)?;
    let ordinal = id[index + SUB_DEVICE_MARKER.len()..].parse().ok()?;
    Some((&id[..index], ordinal))
}

/// Maps photos back onto resolved devices.
pub struct DeviceMatcher<'a> {
    by_id: BTreeMap<&'a str, &'a Device>,
    /// Base make/model key → sub-devices in ascending ordinal order.
    sub_devices: BTreeMap<&'a str, Vec<(u32, &'a Device)>>,
    ranges: &'a CounterRanges,
}

impl<'a> DeviceMatcher<'a> {
    pub fn new(devices: &'a [Device], ranges: &'a CounterRanges) -> Self {
        let mut by_id = BTreeMap::new();
        let mut sub_devices: BTreeMap<&str, Vec<(u32, &Device)>> = BTreeMap::new();
        for device in devices {
            by_id.insert(device.id.as_str(), device);
            if let Some((base, ordinal)) = parse_sub_device_id(&device.id) {
                sub_devices.entry(base).or_default().push((ordinal, device));
            }
        }
        for subs in sub_devices.values_mut() {
            subs.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.id.cmp(&b.1.id)));
        }
        Self {
            by_id,
            sub_devices,
            ranges,
        }
    }

    /// Resolve a photo to its device, if any.
    pub fn match_device(&self, photo: &PhotoRecord) -> Option<&'a Device> {
        if !photo.has_device_info() {
            return None;
        }
        let base = device_key(&photo.make, &photo.model);
        if let Some(&device) = self.by_id.get(base.as_str()) {
            return Some(device);
        }

        let subs = self.sub_devices.get(base.as_str())?;
        let first = subs.first().map(|(_, device)| *device);

        let Some(counter) = extract_filename_counter(&photo.original_file_name) else {
            return first;
        };

        subs.iter()
            .map(|(_, device)| *device)
            .find(|device| {
                self.ranges
                    .get(&device.id)
                    .is_some_and(|range| range.accepts(counter))
            })
            .or(first)
    }

    /// The photographer owning the photo's device, when the device is labelled.
    pub fn photographer_for(&self, photo: &PhotoRecord) -> Option<&'a str> {
        self.match_device(photo).and_then(Device::photographer)
    }

    pub fn labeled_count(&self) -> usize {
        self.by_id
            .values()
            .filter(|device| device.photographer().is_some())
            .count()
    }
}

/// Copy photographer labels from a previous resolution onto devices whose id
/// did not change. Returns the number of labels carried over.
pub fn carry_over_labels(previous: &[Device], current: &mut [Device]) -> usize {
    let labels: BTreeMap<&str, &str> = previous
        .iter()
        .filter_map(|device| device.photographer().map(|name| (device.id.as_str(), name)))
        .collect();

    let mut carried = 0;
    for device in current.iter_mut() {
        if let Some(name) = labels.get(device.id.as_str()) {
            device.photographer = Some((*name).to_string());
            carried += 1;
        }
    }
    carried
}
