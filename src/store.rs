//! Library store: one directory of JSON documents, one document per stage.
//!
//! Every stage output replaces its document wholesale. Writes go to a temp
//! file first and are renamed over the target.

use crate::models::{Device, HomeLocation, LocationInference, PhotoRecord, Session, Trip};
use crate::processor::DeviceResolution;
use crate::{Error, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const PHOTOS: &str = "photos.json";
const DEVICES: &str = "devices.json";
const INFERENCES: &str = "inferences.json";
const SESSIONS: &str = "sessions.json";
const TRIPS: &str = "trips.json";
const HOMES: &str = "homes.json";

pub const HOME_SEEDS: &str = "home_locations.json";
pub const LABEL_SEEDS: &str = "device_labels.json";

#[derive(Debug, Clone)]
pub struct Library {
    root: PathBuf,
}

impl Library {
    /// Open (creating if needed) a library directory.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| Error::io(&root, e))?;
        debug!(root = %root.display(), "opened library");
        Ok(Self { root })
    }

    fn read_doc<T: DeserializeOwned + Default>(&self, name: &str) -> Result<T> {
        read_json_or_default(&self.root.join(name))
    }

    fn write_doc<T: Serialize + ?Sized>(&self, name: &str, value: &T) -> Result<()> {
        write_json_atomic(&self.root.join(name), value)
    }

    pub fn load_photos(&self) -> Result<Vec<PhotoRecord>> {
        self.read_doc(PHOTOS)
    }

    pub fn save_photos(&self, photos: &[PhotoRecord]) -> Result<()> {
        self.write_doc(PHOTOS, photos)
    }

    pub fn load_devices(&self) -> Result<DeviceResolution> {
        self.read_doc(DEVICES)
    }

    pub fn save_devices(&self, resolution: &DeviceResolution) -> Result<()> {
        self.write_doc(DEVICES, resolution)
    }

    pub fn load_inferences(&self) -> Result<Vec<LocationInference>> {
        self.read_doc(INFERENCES)
    }

    pub fn save_inferences(&self, inferences: &[LocationInference]) -> Result<()> {
        self.write_doc(INFERENCES, inferences)
    }

    pub fn load_sessions(&self) -> Result<Vec<Session>> {
        self.read_doc(SESSIONS)
    }

    pub fn save_sessions(&self, sessions: &[Session]) -> Result<()> {
        self.write_doc(SESSIONS, sessions)
    }

    pub fn load_trips(&self) -> Result<Vec<Trip>> {
        self.read_doc(TRIPS)
    }

    pub fn save_trips(&self, trips: &[Trip]) -> Result<()> {
        self.write_doc(TRIPS, trips)
    }

    pub fn load_homes(&self) -> Result<Vec<HomeLocation>> {
        self.read_doc(HOMES)
    }

    pub fn save_homes(&self, homes: &[HomeLocation]) -> Result<()> {
        self.write_doc(HOMES, homes)
    }

    /// Add a home and return its id (one past the highest existing id).
    pub fn add_home(
        &self,
        name: &str,
        latitude: f64,
        longitude: f64,
        radius_km: f64,
    ) -> Result<u64> {
        validate_home(latitude, longitude, radius_km)?;
        let mut homes = self.load_homes()?;
        let id = homes.iter().map(|h| h.id).max().unwrap_or(0) + 1;
        homes.push(HomeLocation {
            id,
            name: name.to_string(),
            latitude,
            longitude,
            radius_km,
        });
        self.save_homes(&homes)?;
        info!(id, name, "added home location");
        Ok(id)
    }

    pub fn remove_home(&self, id: u64) -> Result<HomeLocation> {
        let mut homes = self.load_homes()?;
        let index = homes
            .iter()
            .position(|h| h.id == id)
            .ok_or_else(|| Error::NotFound(format!("home location {id}")))?;
        let removed = homes.remove(index);
        self.save_homes(&homes)?;
        Ok(removed)
    }

    /// Write homes and non-empty device labels into `dir`.
    pub fn export_seeds(&self, dir: &Path) -> Result<SeedSummary> {
        fs::create_dir_all(dir).map_err(|e| Error::io(dir, e))?;

        let homes = self.load_homes()?;
        let labels: Vec<DeviceLabel> = self
            .load_devices()?
            .devices
            .iter()
            .filter_map(DeviceLabel::from_device)
            .collect();

        write_json_atomic(&dir.join(HOME_SEEDS), &homes)?;
        write_json_atomic(&dir.join(LABEL_SEEDS), &labels)?;
        info!(
            homes = homes.len(),
            labels = labels.len(),
            dir = %dir.display(),
            "exported seeds"
        );

        Ok(SeedSummary {
            homes: homes.len(),
            labels: labels.len(),
            unmatched_labels: 0,
        })
    }

    /// Restore seeds from `dir`. Homes replace existing homes of the same name;
    /// labels apply to devices already present in the library.
    pub fn import_seeds(&self, dir: &Path) -> Result<SeedSummary> {
        let seeded_homes: Vec<HomeLocation> = read_json_or_default(&dir.join(HOME_SEEDS))?;
        let labels: Vec<DeviceLabel> = read_json_or_default(&dir.join(LABEL_SEEDS))?;

        let mut homes = self.load_homes()?;
        for seed in &seeded_homes {
            validate_home(seed.latitude, seed.longitude, seed.radius_km)?;
            match homes.iter_mut().find(|h| h.name == seed.name) {
                Some(existing) => {
                    existing.latitude = seed.latitude;
                    existing.longitude = seed.longitude;
                    existing.radius_km = seed.radius_km;
                }
                None => {
                    let id = homes.iter().map(|h| h.id).max().unwrap_or(0) + 1;
                    homes.push(HomeLocation { id, ..seed.clone() });
                }
            }
        }
        self.save_homes(&homes)?;

        let mut resolution = self.load_devices()?;
        let by_id: HashMap<&str, &str> = labels
            .iter()
            .map(|l| (l.id.as_str(), l.photographer.as_str()))
            .collect();
        let mut applied = 0;
        for device in &mut resolution.devices {
            if let Some(photographer) = by_id.get(device.id.as_str()) {
                device.photographer = Some(photographer.to_string());
                applied += 1;
            }
        }
        let unmatched_labels = labels.len() - applied;
        if unmatched_labels > 0 {
            warn!(unmatched_labels, "some device labels match no known device");
        }
        self.save_devices(&resolution)?;

        Ok(SeedSummary {
            homes: seeded_homes.len(),
            labels: applied,
            unmatched_labels,
        })
    }
}

/// Photographer label as stored in seed files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceLabel {
    pub id: String,
    pub make: String,
    pub model: String,
    pub photographer: String,
}

impl DeviceLabel {
    fn from_device(device: &Device) -> Option<Self> {
        device.photographer().map(|photographer| Self {
            id: device.id.clone(),
            make: device.make.clone(),
            model: device.model.clone(),
            photographer: photographer.to_string(),
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeedSummary {
    pub homes: usize,
    pub labels: usize,
    pub unmatched_labels: usize,
}

fn validate_home(latitude: f64, longitude: f64, radius_km: f64) -> Result<()> {
    if !(-90.0..=90.0).contains(&latitude) || !(-180.0..=180.0).contains(&longitude) {
        return Err(Error::InvalidInput(format!(
            "coordinates out of range: {latitude}, {longitude}"
        )));
    }
    if radius_km < 0.0 {
        return Err(Error::InvalidInput(format!(
            "home radius must not be negative, got {radius_km}"
        )));
    }
    Ok(())
}

/// Read photo records from a JSON array or a JSON Lines file.
pub fn read_photo_records(path: &Path) -> Result<Vec<PhotoRecord>> {
    let content = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;

    if content.trim_start().starts_with('[') {
        return serde_json::from_str(&content).map_err(|e| Error::json(path, e));
    }

    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(index, line)| {
            serde_json::from_str(line).map_err(|e| {
                Error::InvalidInput(format!("{}:{}: {e}", path.display(), index + 1))
            })
        })
        .collect()
}

fn read_json_or_default<T: DeserializeOwned + Default>(path: &Path) -> Result<T> {
    match fs::read_to_string(path) {
        Ok(content) => serde_json::from_str(&content).map_err(|e| Error::json(path, e)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "document missing, starting empty");
            Ok(T::default())
        }
        Err(e) => Err(Error::io(path, e)),
    }
}

fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).map_err(|e| Error::json(path, e))?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, json).map_err(|e| Error::io(&tmp, e))?;
    fs::rename(&tmp, path).map_err(|e| Error::io(path, e))?;
    debug!(path = %path.display(), "wrote document");
    Ok(())
}
