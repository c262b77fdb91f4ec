use anyhow::{Context, Result, bail};
use chrono::NaiveDate;
use dialoguer::Input;
use indicatif::{ProgressBar, ProgressStyle};
use phototrips::analysis::analyze_coverage;
use phototrips::config::InferenceParams;
use phototrips::models::{LocationSource, Trip};
use phototrips::processor::devices::carry_over_labels;
use phototrips::processor::inference::ConfidenceDistribution;
use phototrips::processor::{
    ClusteringParams, DeviceMatcher, InferenceIndex, MergeParams, TripCriteria, detect_sessions,
    detect_trips, infer_locations, merge_sessions, preserve_user_edits, resolve_devices,
};
use phototrips::store::{Library, read_photo_records};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::{Duration, Instant};

const RULE: &str = "======================================================================";

/// Run `f()` behind a spinner, print how long it took (with `label`), and return its result.
fn benchmark<T, F: FnOnce() -> T>(label: &str, f: F) -> Result<T> {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::with_template("{spinner:.green} {msg}")?);
    spinner.set_message(format!("{label}…"));
    spinner.enable_steady_tick(Duration::from_millis(100));

    let start = Instant::now();
    let result = f();
    spinner.finish_and_clear();
    println!("⏱ {} took {:.2?}", label, start.elapsed());
    Ok(result)
}

fn describe_duration(duration: chrono::Duration) -> String {
    let hours = duration.num_minutes() as f64 / 60.0;
    if hours > 24.0 {
        format!("{:.1} days", hours / 24.0)
    } else {
        format!("{hours:.1} hours")
    }
}

pub fn discover(
    library: &Library,
    input: &Path,
    start_date: Option<NaiveDate>,
    end_date: Option<NaiveDate>,
) -> Result<()> {
    println!("▶ Importing photo records from: {}", input.display());
    let records = read_photo_records(input)
        .with_context(|| format!("Failed to read photo records from {}", input.display()))?;
    let fetched = records.len();

    let (valid, invalid): (Vec<_>, Vec<_>) = records
        .into_iter()
        .partition(|photo| photo.has_plausible_timestamp());
    if !invalid.is_empty() {
        println!(
            "⚠️  Skipped {} photos with invalid timestamps",
            invalid.len()
        );
    }

    let photos: Vec<_> = valid
        .into_iter()
        .filter(|photo| {
            let date = photo.taken_at.date();
            start_date.is_none_or(|start| date >= start) && end_date.is_none_or(|end| date <= end)
        })
        .collect();
    println!("   {} of {} records kept", photos.len(), fetched);

    let mut resolution = benchmark("resolving devices", || resolve_devices(&photos))?;
    let previous = library
        .load_devices()
        .context("Failed to load existing devices")?;
    let kept_labels = carry_over_labels(&previous.devices, &mut resolution.devices);

    library
        .save_photos(&photos)
        .context("Failed to store photos")?;
    library
        .save_devices(&resolution)
        .context("Failed to store devices")?;

    let mut devices: Vec<_> = resolution.devices.iter().collect();
    devices.sort_by(|a, b| b.photo_count.cmp(&a.photo_count).then(a.id.cmp(&b.id)));
    println!("\nFound {} devices:", devices.len());
    for device in devices {
        let label = device
            .photographer()
            .map(|name| format!(" [{name}]"))
            .unwrap_or_default();
        println!(
            "   📷 {} ({} {}) - {} photos{}",
            device.id, device.make, device.model, device.photo_count, label
        );
    }

    println!(
        "\n✅ Stored {} photos and {} devices ({} labels kept)",
        photos.len(),
        resolution.devices.len(),
        kept_labels
    );
    println!("Next: run `label-devices` to assign photographers");
    Ok(())
}

pub fn label_device(library: &Library, device_id: &str, photographer: &str) -> Result<()> {
    let photographer = photographer.trim();
    if photographer.is_empty() {
        bail!("Photographer name must not be empty");
    }

    let mut resolution = library.load_devices().context("Failed to load devices")?;
    let Some(device) = resolution.devices.iter_mut().find(|d| d.id == device_id) else {
        bail!("No device with id '{device_id}'. Run `discover` to list devices");
    };
    device.photographer = Some(photographer.to_string());
    library
        .save_devices(&resolution)
        .context("Failed to store device label")?;

    println!("✅ {device_id} → {photographer}");
    Ok(())
}

pub fn label_devices_interactive(library: &Library, all: bool) -> Result<()> {
    let mut resolution = library.load_devices().context("Failed to load devices")?;
    if resolution.devices.is_empty() {
        println!("No devices found. Run `discover` first.");
        return Ok(());
    }

    let labeled = resolution
        .devices
        .iter()
        .filter(|d| d.photographer().is_some())
        .count();
    let unlabeled = resolution.devices.len() - labeled;
    println!("▶ Device labeling");
    println!("   Total devices: {}", resolution.devices.len());
    println!("   Already labeled: {labeled}");
    println!("   Unlabeled: {unlabeled}");

    if unlabeled == 0 && !all {
        println!("\n✅ All devices are already labeled. Use --all to relabel.");
        return Ok(());
    }

    let to_label: Vec<usize> = resolution
        .devices
        .iter()
        .enumerate()
        .filter(|(_, d)| all || d.photographer().is_none())
        .map(|(i, _)| i)
        .collect();
    println!("Enter the photographer for each device (empty to skip)\n");

    let mut updated = 0;
    for (n, &index) in to_label.iter().enumerate() {
        let device = &resolution.devices[index];
        println!(
            "[{}/{}] {} {} ({})",
            n + 1,
            to_label.len(),
            device.make,
            device.model,
            device.id
        );
        println!("   Photos: {}", device.photo_count);
        if let Some(current) = device.photographer() {
            println!("   Current photographer: {current}");
        }

        let name = Input::<String>::new()
            .with_prompt("   Photographer")
            .allow_empty(true)
            .interact_text()
            .context("Failed to read photographer name")?;
        let name = name.trim();
        if name.is_empty() {
            continue;
        }

        resolution.devices[index].photographer = Some(name.to_string());
        library
            .save_devices(&resolution)
            .context("Failed to store device label")?;
        println!("   ✅ Set photographer to {name}");
        updated += 1;
    }

    println!("\n✅ Labeling complete, {updated} device(s) updated");
    Ok(())
}

pub fn infer(library: &Library, params: &InferenceParams) -> Result<()> {
    let photos = library.load_photos().context("Failed to load photos")?;
    if photos.is_empty() {
        bail!("No photos in the library. Run `discover` first");
    }
    let resolution = library.load_devices().context("Failed to load devices")?;
    let matcher = DeviceMatcher::new(&resolution.devices, &resolution.counter_ranges);
    if matcher.labeled_count() == 0 {
        bail!("No devices have been labeled with photographers. Run `label-devices` first");
    }

    println!(
        "▶ Inferring locations for {} photos (min confidence {:.2})",
        photos.len(),
        params.min_confidence
    );
    let mut inferences = benchmark("inferring locations", || {
        infer_locations(&photos, &matcher)
    })?;
    let produced = inferences.len();
    inferences.retain(|inference| inference.confidence >= params.min_confidence);

    library
        .save_inferences(&inferences)
        .context("Failed to store location inferences")?;

    let mut by_source: BTreeMap<String, usize> = BTreeMap::new();
    for inference in &inferences {
        *by_source.entry(inference.source.to_string()).or_default() += 1;
    }

    println!("\n✅ Stored {} location inferences", inferences.len());
    if produced > inferences.len() {
        println!(
            "⚠️  {} inferences below the confidence threshold were dropped",
            produced - inferences.len()
        );
    }
    for source in [LocationSource::Nearby, LocationSource::Interpolated] {
        let count = by_source.get(&source.to_string()).copied().unwrap_or(0);
        println!("   {source}: {count}");
    }
    println!("Confidence distribution:");
    for (band, count) in ConfidenceDistribution::from_inferences(&inferences).bands() {
        println!("   {band}: {count}");
    }
    Ok(())
}

pub fn sessions(library: &Library, params: &ClusteringParams, merge: &MergeParams) -> Result<()> {
    let photos = library.load_photos().context("Failed to load photos")?;
    let resolution = library.load_devices().context("Failed to load devices")?;
    let inferences = library
        .load_inferences()
        .context("Failed to load location inferences")?;

    let matcher = DeviceMatcher::new(&resolution.devices, &resolution.counter_ranges);
    if matcher.labeled_count() == 0 {
        bail!("No devices have been labeled with photographers. Run `label-devices` first");
    }
    let index = InferenceIndex::new(&inferences);

    println!(
        "▶ Detecting sessions (gap {}h, distance {}km, min {} photos, min confidence {:.2})",
        params.max_time_gap_hours,
        params.max_distance_km,
        params.min_photos_per_session,
        params.min_confidence
    );
    let mut sessions = benchmark("detecting sessions", || {
        detect_sessions(&photos, &index, &matcher, params)
    })?;

    if merge.enabled {
        let before = sessions.len();
        sessions = benchmark("merging sessions", || merge_sessions(sessions, merge))?;
        println!(
            "   Merged {} sessions into {} (gap {}h, distance {}km)",
            before,
            sessions.len(),
            merge.max_time_gap_hours,
            merge.max_distance_km
        );
    }

    library
        .save_sessions(&sessions)
        .context("Failed to store sessions")?;

    if sessions.is_empty() {
        println!("\n⚠️  No sessions detected. Try relaxing the thresholds.");
        return Ok(());
    }

    let photo_total: usize = sessions.iter().map(|s| s.photo_ids.len()).sum();
    let mut per_photographer: BTreeMap<&str, usize> = BTreeMap::new();
    for session in &sessions {
        *per_photographer.entry(session.photographer.as_str()).or_default() += 1;
    }

    println!("\n✅ Stored {} sessions", sessions.len());
    println!("   Photos in sessions: {photo_total}");
    println!(
        "   Average photos per session: {:.1}",
        photo_total as f64 / sessions.len() as f64
    );
    for (photographer, count) in per_photographer {
        println!("   {photographer}: {count}");
    }
    println!("Next: add home locations with `homes add`, then run `detect-trips`");
    Ok(())
}

pub fn add_home(library: &Library, name: &str, lat: f64, lon: f64, radius_km: f64) -> Result<()> {
    let id = library
        .add_home(name, lat, lon, radius_km)
        .context("Failed to add home location")?;
    println!("✅ Added home #{id}: {name} ({lat:.4}, {lon:.4}, {radius_km:.1}km radius)");
    Ok(())
}

pub fn list_homes(library: &Library) -> Result<()> {
    let homes = library.load_homes().context("Failed to load home locations")?;
    if homes.is_empty() {
        println!("No home locations defined. Add one with `homes add`.");
        return Ok(());
    }
    println!("🏠 Home locations:");
    for home in homes {
        println!(
            "   #{} {} ({:.4}, {:.4}, {:.1}km radius)",
            home.id, home.name, home.latitude, home.longitude, home.radius_km
        );
    }
    Ok(())
}

pub fn remove_home(library: &Library, id: u64) -> Result<()> {
    let removed = library
        .remove_home(id)
        .with_context(|| format!("Failed to remove home location {id}"))?;
    println!("✅ Removed home #{}: {}", removed.id, removed.name);
    Ok(())
}

pub fn trips(library: &Library, criteria: &TripCriteria) -> Result<()> {
    let sessions = library.load_sessions().context("Failed to load sessions")?;
    if sessions.is_empty() {
        bail!("No sessions found. Run `detect-sessions` first");
    }
    let homes = library.load_homes().context("Failed to load home locations")?;
    let photos = library.load_photos().context("Failed to load photos")?;

    if homes.is_empty() {
        println!("⚠️  No home locations defined; every session counts as away from home.");
    }
    println!(
        "▶ Detecting trips in {} sessions (min distance {}km, gap {}h, home stay {}h, min duration {}h, min {} sessions)",
        sessions.len(),
        criteria.min_distance_from_home_km,
        criteria.max_session_gap_hours,
        criteria.max_home_stay_hours,
        criteria.min_duration_hours,
        criteria.min_sessions
    );
    for date in &criteria.split_dates {
        println!("   Split at: {date}");
    }

    let mut trips = benchmark("detecting trips", || {
        detect_trips(&sessions, &homes, criteria, &photos)
    })?;
    let previous = library.load_trips().context("Failed to load previous trips")?;
    let preserved = preserve_user_edits(&previous, &mut trips);

    library.save_trips(&trips).context("Failed to store trips")?;

    if trips.is_empty() {
        println!("\n⚠️  No trips detected with the current criteria.");
        return Ok(());
    }

    println!("\n{RULE}\nTRIP DETECTION SUMMARY\n{RULE}");
    for trip in &trips {
        print_trip(trip);
    }
    println!("✅ Stored {} trips ({} with user edits kept)", trips.len(), preserved);
    Ok(())
}

fn print_trip(trip: &Trip) {
    let marker = if trip.excluded { " [excluded]" } else { "" };
    println!("Trip {}: {}{}", trip.id, trip.name, marker);
    println!(
        "   Dates: {} - {}",
        trip.start_time.format("%b %-d, %Y %H:%M"),
        trip.end_time.format("%b %-d, %Y %H:%M")
    );
    println!("   Duration: {}", describe_duration(trip.duration()));
    if let Some(distance) = trip.home_distance_km {
        println!("   Distance from home: {distance:.1}km");
    }
    println!("   Travel distance: {:.1}km", trip.total_distance_km);
    println!("   Sessions: {}", trip.session_count());
    println!("   Photos: {}", trip.photo_ids.len());
    println!("   Photographers: {}", trip.photographers.join(", "));
    println!("   Ended by: {:?}", trip.ended_by);
    println!();
}

pub fn list_trips(library: &Library) -> Result<()> {
    let trips = library.load_trips().context("Failed to load trips")?;
    if trips.is_empty() {
        println!("No trips stored. Run `detect-trips` first.");
        return Ok(());
    }
    for trip in &trips {
        print_trip(trip);
    }
    Ok(())
}

pub fn edit_trip(
    library: &Library,
    id: u64,
    name: Option<String>,
    excluded: Option<bool>,
) -> Result<()> {
    if name.is_none() && excluded.is_none() {
        bail!("Nothing to change: pass --name, --exclude or --include");
    }

    let mut trips = library.load_trips().context("Failed to load trips")?;
    let Some(trip) = trips.iter_mut().find(|t| t.id == id) else {
        bail!("No trip with id {id}. Run `trips list` to see trips");
    };
    if let Some(name) = name {
        let name = name.trim();
        if name.is_empty() {
            bail!("Trip name must not be empty");
        }
        trip.name = name.to_string();
        trip.custom_name = true;
    }
    if let Some(excluded) = excluded {
        trip.excluded = excluded;
    }
    let summary = format!("✅ Trip {}: {}", trip.id, trip.name);

    library.save_trips(&trips).context("Failed to store trips")?;
    println!("{summary}");
    Ok(())
}

pub fn analyze(library: &Library) -> Result<()> {
    let photos = library.load_photos().context("Failed to load photos")?;
    let sessions = library.load_sessions().context("Failed to load sessions")?;
    let trips = library.load_trips().context("Failed to load trips")?;
    let homes = library.load_homes().context("Failed to load home locations")?;

    let report = analyze_coverage(&photos, &sessions, &trips, &homes);
    let located = |count: usize| format!("{count} ({:.1}%)", report.percent_of_located(count));

    println!("{RULE}\nPHOTO COVERAGE ANALYSIS\n{RULE}\n");
    println!("Total photos: {}\n", report.total_photos);
    println!("Location data:");
    println!(
        "   With GPS:    {} ({:.1}%)",
        report.with_gps,
        report.percent_of_total(report.with_gps)
    );
    println!(
        "   Without GPS: {} ({:.1}%)\n",
        report.without_gps,
        report.percent_of_total(report.without_gps)
    );

    println!("Categorization (of photos with GPS):");
    match report.at_home {
        Some(count) => println!("   At home:                 {}", located(count)),
        None => println!("   At home:                 N/A (no home locations defined)"),
    }
    println!("   In trips:                {}", located(report.in_trips));
    println!(
        "   In sessions, not trips:  {}",
        located(report.in_sessions_not_trips)
    );
    if let Some(away) = report.away_not_in_trips {
        println!("      away from home:       {}", located(away));
    }
    println!("   Not in any session:      {}\n", located(report.not_in_sessions));

    println!(
        "Sessions: {}  Trips: {}  Homes: {}\n",
        report.sessions, report.trips, report.homes
    );

    if let Some(away) = report.away_not_in_trips.filter(|&n| n > 0) {
        println!("⚠️  {away} photos are away from home but not in trips.");
        println!("   They may be day trips below the distance or duration thresholds.");
        println!("   Consider --min-distance / --min-duration, or add homes for regular places.");
    }
    if report.not_in_sessions > 0 {
        println!(
            "⚠️  {} photos are not in any session.",
            report.not_in_sessions
        );
        println!("   Consider lowering --min-photos or raising the session thresholds.");
    }
    Ok(())
}

pub fn export_seeds(library: &Library, dir: &Path) -> Result<()> {
    let summary = library
        .export_seeds(dir)
        .with_context(|| format!("Failed to export seeds to {}", dir.display()))?;
    println!(
        "✅ Exported {} home locations and {} device labels to {}",
        summary.homes,
        summary.labels,
        dir.display()
    );
    Ok(())
}

pub fn import_seeds(library: &Library, dir: &Path) -> Result<()> {
    let summary = library
        .import_seeds(dir)
        .with_context(|| format!("Failed to import seeds from {}", dir.display()))?;
    println!(
        "✅ Imported {} home locations and {} device labels",
        summary.homes, summary.labels
    );
    if summary.unmatched_labels > 0 {
        println!(
            "⚠️  {} labels match no known device. Run `discover` first, then import again.",
            summary.unmatched_labels
        );
    }
    Ok(())
}
