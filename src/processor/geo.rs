/// Mean Earth radius used for every distance in the pipeline.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Great-circle distance in kilometres between two coordinates (haversine).
pub fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let lat1_rad = lat1.to_radians();
    let lat2_rad = lat2.to_radians();
    let delta_lat = (lat2 - lat1).to_radians();
    let delta_lon = (lon2 - lon1).to_radians();

    let a = (delta_lat / 2.0).sin().powi(2)
        + lat1_rad.cos() * lat2_rad.cos() * (delta_lon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_KM * c
}

/// Arithmetic mean of a set of coordinates. `None` for an empty set.
pub fn centroid<I>(points: I) -> Option<(f64, f64)>
where
    I: IntoIterator<Item = (f64, f64)>,
{
    let (mut sum_lat, mut sum_lon, mut count) = (0.0, 0.0, 0usize);
    for (lat, lon) in points {
        sum_lat += lat;
        sum_lon += lon;
        count += 1;
    }
    (count > 0).then(|| (sum_lat / count as f64, sum_lon / count as f64))
}
