//! Utility functions for coordinate conversions and formatting

/// Earth's mean radius in meters
pub const EARTH_RADIUS_M: f64 = 6371000.0;

/// Divisors turning (degrees, minutes, seconds) into decimal degrees
pub const DMS_DIVISION: [f64; 3] = [1.0, 60.0, 3600.0];

/// Convert degrees, minutes, seconds into decimal degrees
///
/// The reference is one of `N`, `S`, `E`, `W` (case-insensitive); southern and western
/// references produce negative values.
///
/// # Examples
/// ```
/// use trackstamp_lib::coords::dms_to_decimal;
///
/// assert!((dms_to_decimal(10.0, 10.0, 10.0, "N") - 10.169444444444444).abs() < 1e-12);
/// assert!((dms_to_decimal(8.0, 9.0, 10.0, "S") + 8.152777777777779).abs() < 1e-12);
/// ```
#[inline]
pub fn dms_to_decimal(degrees: f64, minutes: f64, seconds: f64, reference: &str) -> f64 {
    let sign = match reference.trim().chars().next() {
        Some('S' | 's' | 'W' | 'w') => -1.0,
        _ => 1.0,
    };
    sign * (degrees / DMS_DIVISION[0] + minutes / DMS_DIVISION[1] + seconds / DMS_DIVISION[2])
}

/// Seconds are resolved to this many parts (one micro-arcsecond)
pub const DMS_SECONDS_DENOMINATOR: u32 = 1_000_000;

/// Convert decimal degrees into unsigned (degrees, minutes, seconds)
///
/// The sign is dropped; callers record it separately as a hemisphere reference. Seconds
/// are rounded to `1 / DMS_SECONDS_DENOMINATOR` and the rounding carries into minutes and
/// degrees, so seconds always stay below 60.
#[inline]
pub fn decimal_to_dms(decimal: f64) -> (u32, u32, f64) {
    let per_second = u64::from(DMS_SECONDS_DENOMINATOR);
    let per_minute = 60 * per_second;
    let per_degree = 60 * per_minute;
    let total = (decimal.abs() * per_degree as f64).round() as u64;
    let degrees = total / per_degree;
    let minutes = total % per_degree / per_minute;
    let seconds = (total % per_minute) as f64 / per_second as f64;
    (degrees as u32, minutes as u32, seconds)
}

/// Check if a latitude/longitude pair lies on the globe
#[inline]
pub fn valid_coords(lat: f64, lon: f64) -> bool {
    lat.is_finite() && lon.is_finite() && lat.abs() <= 90.0 && lon.abs() <= 180.0
}

/// Add cardinal directions to decimal coordinates
///
/// ```
/// use trackstamp_lib::coords::format_coords;
///
/// assert_eq!(format_coords(46.742065, -92.106434), "N 46.74206, W 92.10643");
/// ```
pub fn format_coords(lat: f64, lon: f64) -> String {
    format!(
        "{} {:.5}, {} {:.5}",
        if lat >= 0.0 { "N" } else { "S" },
        lat.abs(),
        if lon >= 0.0 { "E" } else { "W" },
        lon.abs()
    )
}

/// Describe an elevation relative to sea level
pub fn format_altitude(elevation: f64) -> String {
    if elevation >= 0.0 {
        format!("{:.1}m above sea level", elevation)
    } else {
        format!("{:.1}m below sea level", elevation.abs())
    }
}

/// Calculate the Haversine distance between two (lat, lon) pairs in meters
#[inline]
pub fn haversine_distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let delta_lat = (lat2 - lat1).to_radians();
    let delta_lon = (lon2 - lon1).to_radians();

    let a = (delta_lat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (delta_lon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_M * c
}
