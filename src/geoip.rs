//! Client geolocation and great-circle distance, grounded on
//! `original_source/powerdns/geo.go`.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::net::IpAddr;

/// Opaque `IP -> (lat, lon)` collaborator, abstracted behind a trait so
/// tests can supply a fixed mapping without a real MaxMind database file.
pub trait GeoLocator: Send + Sync {
    fn locate(&self, ip: IpAddr) -> Result<(f64, f64)>;
}

#[derive(Debug, Deserialize)]
struct CityLocation {
    latitude: f64,
    longitude: f64,
}

#[derive(Debug, Deserialize)]
struct CityRecord {
    location: CityLocation,
}

pub struct MaxMindGeoLocator {
    reader: maxminddb::Reader<Vec<u8>>,
}

impl MaxMindGeoLocator {
    pub fn open(path: &str) -> Result<Self> {
        let reader = maxminddb::Reader::open_readfile(path)
            .with_context(|| format!("failed to open GeoIP database at {path}"))?;
        Ok(Self { reader })
    }
}

impl GeoLocator for MaxMindGeoLocator {
    fn locate(&self, ip: IpAddr) -> Result<(f64, f64)> {
        let record: CityRecord = self
            .reader
            .lookup(ip)
            .context("GeoIP lookup failed")?
            .context("no GeoIP record for address")?;
        Ok((record.location.latitude, record.location.longitude))
    }
}

/// Great-circle distance in kilometers (haversine, Earth radius 6371km),
/// ported directly from `original_source/powerdns/geo.go`'s `distance`.
pub fn haversine_distance_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    const R: f64 = 6371.0;
    let d_lat = (lat2 - lat1) * (std::f64::consts::PI / 180.0);
    let d_lon = (lon2 - lon1) * (std::f64::consts::PI / 180.0);

    let lat1 = lat1 * (std::f64::consts::PI / 180.0);
    let lat2 = lat2 * (std::f64::consts::PI / 180.0);

    let a = (d_lat / 2.0).sin() * (d_lat / 2.0).sin()
        + (d_lon / 2.0).sin() * (d_lon / 2.0).sin() * lat1.cos() * lat2.cos();
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    R * c
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_distance_for_identical_points() {
        assert!(haversine_distance_km(51.5, -0.1, 51.5, -0.1) < 1e-9);
    }

    #[test]
    fn london_to_new_york_is_roughly_correct() {
        // London (51.5,-0.1) to New York (40.7,-74.0) is ~5570km.
        let d = haversine_distance_km(51.5, -0.1, 40.7, -74.0);
        assert!((5500.0..5650.0).contains(&d), "distance was {d}");
    }

    #[test]
    fn closer_point_wins() {
        let london = (51.5, -0.1);
        let new_york = (40.7, -74.0);
        // A resolver near London should be closer to London than New York.
        let client = (52.0, 0.0);
        let d_london = haversine_distance_km(client.0, client.1, london.0, london.1);
        let d_ny = haversine_distance_km(client.0, client.1, new_york.0, new_york.1);
        assert!(d_london < d_ny);
    }
}
