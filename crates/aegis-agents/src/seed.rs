//! Station seeding from a TOML file of `[[stations]]` tables.

use std::collections::BTreeSet;
use std::path::Path;

use anyhow::{Context, Result};
use coordination::directory::StationDirectory;
use coordination::station::{NewStation, Station};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct StationFile {
    #[serde(default)]
    stations: Vec<NewStation>,
}

#[derive(Debug, Default)]
pub struct SeedReport {
    pub created: Vec<Station>,
    /// Names already present in the directory.
    pub skipped: Vec<String>,
}

pub fn parse_stations(text: &str) -> Result<Vec<NewStation>> {
    let file: StationFile = toml::from_str(text).context("invalid station file")?;
    Ok(file.stations)
}

pub fn load_station_file(path: &Path) -> Result<Vec<NewStation>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read station file {}", path.display()))?;
    parse_stations(&text).with_context(|| format!("in {}", path.display()))
}

/// Register every station whose name is not yet taken.
pub fn seed_stations(directory: &StationDirectory, stations: Vec<NewStation>) -> Result<SeedReport> {
    let mut existing: BTreeSet<String> = directory
        .list_stations(None)?
        .into_iter()
        .map(|s| s.name)
        .collect();

    let mut report = SeedReport::default();
    for new in stations {
        if existing.contains(&new.name) {
            tracing::debug!(name = %new.name, "Station already registered, skipping");
            report.skipped.push(new.name);
            continue;
        }
        let name = new.name.clone();
        let station = directory
            .register_station(new)
            .with_context(|| format!("cannot register station '{name}'"))?;
        existing.insert(name);
        report.created.push(station);
    }

    tracing::info!(
        created = report.created.len(),
        skipped = report.skipped.len(),
        "Station seeding complete"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use coordination::station::StationType;
    use coordination::store::Store;

    const EXAMPLE: &str = include_str!("../stations.example.toml");

    #[test]
    fn test_example_file_parses() {
        let stations = parse_stations(EXAMPLE).unwrap();
        assert_eq!(stations.len(), 7);
        let fire = stations
            .iter()
            .find(|s| s.station_type == StationType::Fire)
            .unwrap();
        assert_eq!(fire.name, "Fire Station - Swargate");
        assert!(fire.capabilities.contains("rescue"));
    }

    #[test]
    fn test_seeding_is_idempotent_by_name() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().join("aegis.db")).unwrap();
        let directory = StationDirectory::new(store);

        let first = seed_stations(&directory, parse_stations(EXAMPLE).unwrap()).unwrap();
        assert_eq!(first.created.len(), 7);
        assert!(first.created.iter().all(|s| s.api_key.len() == 32));

        let second = seed_stations(&directory, parse_stations(EXAMPLE).unwrap()).unwrap();
        assert!(second.created.is_empty());
        assert_eq!(second.skipped.len(), 7);
        assert_eq!(directory.list_stations(None).unwrap().len(), 7);
    }

    #[test]
    fn test_bad_station_is_an_error() {
        let text = r#"
            [[stations]]
            name = "Nowhere"
            type = "fire"
            location = { lat = 123.0, lng = 0.0 }
            endpoint = "http://localhost:1/alerts"
        "#;
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().join("aegis.db")).unwrap();
        let directory = StationDirectory::new(store);
        assert!(seed_stations(&directory, parse_stations(text).unwrap()).is_err());
        assert!(parse_stations("stations = 3").is_err());
    }
}
