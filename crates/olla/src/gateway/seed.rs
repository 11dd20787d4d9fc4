//! Load producer fixtures from CSV (`id,display_name,lat,lon,rating`) into a store.

use std::io::Read;
use std::path::Path;

use serde::Deserialize;

use super::memory::MemoryStore;
use super::store::{encode_row, StoreError, Table};
use crate::domain::Producer;

#[derive(Debug)]
pub enum SeedError {
    Io(std::io::Error),
    Csv(csv::Error),
    Store(StoreError),
}

impl std::fmt::Display for SeedError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SeedError::Io(err) => write!(f, "failed to read producer fixture: {}", err),
            SeedError::Csv(err) => write!(f, "invalid producer CSV data: {}", err),
            SeedError::Store(err) => write!(f, "could not encode producer row: {}", err),
        }
    }
}

impl std::error::Error for SeedError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SeedError::Io(err) => Some(err),
            SeedError::Csv(err) => Some(err),
            SeedError::Store(err) => Some(err),
        }
    }
}

impl From<std::io::Error> for SeedError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<csv::Error> for SeedError {
    fn from(err: csv::Error) -> Self {
        Self::Csv(err)
    }
}

impl From<StoreError> for SeedError {
    fn from(err: StoreError) -> Self {
        Self::Store(err)
    }
}

#[derive(Debug, Deserialize)]
struct ProducerCsvRow {
    id: String,
    display_name: Option<String>,
    lat: Option<f64>,
    lon: Option<f64>,
    rating: Option<f64>,
}

pub fn producers_from_reader<R: Read>(reader: R) -> Result<Vec<Producer>, SeedError> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(reader);

    let mut producers = Vec::new();
    for record in csv_reader.deserialize::<ProducerCsvRow>() {
        let row = record?;
        let display_name = row
            .display_name
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| row.id.clone());
        let mut producer = Producer::new(row.id, display_name);
        producer.lat = row.lat;
        producer.lon = row.lon;
        producer.rating = row.rating;
        producers.push(producer);
    }
    Ok(producers)
}

pub fn producers_from_path<P: AsRef<Path>>(path: P) -> Result<Vec<Producer>, SeedError> {
    let file = std::fs::File::open(path)?;
    producers_from_reader(file)
}

/// Write producers into the in-memory store, returning how many were loaded.
pub fn seed_producers(store: &MemoryStore, producers: &[Producer]) -> Result<usize, SeedError> {
    let rows = producers
        .iter()
        .map(encode_row)
        .collect::<Result<Vec<_>, _>>()?;
    let count = rows.len();
    store.seed(Table::Producers, rows);
    Ok(count)
}
