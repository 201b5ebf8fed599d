//! Report: JSON export/import of observer tables, optics tables and
//! beamline descriptions for offline analysis and plotting.

use anyhow::Context;
use beamline_core::observers::ObserverRecord;
use beamline_core::twiss::TwissTable;
use beamline_core::{ElementDescription, Sequence};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::{BufReader, BufWriter};
use std::path::Path;

fn write_json<T: Serialize + ?Sized>(value: &T, path: &Path) -> anyhow::Result<()> {
    let file = std::fs::File::create(path)
        .with_context(|| format!("creating {}", path.display()))?;
    let writer = BufWriter::new(file);
    serde_json::to_writer_pretty(writer, value)
        .with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}

fn read_json<T: DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let file =
        std::fs::File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let reader = BufReader::new(file);
    let value = serde_json::from_reader(reader)
        .with_context(|| format!("parsing {}", path.display()))?;
    Ok(value)
}

/// Save observer records to a JSON file.
pub fn save_records<T: Serialize>(
    records: &[ObserverRecord<T>],
    path: &Path,
) -> anyhow::Result<()> {
    write_json(records, path)
}

/// Load observer records from a JSON file.
pub fn load_records<T: DeserializeOwned>(path: &Path) -> anyhow::Result<Vec<ObserverRecord<T>>> {
    read_json(path)
}

/// Save an optics table to a JSON file.
pub fn save_twiss(table: &TwissTable, path: &Path) -> anyhow::Result<()> {
    write_json(table, path)
}

pub fn load_twiss(path: &Path) -> anyhow::Result<TwissTable> {
    read_json(path)
}

/// Save a sequence as a list of element descriptions.
pub fn save_description(sequence: &Sequence, path: &Path) -> anyhow::Result<()> {
    let descriptions: Vec<ElementDescription> =
        sequence.elements().iter().map(ElementDescription::from).collect();
    write_json(&descriptions, path)
}

/// Load a beamline description (a JSON list of elements).
pub fn load_description(path: &Path) -> anyhow::Result<Vec<ElementDescription>> {
    read_json(path)
}
