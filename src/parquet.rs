//! Parquet-backed dataset objects.
//!
//! A [`ParquetDataset`] is the value the loader hands back: a set of parquet
//! files opened read-only and exposed through the [`Dataset`] trait. Rows are
//! decoded lazily by the `parquet` crate; nothing is held in memory besides
//! the file handles and their metadata.

use crate::Dataset;
use ::parquet::errors::ParquetError;
use ::parquet::file::reader::{FileReader, SerializedFileReader};
use ::parquet::record::Row;
use std::fs::File;
use std::path::PathBuf;
use thiserror::Error;

/// Failure opening the parquet files backing a dataset.
#[derive(Debug, Error)]
pub enum ParquetDatasetError {
    /// A file could not be opened.
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    /// A file is not readable parquet.
    #[error("parquet: {0}")]
    Parquet(#[from] ParquetError),
}

/// One loaded split of a dataset, backed by one or more local parquet files.
pub struct ParquetDataset {
    readers: Vec<SerializedFileReader<File>>,
    num_rows: usize,
}

impl ParquetDataset {
    /// Open the given parquet files as one dataset.
    ///
    /// Shards are indexed in the order they are given.
    pub fn open(paths: &[PathBuf]) -> Result<Self, ParquetDatasetError> {
        let mut readers = Vec::with_capacity(paths.len());
        for path in paths {
            let file = File::open(path)?;
            readers.push(SerializedFileReader::new(file)?);
        }
        let num_rows = readers
            .iter()
            .map(|reader| reader.metadata().file_metadata().num_rows() as usize)
            .sum();
        Ok(Self { readers, num_rows })
    }
}

impl Dataset for ParquetDataset {
    type Item = Row;

    fn len(&self) -> usize {
        self.num_rows
    }

    fn get(&self, mut index: usize) -> Option<Row> {
        for reader in &self.readers {
            let rows = reader.metadata().file_metadata().num_rows() as usize;
            if index < rows {
                let mut iter = reader.get_row_iter(None).ok()?;
                return iter.nth(index)?.ok();
            }
            index -= rows;
        }
        None
    }
}
