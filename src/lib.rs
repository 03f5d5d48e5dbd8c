#![deny(missing_docs)]
//! Resolve named datasets against a local cache directory, falling back to
//! the [Hugging Face Hub](https://huggingface.co/datasets) when no local copy
//! exists.
//!
//! The crate stays out of the data path on purpose: hub access is delegated
//! to `hf-hub` and parquet decoding to the `parquet` crate. The
//! [`DatasetLoader`] only decides *where* a dataset is loaded from and
//! translates the failures it observes into [`LoadError`] kinds.

use hf_hub::api::sync::{Api, ApiBuilder, ApiError};
use hf_hub::{Repo, RepoType};
use log::{debug, error, info};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub mod parquet;

pub use crate::parquet::{ParquetDataset, ParquetDatasetError};

/// Environment variable consulted when no cache directory is given
/// explicitly.
pub const CACHE_DIR_ENV: &str = "DATASET_CACHE_DIR";

/// Split loaded when callers have no preference.
pub const DEFAULT_SPLIT: &str = "test";

/// Parquet conversions of hub datasets are published under this revision.
const PARQUET_REVISION: &str = "refs/convert/parquet";

/// The default trait to implement to get the simplest API
pub trait Dataset {
    /// The type of objects contained in the dataset
    type Item;

    /// The number of rows in the dataset
    fn len(&self) -> usize;

    /// Whether the dataset contains no rows
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get item at specific index. Should return `None` if and only if
    /// `index >= dataset.len()`.
    fn get(&self, index: usize) -> Option<Self::Item>;

    /// Iterate over the dataset in order
    fn iter(&self) -> DatasetIterator<'_, Self>
    where
        Self: Sized,
    {
        DatasetIterator {
            dataset: self,
            index: 0,
        }
    }
}

/// Generic structure to iterate over a [`Dataset`].
pub struct DatasetIterator<'a, D> {
    dataset: &'a D,
    index: usize,
}

impl<'a, D: Dataset> Iterator for DatasetIterator<'a, D> {
    type Item = D::Item;

    fn next(&mut self) -> Option<Self::Item> {
        let object = self.dataset.get(self.index);
        self.index += 1;
        object
    }
}

type BoxedError = Box<dyn std::error::Error + Send + Sync>;

/// Failures preparing a [`DatasetLoader`].
#[derive(Debug, Error)]
pub enum SetupError {
    /// The cache directory could not be created or resolved.
    #[error("cannot prepare cache directory {path:?}")]
    CacheDir {
        /// Directory the loader attempted to prepare.
        path: PathBuf,
        /// Underlying filesystem error.
        #[source]
        source: std::io::Error,
    },

    /// The hub client could not be configured.
    #[error("cannot configure hub client")]
    HubClient(#[from] ApiError),
}

/// Failures surfaced by [`DatasetLoader::load`].
///
/// Each variant keeps the underlying failure, when one exists, as its
/// [`source`](std::error::Error::source).
#[derive(Debug, Error)]
pub enum LoadError {
    /// The dataset exists neither in the cache directory nor on the hub.
    #[error("dataset '{dataset}' not available locally or on the Hugging Face Hub")]
    NotFound {
        /// Name of the requested dataset.
        dataset: String,
        /// Failure reported by the hub or the filesystem, if any.
        #[source]
        source: Option<BoxedError>,
    },

    /// The hub could not be reached while downloading.
    #[error("failed to download dataset '{dataset}': hub unreachable")]
    Connectivity {
        /// Name of the requested dataset.
        dataset: String,
        /// Transport failure that interrupted the download.
        #[source]
        source: BoxedError,
    },

    /// The dataset name or the requested split was rejected.
    #[error("dataset '{dataset}' or split '{split}' is invalid")]
    InvalidArgument {
        /// Name of the requested dataset.
        dataset: String,
        /// Split that could not be resolved.
        split: String,
        /// Rejection reported by the hub, if any.
        #[source]
        source: Option<BoxedError>,
    },

    /// Any failure that fits none of the other kinds.
    #[error("unexpected error while loading dataset '{dataset}'")]
    Unexpected {
        /// Name of the requested dataset.
        dataset: String,
        /// The original failure.
        #[source]
        source: BoxedError,
    },
}

enum FailureKind {
    NotFound,
    Connectivity,
    InvalidArgument,
    Unexpected,
}

/// Walk the source chain and pick the load-error kind for the root cause.
fn failure_kind(err: &(dyn std::error::Error + 'static)) -> FailureKind {
    let mut cursor = Some(err);
    while let Some(current) = cursor {
        // hf-hub boxes the transport error it records as a source.
        let request = current
            .downcast_ref::<ureq::Error>()
            .or_else(|| current.downcast_ref::<Box<ureq::Error>>().map(|boxed| &**boxed));
        if let Some(request) = request {
            return match request {
                // The hub answers 401/403 for repos that are absent or
                // hidden from the caller.
                ureq::Error::Status(404 | 401 | 403, _) => FailureKind::NotFound,
                ureq::Error::Status(400 | 422, _) => FailureKind::InvalidArgument,
                ureq::Error::Status(_, _) => FailureKind::Unexpected,
                _ => FailureKind::Connectivity,
            };
        }
        if let Some(io) = current.downcast_ref::<std::io::Error>() {
            use std::io::ErrorKind;
            return match io.kind() {
                ErrorKind::NotFound => FailureKind::NotFound,
                ErrorKind::ConnectionRefused
                | ErrorKind::ConnectionReset
                | ErrorKind::ConnectionAborted
                | ErrorKind::NotConnected
                | ErrorKind::TimedOut => FailureKind::Connectivity,
                _ => FailureKind::Unexpected,
            };
        }
        cursor = current.source();
    }
    FailureKind::Unexpected
}

fn classify(dataset: &str, split: &str, source: BoxedError) -> LoadError {
    let dataset = dataset.to_string();
    match failure_kind(source.as_ref()) {
        FailureKind::NotFound => LoadError::NotFound {
            dataset,
            source: Some(source),
        },
        FailureKind::Connectivity => LoadError::Connectivity { dataset, source },
        FailureKind::InvalidArgument => LoadError::InvalidArgument {
            dataset,
            split: split.to_string(),
            source: Some(source),
        },
        FailureKind::Unexpected => LoadError::Unexpected { dataset, source },
    }
}

/// Resolves datasets by name, preferring the local cache over the hub.
pub struct DatasetLoader {
    cache_dir: PathBuf,
    api: Api,
}

impl DatasetLoader {
    /// Build a loader over the default cache directory.
    ///
    /// The directory is taken from the [`CACHE_DIR_ENV`] environment variable
    /// when set, otherwise from the platform cache directory.
    pub fn new() -> Result<Self, SetupError> {
        Self::with_cache_dir(default_cache_dir())
    }

    /// Build a loader over an explicit cache directory.
    ///
    /// The directory and any missing parents are created; constructing twice
    /// over the same path is fine.
    pub fn with_cache_dir(cache_dir: impl Into<PathBuf>) -> Result<Self, SetupError> {
        let cache_dir = cache_dir.into();
        fs::create_dir_all(&cache_dir).map_err(|source| SetupError::CacheDir {
            path: cache_dir.clone(),
            source,
        })?;
        let cache_dir = fs::canonicalize(&cache_dir).map_err(|source| SetupError::CacheDir {
            path: cache_dir.clone(),
            source,
        })?;
        let api = ApiBuilder::new().with_cache_dir(cache_dir.clone()).build()?;
        Ok(Self { cache_dir, api })
    }

    /// Directory used to look up local copies and to store downloads.
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Load `dataset` for `split`: from the cache directory when a copy
    /// exists at `<cache_dir>/<dataset>`, from the hub otherwise.
    ///
    /// The returned [`ParquetDataset`] is backed by whatever parquet files
    /// matched the split; their contents are never inspected here.
    pub fn load(&self, dataset: &str, split: &str) -> Result<ParquetDataset, LoadError> {
        info!("loading dataset '{dataset}' (split '{split}')");
        let local = self.cache_dir.join(dataset);
        let result = if local.exists() {
            debug!("loading '{dataset}' from local copy at {}", local.display());
            self.load_local(&local, dataset, split)
        } else {
            debug!("no local copy of '{dataset}', resolving on the hub");
            self.load_remote(dataset, split)
        };
        match &result {
            Ok(loaded) => info!(
                "loaded dataset '{dataset}' (split '{split}', {} rows)",
                loaded.len()
            ),
            Err(err) => error!("failed to load dataset '{dataset}': {err}"),
        }
        result
    }

    fn load_local(&self, dir: &Path, dataset: &str, split: &str) -> Result<ParquetDataset, LoadError> {
        let mut files = Vec::new();
        collect_parquet_files(dir, &mut files)
            .map_err(|err| classify(dataset, split, Box::new(err)))?;
        files.sort();
        let matching: Vec<PathBuf> = files
            .into_iter()
            .filter(|path| {
                relative_name(dir, path).is_some_and(|name| split_matches(&name, split))
            })
            .collect();
        if matching.is_empty() {
            return Err(LoadError::InvalidArgument {
                dataset: dataset.to_string(),
                split: split.to_string(),
                source: None,
            });
        }
        ParquetDataset::open(&matching).map_err(|err| classify(dataset, split, Box::new(err)))
    }

    fn load_remote(&self, dataset: &str, split: &str) -> Result<ParquetDataset, LoadError> {
        let repo = Repo::with_revision(
            dataset.to_string(),
            RepoType::Dataset,
            PARQUET_REVISION.to_string(),
        );
        let repo = self.api.repo(repo);
        let info = repo
            .info()
            .map_err(|err| classify(dataset, split, Box::new(err)))?;
        let mut remote_files: Vec<String> = info
            .siblings
            .into_iter()
            .map(|sibling| sibling.rfilename)
            .filter(|rfilename| rfilename.ends_with(".parquet"))
            .collect();
        remote_files.sort();
        if remote_files.is_empty() {
            return Err(LoadError::NotFound {
                dataset: dataset.to_string(),
                source: None,
            });
        }
        let matching: Vec<String> = remote_files
            .into_iter()
            .filter(|rfilename| split_matches(rfilename, split))
            .collect();
        if matching.is_empty() {
            return Err(LoadError::InvalidArgument {
                dataset: dataset.to_string(),
                split: split.to_string(),
                source: None,
            });
        }
        let mut local_files = Vec::with_capacity(matching.len());
        for rfilename in &matching {
            debug!("fetching {rfilename} for '{dataset}'");
            let local = repo
                .get(rfilename)
                .map_err(|err| classify(dataset, split, Box::new(err)))?;
            local_files.push(local);
        }
        ParquetDataset::open(&local_files).map_err(|err| classify(dataset, split, Box::new(err)))
    }
}

fn default_cache_dir() -> PathBuf {
    if let Some(dir) = env::var_os(CACHE_DIR_ENV) {
        return PathBuf::from(dir);
    }
    dirs::cache_dir()
        .unwrap_or_else(env::temp_dir)
        .join("dataset-loader")
}

/// Whether a parquet file belongs to `split`, given its repo-relative name.
///
/// Handles both layouts found on the hub: per-split directories
/// (`default/test/0000.parquet`) and flat per-config files
/// (`wikitext-103-v1/wikitext-test.parquet`, sharded variants included).
fn split_matches(rfilename: &str, split: &str) -> bool {
    let mut segments: Vec<&str> = rfilename.split('/').collect();
    let filename = segments.pop().unwrap_or("");
    if segments.iter().any(|segment| *segment == split) {
        return true;
    }
    let stem = filename.strip_suffix(".parquet").unwrap_or(filename);
    stem == split
        || stem.starts_with(&format!("{split}-"))
        || stem.ends_with(&format!("-{split}"))
        || stem.contains(&format!("-{split}-"))
}

fn collect_parquet_files(dir: &Path, out: &mut Vec<PathBuf>) -> std::io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_parquet_files(&path, out)?;
        } else if path.extension().is_some_and(|ext| ext == "parquet") {
            out.push(path);
        }
    }
    Ok(())
}

fn relative_name(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let segments: Vec<String> = relative
        .components()
        .map(|component| component.as_os_str().to_string_lossy().into_owned())
        .collect();
    Some(segments.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ::parquet::data_type::{ByteArray, ByteArrayType};
    use ::parquet::file::properties::WriterProperties;
    use ::parquet::file::writer::SerializedFileWriter;
    use ::parquet::schema::parser::parse_message_type;
    use std::fs::File;
    use std::sync::Arc;

    fn write_rows(path: &Path, rows: &[&str]) {
        let schema = Arc::new(
            parse_message_type("message item { REQUIRED BYTE_ARRAY text (UTF8); }").unwrap(),
        );
        let properties = Arc::new(WriterProperties::builder().build());
        let file = File::create(path).unwrap();
        let mut writer = SerializedFileWriter::new(file, schema, properties).unwrap();
        let mut group = writer.next_row_group().unwrap();
        let mut column = group.next_column().unwrap().unwrap();
        let values: Vec<ByteArray> = rows.iter().map(|row| ByteArray::from(*row)).collect();
        column
            .typed::<ByteArrayType>()
            .write_batch(&values, None, None)
            .unwrap();
        column.close().unwrap();
        group.close().unwrap();
        writer.close().unwrap();
    }

    #[test]
    fn cache_dir_is_created_and_reusable() {
        let tmp = tempfile::tempdir().unwrap();
        let target = tmp.path().join("nested").join("cache");
        assert!(!target.exists());
        let loader = DatasetLoader::with_cache_dir(&target).unwrap();
        assert!(target.is_dir());
        assert!(loader.cache_dir().is_dir());
        DatasetLoader::with_cache_dir(&target).unwrap();
    }

    #[test]
    fn env_variable_supplies_default_cache_dir() {
        let tmp = tempfile::tempdir().unwrap();
        env::set_var(CACHE_DIR_ENV, tmp.path());
        assert_eq!(default_cache_dir(), tmp.path());
        env::remove_var(CACHE_DIR_ENV);
    }

    #[test]
    fn local_copy_wins_over_the_hub() {
        let tmp = tempfile::tempdir().unwrap();
        let loader = DatasetLoader::with_cache_dir(tmp.path()).unwrap();
        let dataset_dir = loader.cache_dir().join("weather-readings");
        fs::create_dir_all(&dataset_dir).unwrap();
        write_rows(
            &dataset_dir.join("weather-readings-test.parquet"),
            &["sunny", "cloudy", "rain"],
        );

        let dataset = loader.load("weather-readings", "test").unwrap();
        assert_eq!(dataset.len(), 3);
    }

    #[test]
    fn missing_split_in_local_copy_is_invalid() {
        let tmp = tempfile::tempdir().unwrap();
        let loader = DatasetLoader::with_cache_dir(tmp.path()).unwrap();
        let dataset_dir = loader.cache_dir().join("weather-readings");
        fs::create_dir_all(&dataset_dir).unwrap();
        write_rows(&dataset_dir.join("weather-readings-train.parquet"), &["sunny"]);

        let err = loader.load("weather-readings", "test").unwrap_err();
        match &err {
            LoadError::InvalidArgument { dataset, split, .. } => {
                assert_eq!(dataset, "weather-readings");
                assert_eq!(split, "test");
            }
            other => panic!("expected InvalidArgument, got {other:?}"),
        }
        let message = err.to_string();
        assert!(message.contains("weather-readings"));
        assert!(message.contains("test"));
    }

    #[test]
    fn local_copy_without_parquet_files_is_invalid() {
        let tmp = tempfile::tempdir().unwrap();
        let loader = DatasetLoader::with_cache_dir(tmp.path()).unwrap();
        fs::create_dir_all(loader.cache_dir().join("empty-dataset")).unwrap();

        let err = loader.load("empty-dataset", "test").unwrap_err();
        assert!(matches!(err, LoadError::InvalidArgument { .. }), "{err:?}");
    }

    #[test]
    fn split_matching_handles_hub_layouts() {
        assert!(split_matches("wikitext-103-raw-v1/wikitext-test.parquet", "test"));
        assert!(split_matches(
            "wikitext-103-raw-v1/wikitext-train-00000-of-00002.parquet",
            "train"
        ));
        assert!(split_matches("default/test/0000.parquet", "test"));
        assert!(split_matches("validation.parquet", "validation"));
        assert!(split_matches("train-00001-of-00002.parquet", "train"));
        assert!(!split_matches("wikitext-103-raw-v1/wikitext-test.parquet", "train"));
        assert!(!split_matches("default/train/0000.parquet", "test"));
        assert!(!split_matches("wikitext-validation.parquet", "valid"));
    }

    #[test]
    fn classification_picks_kinds_from_the_cause() {
        let refused: BoxedError = Box::new(std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            "connection refused",
        ));
        let err = classify("weather-readings", "test", refused);
        assert!(matches!(err, LoadError::Connectivity { .. }), "{err:?}");
        assert!(err.to_string().contains("weather-readings"));

        let missing: BoxedError = Box::new(std::io::Error::from(std::io::ErrorKind::NotFound));
        let err = classify("weather-readings", "test", missing);
        assert!(matches!(err, LoadError::NotFound { .. }), "{err:?}");

        // hf-hub reports http failures as boxed ureq errors.
        let response = ureq::Response::new(404, "Not Found", "").unwrap();
        let status: Box<ureq::Error> = Box::new(ureq::Error::Status(404, response));
        let err = classify("weather-readings", "test", Box::new(status));
        assert!(matches!(err, LoadError::NotFound { .. }), "{err:?}");

        let response = ureq::Response::new(400, "Bad Request", "").unwrap();
        let bad_request: BoxedError = Box::new(ureq::Error::Status(400, response));
        let err = classify("weather-readings", "dev", bad_request);
        assert!(matches!(err, LoadError::InvalidArgument { .. }), "{err:?}");
        let message = err.to_string();
        assert!(message.contains("weather-readings"));
        assert!(message.contains("dev"));
    }

    #[test]
    #[ignore = "downloads from the Hugging Face Hub"]
    fn downloads_wikitext_from_the_hub() {
        let tmp = tempfile::tempdir().unwrap();
        let loader = DatasetLoader::with_cache_dir(tmp.path()).unwrap();
        let dataset = loader.load("wikitext", "test").unwrap();
        assert!(!dataset.is_empty());
        let entries = fs::read_dir(loader.cache_dir()).unwrap().count();
        assert!(entries > 0);
    }

    #[test]
    #[ignore = "talks to the Hugging Face Hub"]
    fn unknown_dataset_is_not_found() {
        let tmp = tempfile::tempdir().unwrap();
        let loader = DatasetLoader::with_cache_dir(tmp.path()).unwrap();
        let err = loader
            .load("dataset-loader-no-such-dataset-0193", "test")
            .unwrap_err();
        assert!(matches!(err, LoadError::NotFound { .. }), "{err:?}");
        assert!(err.to_string().contains("dataset-loader-no-such-dataset-0193"));
    }

    #[test]
    #[ignore = "talks to the Hugging Face Hub"]
    fn unknown_split_is_invalid() {
        let tmp = tempfile::tempdir().unwrap();
        let loader = DatasetLoader::with_cache_dir(tmp.path()).unwrap();
        let err = loader.load("wikitext", "dev").unwrap_err();
        assert!(matches!(err, LoadError::InvalidArgument { .. }), "{err:?}");
        let message = err.to_string();
        assert!(message.contains("wikitext"));
        assert!(message.contains("dev"));
    }
}
