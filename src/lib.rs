//! Transactional multidimensional variables grouped into datasets.
//!
//! A [`DataSet`] owns typed N-d [`Variable`]s. Writes go into per-variable
//! transactions and become visible together when the dataset commits; a
//! failed commit leaves every committed value untouched. Storage is behind
//! the [`Backend`] trait, with an in-memory backend and a CSV file backend.
//!
//! ```
//! let dir = tempfile::tempdir()?;
//! let path = dir.path().join("obs.csv");
//!
//! let ds = meridian::open(path.to_str().unwrap())?;
//! let temp = ds.add_variable::<f64>("temp", &["time"])?;
//! temp.put_data(None, vec![11.5, 12.0, 12.5])?;
//! ds.commit()?;
//!
//! let again = meridian::open(path.to_str().unwrap())?;
//! let temp = again.variable_by_name("temp")?;
//! assert_eq!(temp.get::<f64>(None, None)?.len(), 3);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
pub mod array;
pub mod backend;
pub mod consts;
pub mod csv;
pub mod dataset;
pub mod dtype;
pub mod error;
pub mod schema;
pub mod throttle;
pub mod variable;

pub use array::{ArrayBuffer, ArrayData, Element, Scalar};
pub use backend::{Backend, LoadedDataSet, MemoryBackend};
pub use csv::{CsvBackend, CsvOptions};
pub use dataset::{
    DataSet,
    commit::{CommitStage, commit_linked},
    coordinates::CoordinateSystem,
    events::{CommitEvent, RollbackEvent, Subscription},
};
pub use dtype::DataType;
pub use error::{Error, Result};
pub use schema::{Dimension, MetadataDictionary, Rectangle, SchemaVersion, VariableSchema};
pub use throttle::{Priority, Throttle};
pub use variable::{GLOBAL_METADATA_ID, Variable, VariableId, VariableKind, attributes::AttributeValue};

/// Open a dataset by URI.
///
/// `meridian:memory` gives an empty in-memory dataset. `meridian:csv?file=...`
/// and bare paths ending in `.csv` open a CSV file with the options the
/// URI carries.
///
/// # Errors
/// [`Error::NotSupported`] for unknown providers or options, plus whatever
/// [`CsvBackend::open`] reports.
pub fn open(uri: &str) -> Result<DataSet> {
    if uri == format!("{}:memory", consts::URI_SCHEME) {
        return Ok(DataSet::new());
    }
    let options = CsvOptions::from_uri(uri)?;
    let (backend, loaded) = CsvBackend::open(options)?;
    DataSet::with_backend(backend, Some(loaded))
}
