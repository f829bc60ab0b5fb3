//! CSV file backend.
//!
//! A dataset is stored as one delimited text file: an optional header line,
//! the data rows, and after a blank line the metadata tables described in
//! [`tables`]. Precommit renders the whole image into a temporary file next
//! to the target; commit renames it into place.
//!
//! ```no_run
//! use meridian::csv::{CsvBackend, CsvOptions, OpenMode};
//! use meridian::DataSet;
//!
//! let options = CsvOptions::new("obs.csv").with_open_mode(OpenMode::OpenOrCreate);
//! let (backend, loaded) = CsvBackend::open(options)?;
//! let ds = DataSet::with_backend(backend, Some(loaded))?;
//! let t = ds.add_variable::<f64>("temp", &["time"])?;
//! t.put_data(None, vec![11.5, 12.0])?;
//! ds.commit()?;
//! # Ok::<(), meridian::Error>(())
//! ```
use std::{
    fs,
    io::{self, ErrorKind, Seek, Write},
    path::{Path, PathBuf},
    thread,
};

use tempfile::{NamedTempFile, PersistError};
use tracing::{debug, info, warn};

use crate::{
    backend::{Backend, DataSetImage, LoadedDataSet},
    consts::{RENAME_ATTEMPTS, RENAME_RETRY_DELAY, TEMP_SUFFIX},
    error::{Error, Result},
};

pub mod error;
pub mod infer;
pub mod options;
pub(crate) mod reader;
pub(crate) mod tables;
pub mod tokenizer;
pub(crate) mod writer;

pub use error::CsvError;
pub use options::{CsvOptions, Culture, OpenMode, Separator};

use tables::Descriptor;

/// Whether a failed rename is worth retrying: the target is held open.
fn is_locked(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        ErrorKind::PermissionDenied | ErrorKind::ResourceBusy | ErrorKind::WouldBlock
    ) || (cfg!(windows) && matches!(err.raw_os_error(), Some(5 | 32 | 33)))
}

/// Rename the staged file onto `target` with `rename`, retrying while the
/// target is locked.
fn persist_with(
    target: &Path,
    mut file: NamedTempFile,
    mut rename: impl FnMut(NamedTempFile, &Path) -> std::result::Result<(), PersistError>,
) -> Result<()> {
    let mut attempt = 1;
    loop {
        match rename(file, target) {
            Ok(()) => return Ok(()),
            Err(err) if is_locked(&err.error) && attempt < RENAME_ATTEMPTS => {
                warn!(
                    file = %target.display(),
                    attempt,
                    error = %err.error,
                    "target locked, retrying rename"
                );
                attempt += 1;
                thread::sleep(RENAME_RETRY_DELAY);
                file = err.file;
            }
            Err(err) => {
                // Dropping the returned handle removes the staged file.
                return Err(Error::CommitIo {
                    path: target.to_path_buf(),
                    source: err.error,
                });
            }
        }
    }
}

fn overwrite(file: &mut fs::File, bytes: &[u8]) -> io::Result<()> {
    file.set_len(0)?;
    file.rewind()?;
    file.write_all(bytes)?;
    file.sync_all()
}

pub struct CsvBackend {
    options: CsvOptions,
    culture: Culture,
    /// Image written by precommit, kept for the rest of the transaction.
    staged: Option<NamedTempFile>,
    staged_layout: Option<Vec<Descriptor>>,
    /// Layout of the durable file, used to read it back when it carries no
    /// descriptor table.
    layout: Option<Vec<Descriptor>>,
}

impl std::fmt::Debug for CsvBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CsvBackend")
            .field("file", &self.options.file)
            .field("open_mode", &self.options.open_mode)
            .field("staged", &self.staged.as_ref().map(NamedTempFile::path))
            .finish_non_exhaustive()
    }
}

impl CsvBackend {
    /// Open the file named by `options` according to its open mode.
    ///
    /// # Errors
    /// [`Error::NotFound`] when `open`/`readOnly` find no file,
    /// [`Error::InvalidArgument`] when `createNew` finds one, and
    /// [`CsvError`] when the existing file does not parse.
    pub fn open(options: CsvOptions) -> Result<(Self, LoadedDataSet)> {
        let culture = options.resolve_culture()?;
        let path = options.file.clone();
        let exists = path.try_exists()?;
        let loaded = match options.open_mode {
            OpenMode::CreateNew => {
                if exists {
                    return Err(Error::InvalidArgument(format!(
                        "`{}` already exists",
                        path.display()
                    )));
                }
                fs::File::create_new(&path)?;
                LoadedDataSet::default()
            }
            OpenMode::Create => {
                fs::File::create(&path)?;
                LoadedDataSet::default()
            }
            OpenMode::Open | OpenMode::ReadOnly if !exists => {
                return Err(Error::NotFound(path.display().to_string()));
            }
            OpenMode::OpenOrCreate if !exists => LoadedDataSet::default(),
            OpenMode::Open | OpenMode::ReadOnly | OpenMode::OpenOrCreate => {
                let text = fs::read_to_string(&path)?;
                reader::read(&text, &options, &culture, None)?
            }
        };
        info!(
            file = %path.display(),
            mode = %options.open_mode,
            variables = loaded.variables.len(),
            "opened csv"
        );
        let backend = Self {
            options,
            culture,
            staged: None,
            staged_layout: None,
            layout: None,
        };
        Ok((backend, loaded))
    }

    pub fn options(&self) -> &CsvOptions {
        &self.options
    }

    pub fn path(&self) -> &Path {
        &self.options.file
    }

    fn directory(&self) -> PathBuf {
        match self.options.file.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }

    fn new_staged_file(&self) -> Result<NamedTempFile> {
        let dir = self.directory();
        fs::create_dir_all(&dir)?;
        let prefix = format!(
            "{}.",
            self.options
                .file
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default()
        );
        let suffix = format!(".{TEMP_SUFFIX}");
        Ok(tempfile::Builder::new()
            .prefix(&prefix)
            .suffix(&suffix)
            .tempfile_in(&dir)?)
    }

    fn discard_staged(&mut self) {
        if let Some(file) = self.staged.take() {
            debug!(temp = %file.path().display(), "discarding staged image");
        }
        self.staged_layout = None;
    }
}

impl Backend for CsvBackend {
    fn uri(&self) -> String {
        self.options.to_uri()
    }

    fn is_read_only(&self) -> bool {
        self.options.open_mode == OpenMode::ReadOnly
    }

    fn precommit(&mut self, image: &DataSetImage<'_>) -> Result<()> {
        if self.is_read_only() {
            return Err(Error::ReadOnly(self.uri()));
        }
        let (text, layout) = writer::write(image, &self.options);
        let mut file = match self.staged.take() {
            Some(file) => file,
            None => self.new_staged_file()?,
        };
        let written = overwrite(file.as_file_mut(), text.as_bytes());
        debug!(
            temp = %file.path().display(),
            bytes = text.len(),
            variables = image.variables.len(),
            "staged csv image"
        );
        self.staged = Some(file);
        written?;
        self.staged_layout = Some(layout);
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        let Some(file) = self.staged.take() else {
            return Err(Error::InternalConsistency(
                "csv commit without a staged image".into(),
            ));
        };
        let layout = self.staged_layout.take();
        persist_with(&self.options.file, file, |file, target| file.persist(target).map(|_| ()))?;
        self.layout = layout;
        info!(file = %self.options.file.display(), "csv committed");
        Ok(())
    }

    fn rollback(&mut self) -> Result<Option<LoadedDataSet>> {
        self.discard_staged();
        let text = match fs::read_to_string(&self.options.file) {
            Ok(text) => text,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Ok(Some(LoadedDataSet::default()));
            }
            Err(err) => return Err(err.into()),
        };
        let loaded = reader::read(&text, &self.options, &self.culture, self.layout.as_deref())?;
        Ok(Some(loaded))
    }

    fn close(&mut self) {
        self.discard_staged();
    }
}
