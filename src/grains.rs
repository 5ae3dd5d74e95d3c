//! Merges provider state and Terraform variables into the salt grains file.
//!
//! The merged facts are written as JSON to a uniquely named temporary file.
//! The file lives as long as the returned [`FactsFile`] and is removed when it
//! is dropped, so callers get cleanup on every exit path.

use std::io::{self, Write};

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};
use serde_json::{Map, Value};
use tempfile::NamedTempFile;
use thiserror::Error;

/// Remote location salt reads grains from.
pub const REMOTE_GRAINS_FILE: &str = "/etc/salt/grains";

const TEMP_PREFIX: &str = "tf-grain-content";

/// Flat mapping of fact names to structured values.
pub type FactSet = Map<String, Value>;

/// Errors raised while building the facts file.
#[derive(Debug, Error)]
pub enum FactsError {
    /// Raised when an input file cannot be read.
    #[error("failed to read {path}: {source}")]
    Io {
        /// File that could not be read.
        path: Utf8PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: io::Error,
    },
    /// Raised when the temporary facts file cannot be created or written.
    #[error("failed to write temporary grains file: {source}")]
    TempFile {
        /// Underlying I/O failure.
        #[source]
        source: io::Error,
    },
    /// Raised when an input does not decode to a mapping.
    #[error("failed to decode {origin}: {message}")]
    Decode {
        /// Name of the offending input.
        origin: String,
        /// Decoder message.
        message: String,
    },
}

/// Local grains file ready for upload.
#[derive(Debug)]
pub enum FactsFile {
    /// Merged facts in a temporary file, deleted on drop.
    Generated {
        /// Handle owning the temporary file.
        file: NamedTempFile,
        /// UTF-8 path of `file`.
        path: Utf8PathBuf,
    },
    /// A user-supplied file, left untouched.
    Provided(Utf8PathBuf),
}

impl FactsFile {
    /// Local path of the file.
    #[must_use]
    pub fn path(&self) -> &Utf8Path {
        match self {
            Self::Generated { path, .. } | Self::Provided(path) => path,
        }
    }

    /// Returns `true` when the file is removed once this value is dropped.
    #[must_use]
    pub const fn is_temporary(&self) -> bool {
        matches!(self, Self::Generated { .. })
    }
}

/// Converts the provider state into facts.
///
/// `null` is treated as an empty state.
///
/// # Errors
///
/// Returns [`FactsError::Decode`] when the state is not a JSON object.
pub fn decode_provider_state(state: &Value) -> Result<FactSet, FactsError> {
    match state {
        Value::Null => Ok(FactSet::new()),
        Value::Object(map) => Ok(map.clone()),
        other => Err(FactsError::Decode {
            origin: String::from("provider state"),
            message: format!("expected a JSON object, found {other}"),
        }),
    }
}

/// Decodes HCL variable assignments into facts. Blank input yields no facts.
///
/// # Errors
///
/// Returns [`FactsError::Decode`] when `input` is not valid HCL.
pub fn decode_variables(input: &str, origin: &str) -> Result<FactSet, FactsError> {
    if input.trim().is_empty() {
        return Ok(FactSet::new());
    }

    let decoded: Value = hcl::from_str(input).map_err(|err| FactsError::Decode {
        origin: origin.to_owned(),
        message: err.to_string(),
    })?;

    match decoded {
        Value::Object(map) => Ok(map),
        Value::Null => Ok(FactSet::new()),
        other => Err(FactsError::Decode {
            origin: origin.to_owned(),
            message: format!("expected variable assignments, found {other}"),
        }),
    }
}

/// Reads and decodes the variables file at `path`.
///
/// # Errors
///
/// Returns [`FactsError::Io`] when the file cannot be read and
/// [`FactsError::Decode`] when it is not valid HCL.
pub fn read_variables(path: &Utf8Path) -> Result<FactSet, FactsError> {
    let input = read_to_string_ambient(path).map_err(|source| FactsError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    decode_variables(&input, path.as_str())
}

/// Merges two fact sets; keys from `overrides` win.
#[must_use]
pub fn merge_facts(base: FactSet, overrides: FactSet) -> FactSet {
    let mut merged = base;
    merged.extend(overrides);
    merged
}

/// Builds the grains file from `provider_state` and the variables file at
/// `variables_path`.
///
/// # Errors
///
/// Fails when either input cannot be read or decoded, or when the temporary
/// file cannot be written. No file is left behind on failure.
pub fn build_facts(
    provider_state: &Value,
    variables_path: &Utf8Path,
) -> Result<FactsFile, FactsError> {
    let provider = decode_provider_state(provider_state)?;
    let variables = read_variables(variables_path)?;
    let facts = merge_facts(provider, variables);
    tracing::debug!(keys = facts.len(), "merged grains");
    write_facts(&facts)
}

/// Reads the provider state JSON document at `path`.
///
/// # Errors
///
/// Returns [`FactsError::Io`] when the file cannot be read and
/// [`FactsError::Decode`] when it is not JSON.
pub fn load_provider_state(path: &Utf8Path) -> Result<Value, FactsError> {
    let input = read_to_string_ambient(path).map_err(|source| FactsError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&input).map_err(|err| FactsError::Decode {
        origin: path.to_string(),
        message: err.to_string(),
    })
}

fn write_facts(facts: &FactSet) -> Result<FactsFile, FactsError> {
    let temp_error = |source| FactsError::TempFile { source };
    let mut file = tempfile::Builder::new()
        .prefix(TEMP_PREFIX)
        .tempfile()
        .map_err(temp_error)?;
    serde_json::to_writer(&mut file, facts).map_err(|err| temp_error(err.into()))?;
    file.flush().map_err(temp_error)?;
    let path = Utf8PathBuf::from_path_buf(file.path().to_path_buf())
        .map_err(|raw| temp_error(io::Error::other(format!("non-UTF-8 path {}", raw.display()))))?;
    Ok(FactsFile::Generated { file, path })
}

/// Reads `path` through its parent directory. Symlinks are resolved first
/// so a link to a file elsewhere still reads.
fn read_to_string_ambient(path: &Utf8Path) -> io::Result<String> {
    let resolved = path.canonicalize_utf8()?;
    let (Some(parent), Some(name)) = (resolved.parent(), resolved.file_name()) else {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{path} does not name a file"),
        ));
    };

    let dir = Dir::open_ambient_dir(parent, ambient_authority())?;
    dir.read_to_string(name)
}
