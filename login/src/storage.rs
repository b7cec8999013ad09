//! Reading and atomically writing the credential file.

use std::io::Write;
use std::path::Path;
use std::path::PathBuf;

use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::error::LoginError;
use crate::permissions::PermissionCheck;
use crate::permissions::check_owner_only;
use crate::permissions::restrict_to_owner;
use crate::record::CredentialRecord;

/// File name of the credential record inside the product config directory.
pub const CREDENTIALS_FILE: &str = "cli.json";

/// Default credential location for this user.
pub fn default_credentials_path() -> Option<PathBuf> {
    vibecodr_common::product_config_dir().map(|dir| dir.join(CREDENTIALS_FILE))
}

/// A validated credential path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigPath {
    pub path: PathBuf,
    /// The path lives outside the expected config directory.
    pub non_standard: bool,
}

/// Validate a caller-supplied credential path.
///
/// The file must use a `.json` suffix. Paths outside the product config
/// directory are accepted but flagged.
pub fn validate_config_path(path: &Path) -> Result<ConfigPath, LoginError> {
    let invalid = |reason: &str| LoginError::ConfigPathInvalid {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    };

    if path.as_os_str().is_empty() {
        return Err(invalid("path is empty"));
    }
    let is_json = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
    if !is_json {
        return Err(invalid("credential files must use a .json suffix"));
    }
    if path.file_stem().is_none_or(|stem| stem.is_empty()) {
        return Err(invalid("file name is empty"));
    }

    let non_standard = match vibecodr_common::product_config_dir() {
        Some(dir) => !path.starts_with(&dir),
        None => true,
    };
    if non_standard {
        warn!(
            path = %path.display(),
            "credential file is outside the standard config directory"
        );
    }

    Ok(ConfigPath {
        path: path.to_path_buf(),
        non_standard,
    })
}

/// Owner-restricted storage for one [`CredentialRecord`].
#[derive(Debug, Clone)]
pub struct CredentialStore {
    path: PathBuf,
}

impl CredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store at `path` after validation, or at the default location.
    pub fn open(path: Option<&Path>) -> Result<Self, LoginError> {
        match path {
            Some(path) => Ok(Self::new(validate_config_path(path)?.path)),
            None => default_credentials_path()
                .map(Self::new)
                .ok_or_else(|| LoginError::ConfigPathInvalid {
                    path: PathBuf::from(CREDENTIALS_FILE),
                    reason: "cannot determine the user's config directory".to_string(),
                }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the record, refusing files other users can access.
    ///
    /// Returns `Ok(None)` when no record exists.
    pub fn load(&self) -> Result<Option<CredentialRecord>, LoginError> {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(LoginError::ConfigRead {
                    path: self.path.clone(),
                    message: err.to_string(),
                });
            }
        };

        match check_owner_only(&self.path) {
            PermissionCheck::OwnerOnly => {}
            PermissionCheck::Insecure { detail } => {
                return Err(LoginError::InsecurePermissions {
                    path: self.path.clone(),
                    detail,
                });
            }
            PermissionCheck::Unknown { reason } => {
                warn!(
                    path = %self.path.display(),
                    %reason,
                    "could not verify credential file permissions; trusting it"
                );
            }
        }

        let record = serde_json::from_str(&contents).map_err(|err| LoginError::ConfigRead {
            path: self.path.clone(),
            message: format!("malformed credential record: {err}"),
        })?;
        Ok(Some(record))
    }

    /// Replace the record atomically: temp sibling, fsync, rename.
    pub fn save(&self, record: &CredentialRecord) -> Result<(), LoginError> {
        let write_err = |message: String| LoginError::ConfigWrite {
            path: self.path.clone(),
            message,
        };

        let dir = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };
        create_private_dir(&dir).map_err(|err| write_err(err.to_string()))?;

        let json = serde_json::to_vec_pretty(record).map_err(|err| write_err(err.to_string()))?;

        // NamedTempFile is created 0600 on Unix.
        let mut tmp =
            tempfile::NamedTempFile::new_in(&dir).map_err(|err| write_err(err.to_string()))?;
        tmp.write_all(&json)
            .and_then(|()| tmp.as_file().sync_all())
            .map_err(|err| write_err(err.to_string()))?;
        #[cfg(unix)]
        restrict_to_owner(tmp.path()).map_err(write_err)?;

        tmp.persist(&self.path)
            .map_err(|err| write_err(err.error.to_string()))?;

        #[cfg(not(unix))]
        if let Err(reason) = restrict_to_owner(&self.path) {
            warn!(
                path = %self.path.display(),
                %reason,
                "could not restrict credential file to the current user"
            );
        }

        debug!(path = %self.path.display(), "credential record saved");
        Ok(())
    }

    /// Delete the record. Returns whether a file was removed.
    pub fn clear(&self) -> Result<bool, LoginError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                info!(path = %self.path.display(), "credential record removed");
                Ok(true)
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(LoginError::ConfigWrite {
                path: self.path.clone(),
                message: err.to_string(),
            }),
        }
    }
}

fn create_private_dir(dir: &Path) -> std::io::Result<()> {
    if dir.is_dir() {
        return Ok(());
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        std::fs::DirBuilder::new()
            .recursive(true)
            .mode(0o700)
            .create(dir)
    }
    #[cfg(not(unix))]
    {
        std::fs::create_dir_all(dir)
    }
}
