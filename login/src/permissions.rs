//! Owner-only access checks for the credential file.
//!
//! Unix inspects mode bits. Windows shells out to `icacls` and inspects the
//! ACL entries; the parser is platform-independent so it can be tested anywhere.

use std::path::Path;

/// Outcome of inspecting a credential file's access rights.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PermissionCheck {
    /// Only the owner (and the OS itself) can read the file.
    OwnerOnly,
    /// Someone else can read or write it.
    Insecure { detail: String },
    /// The check could not run.
    Unknown { reason: String },
}

/// Inspect `path` for group/world access.
pub fn check_owner_only(path: &Path) -> PermissionCheck {
    imp::check_owner_only(path)
}

/// Restrict `path` to the current user: mode 0600 on Unix, an owner-only
/// ACL on Windows, a no-op elsewhere.
pub fn restrict_to_owner(path: &Path) -> Result<(), String> {
    imp::restrict_to_owner(path)
}

/// Principals that may always appear in a Windows ACL.
const TRUSTED_PRINCIPALS: &[&str] = &[
    "nt authority\\system",
    "system",
    "builtin\\administrators",
    "administrators",
];

/// Parse `icacls` output and return the ACL entries granted to anyone other
/// than `user` or the built-in system principals.
pub fn insecure_acl_entries(output: &str, path: &str, user: &str) -> Vec<String> {
    let user = user.to_ascii_lowercase();
    let bare_user = user.rsplit('\\').next().unwrap_or(&user).to_string();

    output
        .lines()
        .filter_map(|line| {
            let line = line.strip_prefix(path).unwrap_or(line).trim();
            let (principal, _rights) = line.split_once(":(")?;
            Some((principal.trim().to_string(), line.to_string()))
        })
        .filter(|(principal, _)| {
            let lower = principal.to_ascii_lowercase();
            let bare = lower.rsplit('\\').next().unwrap_or(&lower);
            !(lower == user || bare == bare_user || TRUSTED_PRINCIPALS.contains(&lower.as_str()))
        })
        .map(|(_, entry)| entry)
        .collect()
}

#[cfg(unix)]
mod imp {
    use super::PermissionCheck;
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;

    pub(super) fn check_owner_only(path: &Path) -> PermissionCheck {
        match std::fs::metadata(path) {
            Ok(meta) => {
                let mode = meta.permissions().mode();
                if mode & 0o077 == 0 {
                    PermissionCheck::OwnerOnly
                } else {
                    PermissionCheck::Insecure {
                        detail: format!("mode {:o}", mode & 0o777),
                    }
                }
            }
            Err(err) => PermissionCheck::Unknown {
                reason: err.to_string(),
            },
        }
    }

    pub(super) fn restrict_to_owner(path: &Path) -> Result<(), String> {
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
            .map_err(|err| err.to_string())
    }
}

#[cfg(windows)]
mod imp {
    use super::PermissionCheck;
    use super::insecure_acl_entries;
    use std::path::Path;
    use std::process::Command;

    fn current_user() -> Option<String> {
        let user = std::env::var("USERNAME").ok()?;
        Some(match std::env::var("USERDOMAIN") {
            Ok(domain) if !domain.is_empty() => format!("{domain}\\{user}"),
            _ => user,
        })
    }

    pub(super) fn check_owner_only(path: &Path) -> PermissionCheck {
        let Some(user) = current_user() else {
            return PermissionCheck::Unknown {
                reason: "cannot determine current user".to_string(),
            };
        };
        let output = match Command::new("icacls").arg(path).output() {
            Ok(output) if output.status.success() => output,
            Ok(output) => {
                return PermissionCheck::Unknown {
                    reason: format!("icacls exited with {}", output.status),
                };
            }
            Err(err) => {
                return PermissionCheck::Unknown {
                    reason: err.to_string(),
                };
            }
        };
        let text = String::from_utf8_lossy(&output.stdout);
        let entries = insecure_acl_entries(&text, &path.display().to_string(), &user);
        if entries.is_empty() {
            PermissionCheck::OwnerOnly
        } else {
            PermissionCheck::Insecure {
                detail: entries.join("; "),
            }
        }
    }

    pub(super) fn restrict_to_owner(path: &Path) -> Result<(), String> {
        let user = current_user().ok_or_else(|| "cannot determine current user".to_string())?;
        let output = Command::new("icacls")
            .arg(path)
            .arg("/inheritance:r")
            .arg("/grant:r")
            .arg(format!("{user}:F"))
            .output()
            .map_err(|err| err.to_string())?;
        if output.status.success() {
            Ok(())
        } else {
            Err(format!("icacls exited with {}", output.status))
        }
    }
}

#[cfg(not(any(unix, windows)))]
mod imp {
    use super::PermissionCheck;
    use std::path::Path;

    pub(super) fn check_owner_only(_path: &Path) -> PermissionCheck {
        PermissionCheck::Unknown {
            reason: "permission checks are not supported on this platform".to_string(),
        }
    }

    pub(super) fn restrict_to_owner(_path: &Path) -> Result<(), String> {
        Ok(())
    }
}
