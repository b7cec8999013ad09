//! Settings and filesystem locations shared by every vibecodr crate.

pub mod config_loader;

pub use config_loader::{ConfigLoadError, Settings, SettingsLoader};

use std::path::PathBuf;

/// Directory name used under the per-user config root.
pub const PRODUCT_DIR: &str = "vibecodr";

/// Production platform API.
pub const DEFAULT_API_BASE: &str = "https://api.vibecodr.space";

/// Production player (viewer) site.
pub const DEFAULT_PLAYER_BASE: &str = "https://vibecodr.space";

/// Per-user configuration root for the product.
///
/// `%APPDATA%\vibecodr` on Windows, `~/.config/vibecodr` everywhere else
/// (macOS included, so the desktop and CLI tools agree on one location).
pub fn product_config_dir() -> Option<PathBuf> {
    #[cfg(windows)]
    {
        dirs::config_dir().map(|dir| dir.join(PRODUCT_DIR))
    }
    #[cfg(not(windows))]
    {
        dirs::home_dir().map(|home| home.join(".config").join(PRODUCT_DIR))
    }
}
