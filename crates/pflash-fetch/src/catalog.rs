use std::{
    fs,
    path::{Path, PathBuf},
};

use pflash_util::{normalize_name, Config};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::artifacts::{ArchiveKind, DownloadSpec};

const CATALOG_ENV: &str = "PFLASH_DRIVER_CATALOG";
const HOST_OVERRIDE_ENV: &str = "PFLASH_HOST_OS";
const PLATFORM_TOOLS_BASE: &str = "https://dl.google.com/android/repository";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DriverPackage {
    Zip,
    Exe,
}

impl DriverPackage {
    pub fn extension(self) -> &'static str {
        match self {
            DriverPackage::Zip => "zip",
            DriverPackage::Exe => "exe",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverSource {
    pub name: String,
    pub package: DriverPackage,
    pub urls: Vec<String>,
    pub fallback_url: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Catalog {
    pub schema_version: u32,
    pub drivers: Vec<DriverSource>,
}

impl Default for Catalog {
    fn default() -> Self {
        Self {
            schema_version: 1,
            drivers: Vec::new(),
        }
    }
}

impl Catalog {
    pub fn driver(&self, name: &str) -> Option<&DriverSource> {
        let key = normalize_name(name);
        self.drivers
            .iter()
            .find(|driver| normalize_name(&driver.name) == key)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.drivers.iter().map(|driver| driver.name.as_str())
    }

    /// One download per driver, in catalog order.
    pub fn all_download_specs(&self, cfg: &Config) -> Vec<DownloadSpec> {
        self.drivers
            .iter()
            .map(|driver| driver.download_spec(cfg))
            .collect()
    }
}

impl DriverSource {
    pub fn dir_name(&self) -> String {
        normalize_name(&self.name)
    }

    pub fn driver_dir(&self, cfg: &Config) -> PathBuf {
        cfg.drivers_dir().join(self.dir_name())
    }

    pub fn download_path(&self, cfg: &Config) -> PathBuf {
        self.driver_dir(cfg)
            .join(format!("{}.{}", self.dir_name(), self.package.extension()))
    }

    /// Zip packages are extracted next to the download; installers are saved as-is.
    pub fn download_spec(&self, cfg: &Config) -> DownloadSpec {
        let mut spec = DownloadSpec::new(self.urls.clone(), self.download_path(cfg))
            .with_fallback(self.fallback_url.clone());
        if self.package == DriverPackage::Zip {
            spec.archive = ArchiveKind::Zip;
            spec.extract_to = Some(self.driver_dir(cfg));
        }
        spec
    }

    /// First installer executable in the driver directory. Zip packages are
    /// installed through the OS device manager, so they have none.
    pub fn installer_for(&self, cfg: &Config) -> Option<PathBuf> {
        if self.package != DriverPackage::Exe {
            return None;
        }
        find_installer(&self.driver_dir(cfg))
    }
}

pub fn find_installer(dir: &Path) -> Option<PathBuf> {
    let entries = fs::read_dir(dir).ok()?;
    let mut installers: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.is_file()
                && path
                    .extension()
                    .is_some_and(|ext| ext.eq_ignore_ascii_case("exe"))
        })
        .collect();
    installers.sort();
    installers.into_iter().next()
}

/// Built-in catalog, unless `PFLASH_DRIVER_CATALOG` names a JSON override.
pub fn load_catalog() -> Catalog {
    match std::env::var_os(CATALOG_ENV) {
        Some(path) => load_catalog_from(Path::new(&path)),
        None => default_catalog(),
    }
}

/// Falls back to the built-in catalog when `path` is unreadable or invalid.
pub fn load_catalog_from(path: &Path) -> Catalog {
    match fs::read_to_string(path) {
        Ok(raw) => match serde_json::from_str::<Catalog>(&raw) {
            Ok(catalog) => return catalog,
            Err(err) => warn!("Failed to parse catalog {}: {}", path.display(), err),
        },
        Err(err) => warn!("Failed to read catalog {}: {}", path.display(), err),
    }
    default_catalog()
}

pub fn default_catalog() -> Catalog {
    let driver = |name: &str, package: DriverPackage, url: &str, fallback: &str| DriverSource {
        name: name.into(),
        package,
        urls: vec![url.into()],
        fallback_url: fallback.into(),
    };
    Catalog {
        schema_version: 1,
        drivers: vec![
            driver(
                "Google (Pixel) USB Driver",
                DriverPackage::Zip,
                "https://dl.google.com/android/repository/latest_usb_driver_windows.zip",
                "https://developer.android.com/studio/run/win-usb",
            ),
            driver(
                "Samsung USB Driver",
                DriverPackage::Exe,
                "https://developer.samsung.com/assets/shared/contents/file/SAMSUNG_USB_Driver_for_Mobile_Phones.exe",
                "https://developer.samsung.com/android-usb-driver",
            ),
            driver(
                "LG USB Driver",
                DriverPackage::Exe,
                "https://www.lg.com/us/support/assets/software/Drivers/LGMobileDriver_WHQL_Ver_4.9.9.exe",
                "https://www.lg.com/us/support/help-library/lg-mobile-drivers-20150771213855",
            ),
            driver(
                "OnePlus USB Driver",
                DriverPackage::Exe,
                "https://download.oneplus.com/OnePlus_USB_Drivers_Setup.exe",
                "https://www.oneplus.com/support/softwareupgrade",
            ),
        ],
    }
}

/// Platform name used in Google's platform-tools archive names.
pub fn host_key() -> &'static str {
    if let Ok(value) = std::env::var(HOST_OVERRIDE_ENV) {
        match value.trim().to_ascii_lowercase().as_str() {
            "windows" => return "windows",
            "darwin" | "macos" => return "darwin",
            "linux" => return "linux",
            other => warn!("Ignoring {HOST_OVERRIDE_ENV}={other}"),
        }
    }
    match std::env::consts::OS {
        "windows" => "windows",
        "macos" => "darwin",
        _ => "linux",
    }
}

pub fn platform_tools_url(host: &str) -> String {
    format!("{PLATFORM_TOOLS_BASE}/platform-tools-latest-{host}.zip")
}

/// Download of the latest platform tools, extracted into the tools directory.
pub fn platform_tools_spec(cfg: &Config) -> DownloadSpec {
    let host = host_key();
    DownloadSpec::new(
        vec![platform_tools_url(host)],
        cfg.downloads_dir()
            .join(format!("platform-tools-latest-{host}.zip")),
    )
    .zip(cfg.tools_dir())
}
