use std::env;
use std::path::PathBuf;
use std::sync::LazyLock;

use clap::{Parser, ValueEnum};
use regex::Regex;

use crate::error::SnapshotError;

pub const DEFAULT_API_BASE: &str = "https://compute.googleapis.com/compute/v1";
pub const DEFAULT_OUTPUT_FILE: &str = "snapshot.url";

/// Compute Engine limit for resource names.
pub const MAX_RESOURCE_NAME_LEN: usize = 63;

static RESOURCE_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z]([-a-z0-9]*[a-z0-9])?$").expect("valid resource name pattern")
});

/// CLI surface for the snapshot tool.
#[derive(Debug, Parser, Clone)]
#[command(
    name = "gce-snapshot",
    author,
    version,
    about = "Create a Compute Engine disk snapshot or find the latest one, writing its URL to a file"
)]
pub struct CliArgs {
    /// Create a new snapshot instead of looking up the latest existing one.
    #[arg(
        long = "create-backup",
        num_args = 0..=1,
        default_value_t = false,
        default_missing_value = "true",
        value_parser = clap::value_parser!(bool)
    )]
    pub create_backup: bool,

    /// Project that owns the snapshots.
    #[arg(long, value_name = "ID")]
    pub project: String,

    /// Region of a regional disk (also the default storage location).
    #[arg(long, value_name = "NAME")]
    pub region: Option<String>,

    /// Zone of a zonal disk.
    #[arg(long, value_name = "NAME")]
    pub zone: Option<String>,

    /// Name of the persistent disk.
    #[arg(long, value_name = "NAME")]
    pub disk: String,

    /// Project that owns the disk, when different from --project.
    #[arg(long = "disk-project", value_name = "ID")]
    pub disk_project: Option<String>,

    /// Explicit name for the new snapshot.
    #[arg(long = "snapshot-name", value_name = "NAME")]
    pub snapshot_name: Option<String>,

    /// Storage location for the new snapshot.
    #[arg(long = "storage-location", value_name = "LOCATION")]
    pub storage_location: Option<String>,

    /// File receiving the snapshot URL.
    #[arg(long, value_name = "FILE", default_value = DEFAULT_OUTPUT_FILE)]
    pub output: PathBuf,

    /// Rendering of log lines on stderr.
    #[arg(long = "log-format", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

/// Where the disk lives. Zonal and regional disks use different collections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiskLocation {
    Zone(String),
    Region(String),
}

impl DiskLocation {
    pub fn collection(&self) -> &'static str {
        match self {
            DiskLocation::Zone(_) => "zones",
            DiskLocation::Region(_) => "regions",
        }
    }

    pub fn name(&self) -> &str {
        match self {
            DiskLocation::Zone(name) | DiskLocation::Region(name) => name,
        }
    }

    /// Region containing the disk. Zone names are `<region>-<letter>`.
    pub fn region(&self) -> &str {
        match self {
            DiskLocation::Region(region) => region,
            DiskLocation::Zone(zone) => zone
                .rsplit_once('-')
                .map_or(zone.as_str(), |(region, _)| region),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskRef {
    pub project: String,
    pub location: DiskLocation,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Create {
        snapshot_name: Option<String>,
        storage_location: String,
    },
    Latest,
}

#[derive(Clone)]
pub struct Tunables {
    pub api_base: String,
    pub access_token: Option<String>,
    pub max_retries: usize,
    pub retry_backoff_ms: u64,
    pub operation_timeout_secs: u64,
    pub poll_interval_ms: u64,
    pub page_size: u32,
}

impl std::fmt::Debug for Tunables {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tunables")
            .field("api_base", &self.api_base)
            .field(
                "access_token",
                &self.access_token.as_ref().map(|_| "<redacted>"),
            )
            .field("max_retries", &self.max_retries)
            .field("retry_backoff_ms", &self.retry_backoff_ms)
            .field("operation_timeout_secs", &self.operation_timeout_secs)
            .field("poll_interval_ms", &self.poll_interval_ms)
            .field("page_size", &self.page_size)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct Paths {
    pub output: PathBuf,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub project: String,
    pub disk: DiskRef,
    pub action: Action,
    pub paths: Paths,
    pub tunables: Tunables,
}

impl CliArgs {
    pub fn resolve(self) -> Result<AppConfig, SnapshotError> {
        let tunables = Tunables::from_env()?;
        self.resolve_with(tunables)
    }

    pub fn resolve_with(self, tunables: Tunables) -> Result<AppConfig, SnapshotError> {
        let project = required("project", &self.project)?;
        validate_project(&project)?;
        let disk_name = required("disk", &self.disk)?;
        validate_resource_name("disk", &disk_name)?;

        let disk_project = match non_empty(self.disk_project.as_deref()) {
            Some(value) => {
                validate_project(&value)?;
                value
            }
            None => project.clone(),
        };

        let location = match (
            non_empty(self.zone.as_deref()),
            non_empty(self.region.as_deref()),
        ) {
            (None, None) => {
                return Err(SnapshotError::config(
                    "you need to specify --zone or --region",
                ));
            }
            (Some(_), Some(_)) => {
                return Err(SnapshotError::config(
                    "you can't set both --zone and --region",
                ));
            }
            (Some(zone), None) => DiskLocation::Zone(zone),
            (None, Some(region)) => DiskLocation::Region(region),
        };

        let action = if self.create_backup {
            let snapshot_name = match non_empty(self.snapshot_name.as_deref()) {
                Some(name) => {
                    validate_resource_name("snapshot-name", &name)?;
                    Some(name)
                }
                None => None,
            };
            let storage_location = non_empty(self.storage_location.as_deref())
                .unwrap_or_else(|| location.region().to_string());
            Action::Create {
                snapshot_name,
                storage_location,
            }
        } else {
            Action::Latest
        };

        let output = expand_path(&self.output)?;

        Ok(AppConfig {
            project,
            disk: DiskRef {
                project: disk_project,
                location,
                name: disk_name,
            },
            action,
            paths: Paths { output },
            tunables,
        })
    }
}

impl Tunables {
    pub fn from_env() -> Result<Self, SnapshotError> {
        Self::from_lookup(|var| env::var(var).ok())
    }

    pub fn from_lookup<L>(lookup: L) -> Result<Self, SnapshotError>
    where
        L: Fn(&str) -> Option<String>,
    {
        let api_base = lookup("GCE_SNAPSHOT_API_BASE")
            .filter(|value| !value.trim().is_empty())
            .map(|value| value.trim().trim_end_matches('/').to_string())
            .unwrap_or_else(|| DEFAULT_API_BASE.to_string());
        let access_token = lookup("GCE_SNAPSHOT_ACCESS_TOKEN")
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty());

        let max_retries = parse_env(&lookup, "GCE_SNAPSHOT_MAX_RETRIES", 3usize)?;
        let retry_backoff_ms = parse_env(&lookup, "GCE_SNAPSHOT_RETRY_BACKOFF_MS", 1_000u64)?;
        let operation_timeout_secs =
            parse_env(&lookup, "GCE_SNAPSHOT_OPERATION_TIMEOUT_SECS", 900u64)?;
        let poll_interval_ms = parse_env(&lookup, "GCE_SNAPSHOT_POLL_INTERVAL_MS", 1_000u64)?;
        let page_size = parse_env(&lookup, "GCE_SNAPSHOT_PAGE_SIZE", 500u32)?;
        if page_size == 0 {
            return Err(SnapshotError::config(
                "invalid value for GCE_SNAPSHOT_PAGE_SIZE: must be positive",
            ));
        }

        Ok(Self {
            api_base,
            access_token,
            max_retries,
            retry_backoff_ms,
            operation_timeout_secs,
            poll_interval_ms,
            page_size,
        })
    }
}

impl Default for Tunables {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            access_token: None,
            max_retries: 3,
            retry_backoff_ms: 1_000,
            operation_timeout_secs: 900,
            poll_interval_ms: 1_000,
            page_size: 500,
        }
    }
}

fn parse_env<L, T>(lookup: &L, var: &str, default: T) -> Result<T, SnapshotError>
where
    L: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(var) {
        Some(value) => value.trim().parse::<T>().map_err(|err| {
            SnapshotError::Config(format!("invalid value for {}: {}", var, err))
        }),
        None => Ok(default),
    }
}

pub fn is_valid_resource_name(name: &str) -> bool {
    name.len() <= MAX_RESOURCE_NAME_LEN && RESOURCE_NAME.is_match(name)
}

fn validate_resource_name(flag: &str, value: &str) -> Result<(), SnapshotError> {
    if is_valid_resource_name(value) {
        Ok(())
    } else {
        Err(SnapshotError::Config(format!(
            "--{flag} {value:?} is not a valid resource name \
             (lowercase letters, digits and dashes, at most {MAX_RESOURCE_NAME_LEN} characters)"
        )))
    }
}

// Domain-scoped project ids look like `example.com:my-project`.
fn validate_project(value: &str) -> Result<(), SnapshotError> {
    if value.contains('/') || value.chars().any(char::is_whitespace) {
        Err(SnapshotError::Config(format!(
            "{value:?} is not a valid project id"
        )))
    } else {
        Ok(())
    }
}

fn required(flag: &str, value: &str) -> Result<String, SnapshotError> {
    non_empty(Some(value))
        .ok_or_else(|| SnapshotError::Config(format!("missing required argument --{flag}")))
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

fn expand_path(path: &std::path::Path) -> Result<PathBuf, SnapshotError> {
    let raw = path.to_string_lossy();
    if raw.trim().is_empty() {
        return Err(SnapshotError::config("--output must not be empty"));
    }
    Ok(PathBuf::from(shellexpand::tilde(raw.as_ref()).into_owned()))
}
