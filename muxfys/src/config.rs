//! Mount configuration and AWS-style environment discovery.

use crate::accessor::RemoteAccessor;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

/// Default S3 host when no config file specifies `host_base`.
const DEFAULT_DOMAIN: &str = "s3.amazonaws.com";

/// Configuration errors surfaced from [`Target::read_environment`] and
/// mount-point handling.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read_environment requires a path")]
    PathRequired,

    #[error("no config files defined profile {0}")]
    UnknownProfile(String),

    #[error("cannot expand [{0}]: only ~/ paths are supported")]
    BadHomePath(String),

    #[error("failed to load {}: {source}", path.display())]
    Ini {
        path: PathBuf,
        #[source]
        source: ini::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Configuration of a mount.
#[derive(Clone, Default)]
pub struct Config {
    /// The local directory to mount on top of (created if it doesn't
    /// exist; must be empty). Defaults to the subdirectory `mnt` in the
    /// current working directory.
    pub mount: String,

    /// Times to automatically retry failed remote requests. The default of
    /// 0 means don't retry; at least 3 is recommended.
    pub retries: u32,

    /// Base directory for auto-created target cache directories. Defaults
    /// to the current working directory.
    pub cache_base: String,

    /// When true, every remote request gets an entry in `logs()` output;
    /// errors always appear there.
    pub verbose: bool,

    /// What to mount. More than one target multiplexes several buckets or
    /// sub-paths onto the one mount point; only one may be writeable.
    pub targets: Vec<Target>,
}

/// One remote target (bucket and optional sub-path), plus its caching and
/// write policy.
#[derive(Clone, Default)]
pub struct Target {
    /// Full URL of the bucket and possible sub-path, e.g.
    /// `https://cog.domain.com/bucket/subpath`. For performance, specify
    /// the deepest sub-path that holds all your files.
    pub target: String,

    /// Region, if a specific one is needed. The client uses its default
    /// otherwise.
    pub region: String,

    pub access_key: String,
    pub secret_key: String,

    /// Cache remote bytes read through the mount on local disk. Writes
    /// also require staging on local disk, so `write` implies this.
    pub cache_data: bool,

    /// Directory used to cache data. Defining this implies `cache_data`.
    /// When unset but caching is on, a unique temporary directory is
    /// created under the config's `cache_base` and deleted on unmount.
    pub cache_dir: String,

    /// Enable write operations through the mount. Implies `cache_data`.
    pub write: bool,

    /// Accessor to use instead of constructing an S3 client from the
    /// fields above. This is the seam for mounting local directories and
    /// for test doubles.
    pub accessor: Option<Arc<dyn RemoteAccessor>>,
}

impl Target {
    /// A target served by an explicit accessor rather than an S3 client.
    pub fn with_accessor(accessor: Arc<dyn RemoteAccessor>) -> Self {
        Self {
            accessor: Some(accessor),
            ..Default::default()
        }
    }

    /// Whether this target stages data on local disk, after applying the
    /// `write ⇒ cache_data` and `cache_dir ⇒ cache_data` derivations.
    pub fn effective_cache_data(&self) -> bool {
        self.cache_data || !self.cache_dir.is_empty() || self.write
    }

    /// Fill in `target`, `access_key`, `secret_key` and possibly `region`
    /// from the standard S3 configuration environment.
    ///
    /// Values come primarily from the given profile section of `~/.s3cfg`
    /// (s3cmd's config file); missing values are taken in turn from the
    /// file named by `$AWS_SHARED_CREDENTIALS_FILE` (or
    /// `~/.aws/credentials`) and `$AWS_CONFIG_FILE` (or `~/.aws/config`),
    /// with `~/.awssecret` (`ACCESS:SECRET` on one line) as a last resort.
    /// `$AWS_ACCESS_KEY_ID`, `$AWS_SECRET_ACCESS_KEY` and
    /// `$AWS_DEFAULT_REGION` always win over file contents. An empty
    /// `profile` argument resolves through `$AWS_DEFAULT_PROFILE` and
    /// `$AWS_PROFILE` before falling back to `"default"`; since public
    /// buckets need no credentials, finding nothing is then not an error.
    ///
    /// `path` should at least name the bucket, and ideally the deepest
    /// sub-path holding the files to be accessed.
    pub fn read_environment(&mut self, profile: &str, path: &str) -> Result<(), ConfigError> {
        if path.is_empty() {
            return Err(ConfigError::PathRequired);
        }

        let mut profile = profile.to_string();
        let mut profile_specified = true;
        if profile.is_empty() {
            profile = env_or("AWS_DEFAULT_PROFILE", "");
            if profile.is_empty() {
                profile = env_or("AWS_PROFILE", "");
            }
            if profile.is_empty() {
                profile = "default".to_string();
                profile_specified = false;
            }
        }

        let mut sources = Vec::new();
        if let Some(home) = dirs::home_dir() {
            sources.push(home.join(".s3cfg"));
        }
        match std::env::var("AWS_SHARED_CREDENTIALS_FILE") {
            Ok(path) if !path.is_empty() => sources.push(expand_tilde(&path)?),
            _ => {
                if let Some(home) = dirs::home_dir() {
                    sources.push(home.join(".aws/credentials"));
                }
            }
        }
        match std::env::var("AWS_CONFIG_FILE") {
            Ok(path) if !path.is_empty() => sources.push(expand_tilde(&path)?),
            _ => {
                if let Some(home) = dirs::home_dir() {
                    sources.push(home.join(".aws/config"));
                }
            }
        }

        let mut https = false;
        let mut domain = String::new();
        let mut region = String::new();
        let mut key = String::new();
        let mut secret = String::new();
        let mut found_profile = false;
        for source in &sources {
            if !source.is_file() {
                continue;
            }
            let ini = match ini::Ini::load_from_file(source) {
                Ok(ini) => ini,
                Err(e) => {
                    return Err(ConfigError::Ini {
                        path: source.clone(),
                        source: e,
                    })
                }
            };
            let Some(section) = ini.section(Some(profile.as_str())) else {
                continue;
            };
            found_profile = true;
            if let Some(v) = section.get("use_https") {
                https = parse_bool(v);
            }
            merge_first(&mut domain, section.get("host_base"));
            merge_first(&mut region, section.get("region"));
            merge_first(&mut key, section.get("access_key"));
            merge_first(&mut key, section.get("aws_access_key_id"));
            merge_first(&mut secret, section.get("secret_key"));
            merge_first(&mut secret, section.get("aws_secret_access_key"));
        }
        if !found_profile && profile_specified {
            return Err(ConfigError::UnknownProfile(profile));
        }

        if key.is_empty() && secret.is_empty() {
            // last resort, check ~/.awssecret
            if let Some(home) = dirs::home_dir() {
                if let Ok(contents) = std::fs::read_to_string(home.join(".awssecret")) {
                    if let Some(line) = contents.lines().next() {
                        if let Some((k, s)) = line.split_once(':') {
                            key = k.to_string();
                            secret = s.to_string();
                        }
                    }
                }
            }
        }

        let env_key = env_or("AWS_ACCESS_KEY_ID", "");
        if !env_key.is_empty() {
            key = env_key;
        }
        let env_secret = env_or("AWS_SECRET_ACCESS_KEY", "");
        if !env_secret.is_empty() {
            secret = env_secret;
        }
        self.access_key = key;
        self.secret_key = secret;

        if domain.is_empty() {
            domain = DEFAULT_DOMAIN.to_string();
        }
        let scheme = if https { "https" } else { "http" };
        self.target = format!("{scheme}://{domain}/{}", path.trim_start_matches('/'));

        let env_region = env_or("AWS_DEFAULT_REGION", "");
        if !env_region.is_empty() {
            self.region = env_region;
        } else if !region.is_empty() {
            self.region = region;
        }

        Ok(())
    }
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn merge_first(slot: &mut String, value: Option<&str>) {
    if slot.is_empty() {
        if let Some(v) = value {
            if !v.is_empty() {
                *slot = v.to_string();
            }
        }
    }
}

fn parse_bool(value: &str) -> bool {
    matches!(
        value,
        "1" | "t" | "T" | "true" | "True" | "TRUE" | "y" | "yes" | "Yes" | "YES" | "on" | "On"
    )
}

/// Expand a leading `~` against the current user's home directory. Paths
/// like `~user/...` are not supported and are an error.
pub(crate) fn expand_tilde(path: &str) -> Result<PathBuf, ConfigError> {
    if path == "~" {
        return dirs::home_dir().ok_or_else(|| ConfigError::BadHomePath(path.to_string()));
    }
    if let Some(rest) = path.strip_prefix("~/") {
        let home = dirs::home_dir().ok_or_else(|| ConfigError::BadHomePath(path.to_string()))?;
        return Ok(home.join(rest));
    }
    if path.starts_with('~') {
        return Err(ConfigError::BadHomePath(path.to_string()));
    }
    Ok(PathBuf::from(path))
}
