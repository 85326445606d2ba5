//! URL parsing for storage backends.
//!
//! Source files, destination tables and dead-letter locations are all given
//! as URLs. Supported forms are `s3://`, `s3::http://host:port/`, `gs://`,
//! `https://storage.googleapis.com/`, `file://` and absolute local paths.

use object_store::path::Path;
use regex::{Captures, Regex};
use std::sync::LazyLock;

use crate::error::{InvalidUrlSnafu, StorageError};

use super::{GcsConfig, LocalConfig, S3Config};

const S3_URL: &str = r"^[sS]3[aA]?://(?P<bucket>[a-z0-9\-\.]+)(/(?P<key>.+))?$";
const S3_ENDPOINT_URL: &str = r"^[sS]3[aA]?::(?P<protocol>https?)://(?P<endpoint>[^:/]+):(?P<port>\d+)/(?P<bucket>[a-z0-9\-\.]+)(/(?P<key>.+))?$";

const GCS_URL: &str = r"^[gG][sS]://(?P<bucket>[a-z0-9\-\._]+)(/(?P<key>.+))?$";
const GCS_PATH: &str =
    r"^https://storage\.googleapis\.com/(?P<bucket>[a-z0-9\-_\.]+)(/(?P<key>.+))?$";

const FILE_URI: &str = r"^file://(?P<path>.*)$";
const FILE_URL: &str = r"^file:(?P<path>.*)$";
const FILE_PATH: &str = r"^(?P<path>/.*)$";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Backend {
    S3,
    Gcs,
    Local,
}

static MATCHERS: LazyLock<Vec<(Backend, Regex)>> = LazyLock::new(|| {
    [
        (Backend::S3, S3_ENDPOINT_URL),
        (Backend::S3, S3_URL),
        (Backend::Gcs, GCS_PATH),
        (Backend::Gcs, GCS_URL),
        (Backend::Local, FILE_URI),
        (Backend::Local, FILE_URL),
        (Backend::Local, FILE_PATH),
    ]
    .into_iter()
    .map(|(backend, pattern)| {
        (
            backend,
            Regex::new(pattern).expect("storage URL pattern is a valid regex"),
        )
    })
    .collect()
});

/// Backend configuration enum.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendConfig {
    S3(S3Config),
    Gcs(GcsConfig),
    Local(LocalConfig),
}

impl BackendConfig {
    /// Parse a URL into a backend configuration.
    ///
    /// With `with_key`, a local path is split into its parent directory and
    /// the final component, so single files can be addressed the same way on
    /// every backend.
    pub fn parse_url(url: &str, with_key: bool) -> Result<Self, StorageError> {
        for (backend, regex) in MATCHERS.iter() {
            if let Some(matches) = regex.captures(url) {
                return match backend {
                    Backend::S3 => Ok(Self::parse_s3(&matches)),
                    Backend::Gcs => Ok(Self::parse_gcs(&matches)),
                    Backend::Local => Self::parse_local(url, &matches, with_key),
                };
            }
        }

        InvalidUrlSnafu {
            url: url.to_string(),
        }
        .fail()
    }

    fn parse_s3(matches: &Captures) -> Self {
        let bucket = matches
            .name("bucket")
            .map(|m| m.as_str().to_string())
            .unwrap_or_default();

        let region = std::env::var("AWS_DEFAULT_REGION").ok();

        let endpoint = std::env::var("AWS_ENDPOINT").ok().or_else(|| {
            matches.name("endpoint").map(|endpoint| {
                let port = matches
                    .name("port")
                    .and_then(|p| p.as_str().parse::<u16>().ok())
                    .unwrap_or(443);
                let protocol = matches
                    .name("protocol")
                    .map(|p| p.as_str())
                    .unwrap_or("https");
                format!("{protocol}://{}:{port}", endpoint.as_str())
            })
        });

        let key = matches.name("key").map(|m| m.as_str().into());

        BackendConfig::S3(S3Config {
            endpoint,
            region,
            bucket,
            key,
        })
    }

    fn parse_gcs(matches: &Captures) -> Self {
        let bucket = matches
            .name("bucket")
            .map(|m| m.as_str().to_string())
            .unwrap_or_default();

        let key = matches.name("key").map(|r| r.as_str().into());

        BackendConfig::Gcs(GcsConfig { bucket, key })
    }

    fn parse_local(url: &str, matches: &Captures, with_key: bool) -> Result<Self, StorageError> {
        let raw = matches.name("path").map(|m| m.as_str()).unwrap_or_default();

        let mut path = if raw.starts_with('/') {
            std::path::PathBuf::from(raw)
        } else {
            std::path::PathBuf::from(format!("/{raw}"))
        };

        let key = if with_key {
            let key = path
                .file_name()
                .and_then(|name| name.to_str())
                .map(Path::from);
            path.pop();
            key
        } else {
            None
        };

        let Some(path) = path.to_str() else {
            return InvalidUrlSnafu {
                url: url.to_string(),
            }
            .fail();
        };

        Ok(BackendConfig::Local(LocalConfig {
            path: path.to_string(),
            key,
        }))
    }

    pub(crate) fn key(&self) -> Option<&Path> {
        match self {
            BackendConfig::S3(s3) => s3.key.as_ref(),
            BackendConfig::Gcs(gcs) => gcs.key.as_ref(),
            BackendConfig::Local(local) => local.key.as_ref(),
        }
    }
}
