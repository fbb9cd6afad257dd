//! Weight resolution and fetching.
//!
//! Resolution checks two local directories before falling back to the
//! canonical download URL, so operators can pre-seed weights and avoid any
//! network access. The URL fallback is unconditional: resolution itself
//! never fails, and an unreachable URL only surfaces when the weights are
//! actually fetched at engine construction.

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Name, file name and canonical download URL of one weight file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WeightSpec {
    pub file_name: &'static str,
    pub url: &'static str,
}

/// Where a weight file resolves to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WeightSource {
    Local(PathBuf),
    Remote(&'static str),
}

#[derive(Error, Debug)]
pub enum WeightError {
    #[error("download failed for {url}: {reason}")]
    Download { url: String, reason: String },
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// The two candidate weight directories, in preference order.
#[derive(Debug, Clone)]
pub struct WeightDirs {
    /// Operator-seeded pretrained models directory.
    pub pretrained: PathBuf,
    /// Cache directory downloads land in.
    pub cache: PathBuf,
}

impl WeightDirs {
    pub fn new(pretrained: impl Into<PathBuf>, cache: impl Into<PathBuf>) -> Self {
        Self {
            pretrained: pretrained.into(),
            cache: cache.into(),
        }
    }

    /// Load directories from `RESTORA_*` environment variables with defaults:
    /// `models/pretrained` relative to the working directory, and an XDG
    /// cache directory for downloads.
    pub fn from_env() -> Self {
        let pretrained = std::env::var("RESTORA_PRETRAINED_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("models/pretrained"));

        let cache = std::env::var("RESTORA_WEIGHTS_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                std::env::var("XDG_CACHE_HOME")
                    .map(PathBuf::from)
                    .unwrap_or_else(|_| {
                        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                        PathBuf::from(home).join(".cache")
                    })
                    .join("restora/weights")
            });

        Self { pretrained, cache }
    }
}

/// Resolve a weight spec against the candidate directories.
///
/// First match wins; no existence check is performed on the URL.
pub fn resolve(spec: &WeightSpec, dirs: &WeightDirs) -> WeightSource {
    for dir in [&dirs.pretrained, &dirs.cache] {
        let candidate = dir.join(spec.file_name);
        if candidate.is_file() {
            return WeightSource::Local(candidate);
        }
    }
    WeightSource::Remote(spec.url)
}

/// Resolve a weight spec, downloading into the cache directory when it only
/// resolves remotely. Returns the local path the model loader can open.
pub async fn ensure_local(spec: &WeightSpec, dirs: &WeightDirs) -> Result<PathBuf, WeightError> {
    match resolve(spec, dirs) {
        WeightSource::Local(path) => {
            tracing::debug!(path = %path.display(), "using cached weights");
            Ok(path)
        }
        WeightSource::Remote(url) => {
            let dest = dirs.cache.join(spec.file_name);
            tracing::info!(url, dest = %dest.display(), "downloading weights");
            download(url, &dest).await?;
            Ok(dest)
        }
    }
}

/// Stream a weight file from `url` to `dest`, creating parent directories.
///
/// A partial download is removed so a later run does not resolve to a
/// truncated file.
async fn download(url: &str, dest: &Path) -> Result<(), WeightError> {
    use futures_util::StreamExt;
    use std::io::Write;

    let io_err = |source: std::io::Error| WeightError::Io {
        path: dest.to_path_buf(),
        source,
    };
    let dl_err = |reason: String| WeightError::Download {
        url: url.to_string(),
        reason,
    };

    let client = reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::limited(10))
        .user_agent(concat!("restora/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| dl_err(e.to_string()))?;

    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| dl_err(e.to_string()))?;

    if !response.status().is_success() {
        return Err(dl_err(format!("HTTP status {}", response.status())));
    }

    let total = response.content_length().unwrap_or(0);

    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent).map_err(io_err)?;
    }
    let mut file = std::fs::File::create(dest).map_err(io_err)?;

    let mut downloaded: u64 = 0;
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => {
                let _ = std::fs::remove_file(dest);
                return Err(dl_err(e.to_string()));
            }
        };
        if let Err(e) = file.write_all(&chunk) {
            let _ = std::fs::remove_file(dest);
            return Err(io_err(e));
        }
        downloaded += chunk.len() as u64;
    }

    tracing::info!(bytes = downloaded, expected = total, "weights downloaded");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::variant::ModelVariant;

    const SPEC: WeightSpec = WeightSpec {
        file_name: "model.onnx",
        url: "https://example.com/model.onnx",
    };

    fn dirs_in(root: &Path) -> WeightDirs {
        WeightDirs::new(root.join("pretrained"), root.join("cache"))
    }

    #[test]
    fn falls_back_to_url_when_nothing_is_seeded() {
        let tmp = tempfile::tempdir().unwrap();
        let dirs = dirs_in(tmp.path());
        assert_eq!(resolve(&SPEC, &dirs), WeightSource::Remote(SPEC.url));
    }

    #[test]
    fn pretrained_dir_wins_over_cache() {
        let tmp = tempfile::tempdir().unwrap();
        let dirs = dirs_in(tmp.path());
        std::fs::create_dir_all(&dirs.pretrained).unwrap();
        std::fs::create_dir_all(&dirs.cache).unwrap();
        std::fs::write(dirs.pretrained.join(SPEC.file_name), b"a").unwrap();
        std::fs::write(dirs.cache.join(SPEC.file_name), b"b").unwrap();

        assert_eq!(
            resolve(&SPEC, &dirs),
            WeightSource::Local(dirs.pretrained.join(SPEC.file_name))
        );
    }

    #[test]
    fn cache_dir_is_second_choice() {
        let tmp = tempfile::tempdir().unwrap();
        let dirs = dirs_in(tmp.path());
        std::fs::create_dir_all(&dirs.cache).unwrap();
        std::fs::write(dirs.cache.join(SPEC.file_name), b"b").unwrap();

        assert_eq!(
            resolve(&SPEC, &dirs),
            WeightSource::Local(dirs.cache.join(SPEC.file_name))
        );
    }

    #[test]
    fn a_directory_with_the_weight_name_is_not_a_match() {
        let tmp = tempfile::tempdir().unwrap();
        let dirs = dirs_in(tmp.path());
        std::fs::create_dir_all(dirs.pretrained.join(SPEC.file_name)).unwrap();

        assert_eq!(resolve(&SPEC, &dirs), WeightSource::Remote(SPEC.url));
    }

    #[test]
    fn every_variant_resolves_to_a_nonempty_source() {
        let tmp = tempfile::tempdir().unwrap();
        let dirs = dirs_in(tmp.path());
        for variant in ModelVariant::ALL {
            match resolve(&variant.weights(), &dirs) {
                WeightSource::Remote(url) => assert!(!url.is_empty()),
                WeightSource::Local(path) => assert!(!path.as_os_str().is_empty()),
            }
        }
    }

    #[tokio::test]
    async fn ensure_local_short_circuits_on_seeded_weights() {
        let tmp = tempfile::tempdir().unwrap();
        let dirs = dirs_in(tmp.path());
        std::fs::create_dir_all(&dirs.pretrained).unwrap();
        std::fs::write(dirs.pretrained.join(SPEC.file_name), b"seeded").unwrap();

        let path = ensure_local(&SPEC, &dirs).await.unwrap();
        assert_eq!(path, dirs.pretrained.join(SPEC.file_name));
    }
}
