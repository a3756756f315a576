use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use memmap2::MmapOptions;
use reqwest::ClientBuilder;
use serde::de::DeserializeOwned;
use tracing::{debug, info};
use crate::{Result, ResourceError, constants::{MMAP_THRESHOLD, RPC_TIMEOUT}};
use crate::utils::hash::uri_digest;

/// Whether a locator points at remote storage rather than the local filesystem
pub fn is_remote(uri: &str) -> bool {
    uri.starts_with("http://") || uri.starts_with("https://")
}

/// Resolve a locator relative to the location of the file that mentioned it
pub fn resolve_locator(base: Option<&str>, locator: &str) -> String {
    if is_remote(locator) || Path::new(locator).is_absolute() {
        return locator.to_string();
    }
    match base {
        Some(base) if is_remote(base) => format!("{}/{}", base.trim_end_matches('/'), locator),
        Some(base) => Path::new(base).join(locator).to_string_lossy().to_string(),
        None => locator.to_string(),
    }
}

/// Location that contains a locator, used as base for relative entries
pub fn locator_dir(uri: &str) -> Option<String> {
    if is_remote(uri) {
        return uri.rsplit_once('/').map(|(dir, _)| dir.to_string());
    }
    Path::new(uri)
        .parent()
        .map(|p| p.to_string_lossy().to_string())
}

/// Make a locator available on the local filesystem.
///
/// Remote locators are downloaded once into the cache directory, keyed by the
/// digest of their URI; later calls reuse the cached copy.
pub async fn localize(uri: &str) -> Result<PathBuf> {
    if !is_remote(uri) {
        return Ok(PathBuf::from(uri));
    }

    let name = file_name(uri);
    let cached = get_cache_dir()?.join(format!("{}-{}", uri_digest(uri), name));
    if fs::try_exists(&cached).await? {
        debug!(uri, path = %cached.display(), "using cached download");
        return Ok(cached);
    }

    let client = ClientBuilder::new()
        .pool_idle_timeout(Duration::from_secs(30))
        .tcp_nodelay(true)
        .timeout(RPC_TIMEOUT * 10)
        .user_agent("pyresource/0.1")
        .gzip(true)
        .build()?;

    let response = client.get(uri).send().await?;
    if !response.status().is_success() {
        return Err(ResourceError::Config(format!(
            "failed to fetch {}: {}",
            uri,
            response.status()
        )));
    }
    let body = response.bytes().await?;
    atomic_write(&cached, &body).await?;
    info!(uri, bytes = body.len(), "downloaded resource");
    Ok(cached)
}

/// Decode a local resource file; large files are memory mapped.
///
/// The format follows the extension: `.msgpack`/`.mp` are MessagePack,
/// everything else JSON. A trailing `.gz` is decompressed first.
pub fn decode_file<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let file = std::fs::File::open(path)?;
    let len = file.metadata()?.len();

    if len >= MMAP_THRESHOLD {
        // Safety: resource files are immutable build outputs; nothing truncates them while mapped
        let mmap = unsafe { MmapOptions::new().map(&file)? };
        decode_bytes(path, &mmap[..])
    } else {
        let mut buffer = Vec::with_capacity(len as usize);
        let mut file = file;
        file.read_to_end(&mut buffer)?;
        decode_bytes(path, &buffer)
    }
}

fn decode_bytes<T: DeserializeOwned>(path: &Path, data: &[u8]) -> Result<T> {
    let name = path.to_string_lossy();
    let (name, gzipped) = match name.strip_suffix(".gz") {
        Some(stripped) => (stripped.to_string(), true),
        None => (name.to_string(), false),
    };

    let inflated;
    let data = if gzipped {
        let mut out = Vec::new();
        flate2::read::GzDecoder::new(data).read_to_end(&mut out)?;
        inflated = out;
        &inflated[..]
    } else {
        data
    };

    if name.ends_with(".msgpack") || name.ends_with(".mp") {
        rmp_serde::from_slice(data)
            .map_err(|e| ResourceError::Serialization(format!("{}: {}", path.display(), e)))
    } else {
        serde_json::from_slice(data)
            .map_err(|e| ResourceError::Serialization(format!("{}: {}", path.display(), e)))
    }
}

/// Fetch (if remote) and decode a single resource file off the async runtime
pub async fn read_resource<T>(uri: &str) -> Result<T>
where
    T: DeserializeOwned + Send + 'static,
{
    let path = localize(uri).await?;
    tokio::task::spawn_blocking(move || decode_file(&path))
        .await
        .map_err(|e| ResourceError::Io(std::io::Error::other(e.to_string())))?
}

fn file_name(uri: &str) -> &str {
    uri.rsplit('/').next().unwrap_or(uri)
}

/// Atomic write operation - write to temp file then rename
pub async fn atomic_write(path: &Path, contents: &[u8]) -> Result<()> {
    let parent = path.parent()
        .ok_or_else(|| ResourceError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "Parent directory not found"
        )))?;

    fs::create_dir_all(parent).await?;

    // Write to temporary file first
    let temp_path = parent.join(format!(".{}.tmp",
        path.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default()));

    let mut file = fs::File::create(&temp_path).await?;
    file.write_all(contents).await?;
    file.sync_all().await?;

    // Atomic rename
    fs::rename(temp_path, path).await?;
    Ok(())
}

/// Get cache directory for downloaded resources
pub fn get_cache_dir() -> Result<PathBuf> {
    let cache_dir = dirs::cache_dir()
        .ok_or_else(|| ResourceError::Io(
            std::io::Error::new(std::io::ErrorKind::NotFound, "Cache directory not found")
        ))?
        .join("pyresource");

    std::fs::create_dir_all(&cache_dir)?;
    Ok(cache_dir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::io::Write;

    #[test]
    fn relative_locators_resolve_against_base() {
        let base = locator_dir("/data/manifest.json");
        assert_eq!(base.as_deref(), Some("/data"));
        assert_eq!(resolve_locator(base.as_deref(), "a/b.json"), "/data/a/b.json");
        assert_eq!(resolve_locator(base.as_deref(), "/abs.json"), "/abs.json");
        assert_eq!(
            resolve_locator(base.as_deref(), "https://host/x.json"),
            "https://host/x.json"
        );
        assert_eq!(resolve_locator(None, "x.json"), "x.json");

        let remote = locator_dir("https://host/data/manifest.json");
        assert_eq!(
            resolve_locator(remote.as_deref(), "json/symgraph.json"),
            "https://host/data/json/symgraph.json"
        );
    }

    #[test]
    fn decodes_json_msgpack_and_gzip() {
        let dir = tempfile::tempdir().unwrap();
        let mut value = BTreeMap::new();
        value.insert("json.dumps".to_string(), 3u64);

        let json_path = dir.path().join("counts.json");
        std::fs::write(&json_path, serde_json::to_vec(&value).unwrap()).unwrap();
        let decoded: BTreeMap<String, u64> = decode_file(&json_path).unwrap();
        assert_eq!(decoded, value);

        let mp_path = dir.path().join("counts.msgpack");
        std::fs::write(&mp_path, rmp_serde::to_vec(&value).unwrap()).unwrap();
        let decoded: BTreeMap<String, u64> = decode_file(&mp_path).unwrap();
        assert_eq!(decoded, value);

        let gz_path = dir.path().join("counts.json.gz");
        let mut encoder =
            flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(&serde_json::to_vec(&value).unwrap()).unwrap();
        std::fs::write(&gz_path, encoder.finish().unwrap()).unwrap();
        let decoded: BTreeMap<String, u64> = decode_file(&gz_path).unwrap();
        assert_eq!(decoded, value);
    }

    #[test]
    fn malformed_files_are_serialization_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        std::fs::write(&path, b"{not json").unwrap();
        let err = decode_file::<BTreeMap<String, u64>>(&path).unwrap_err();
        assert!(matches!(err, ResourceError::Serialization(_)));
    }

    #[tokio::test]
    async fn atomic_write_replaces_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("file.bin");
        atomic_write(&path, b"first").await.unwrap();
        atomic_write(&path, b"second").await.unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"second");
    }
}
