//! Download Cache
//!
//! Genetic maps and tool code are downloaded once into a shared cache
//! directory. The check-then-download sequence is guarded twice: a
//! process-wide mutex serialises worker threads, and a lock file created
//! with `create_new` keeps concurrent nerunner processes from writing the
//! same entry. A `.complete` marker is written last, so an interrupted
//! download is simply repeated on the next invocation.

use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use once_cell::sync::Lazy;

use crate::config::GeneticMap;
use crate::environment::tools::{ExternalTool, Toolchain};
use crate::error::{NeError, Result};

/// Stairway plot release archive.
pub const STAIRWAY_PLOT_URL: &str =
    "https://github.com/xiaoming-liu/stairway-plot-v2/raw/master/stairway_plot_v2.1.1.zip";

/// Directory the stairway plot archive unpacks to.
pub const STAIRWAY_PLOT_DIR: &str = "stairway_plot_v2.1.1";

/// Prebuilt MSMC binary.
pub const MSMC_URL: &str =
    "https://github.com/stschiff/msmc/releases/download/v1.1.0/msmc_1.1.0_linux64bit";

const COMPLETE_MARKER: &str = ".complete";
const LOCK_POLL: Duration = Duration::from_millis(500);
const LOCK_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Serialises fills of the same cache directory within this process.
static CACHE_GUARDS: Lazy<Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

fn dir_guard(dir: &Path) -> Arc<Mutex<()>> {
    let mut guards = CACHE_GUARDS.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    Arc::clone(guards.entry(dir.to_path_buf()).or_default())
}

/// Layout of the download cache.
#[derive(Debug, Clone)]
pub struct DownloadCache {
    root: PathBuf,
}

impl DownloadCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory the simulation engine reads a genetic map from.
    pub fn genetic_map_dir(&self, species: &str, map_id: &str) -> PathBuf {
        self.root.join("genetic_maps").join(species).join(map_id)
    }

    pub fn genetic_map_marker(&self, species: &str, map_id: &str) -> PathBuf {
        self.genetic_map_dir(species, map_id).join(COMPLETE_MARKER)
    }

    pub fn stairway_dir(&self) -> PathBuf {
        self.root.join("tools").join("stairway_plot")
    }

    pub fn stairway_marker(&self) -> PathBuf {
        self.stairway_dir().join(COMPLETE_MARKER)
    }

    /// Java class path holding the `Stairbuilder` class.
    pub fn stairway_classpath(&self) -> PathBuf {
        self.stairway_dir().join(STAIRWAY_PLOT_DIR).join("stairway_plot_es")
    }

    pub fn msmc_dir(&self) -> PathBuf {
        self.root.join("tools").join("msmc")
    }

    pub fn msmc_marker(&self) -> PathBuf {
        self.msmc_dir().join(COMPLETE_MARKER)
    }

    pub fn msmc_binary(&self) -> PathBuf {
        self.msmc_dir().join("msmc")
    }
}

/// Whether a path is a cache completion marker rather than data.
pub fn is_marker(path: &Path) -> bool {
    path.file_name().map_or(false, |name| name == COMPLETE_MARKER)
}

/// Downloads and unpacks a genetic map archive.
pub fn fetch_genetic_map(
    toolchain: &Toolchain,
    species: &str,
    map: &GeneticMap,
) -> Result<PathBuf> {
    let cache = toolchain.cache();
    let dir = cache.genetic_map_dir(species, &map.id);
    let what = format!("genetic map {}", map.id);

    fill_once(&what, &dir, |dir| {
        let archive = dir.join(format!("{}.tar.gz", map.id));
        download(toolchain, &what, &map.url, &archive)?;

        let unpack = toolchain
            .command(ExternalTool::Tar)
            .arg("-xzf")
            .path_arg(&archive)
            .arg("-C")
            .path_arg(dir);
        toolchain.run_checked(&unpack, |msg| NeError::download(&what, msg))?;

        if let Err(e) = fs::remove_file(&archive) {
            debug!("Could not remove {}: {}", archive.display(), e);
        }
        Ok(())
    })?;

    Ok(dir)
}

/// Downloads and unpacks the stairway plot code.
pub fn fetch_stairway_plot(toolchain: &Toolchain) -> Result<PathBuf> {
    let cache = toolchain.cache();
    let what = "stairway plot";

    fill_once(what, &cache.stairway_dir(), |dir| {
        let archive = dir.join(format!("{}.zip", STAIRWAY_PLOT_DIR));
        download(toolchain, what, STAIRWAY_PLOT_URL, &archive)?;

        let unpack = toolchain
            .command(ExternalTool::Unzip)
            .args(["-q", "-o"])
            .path_arg(&archive)
            .arg("-d")
            .path_arg(dir);
        toolchain.run_checked(&unpack, |msg| NeError::download(what, msg))?;
        Ok(())
    })?;

    Ok(cache.stairway_classpath())
}

/// Downloads the MSMC binary and marks it executable.
pub fn fetch_msmc(toolchain: &Toolchain) -> Result<PathBuf> {
    let cache = toolchain.cache();
    let binary = cache.msmc_binary();
    let what = "MSMC";

    fill_once(what, &cache.msmc_dir(), |_| {
        download(toolchain, what, MSMC_URL, &binary)?;
        make_executable(&binary)
    })?;

    Ok(binary)
}

fn download(toolchain: &Toolchain, what: &str, url: &str, target: &Path) -> Result<()> {
    info!("Downloading {} from {}", what, url);

    let fetch = toolchain
        .command(ExternalTool::Curl)
        .args(["-L", "--fail", "-sS", "-o"])
        .path_arg(target)
        .arg(url);

    toolchain.run_checked(&fetch, |msg| NeError::download(what, msg))?;
    Ok(())
}

#[cfg(unix)]
fn make_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    if path.exists() {
        fs::set_permissions(path, fs::Permissions::from_mode(0o755))?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> Result<()> {
    Ok(())
}

/// Runs `fill` into `dir` unless the directory is already complete.
///
/// Returns true if this call performed the fill.
pub fn fill_once<F>(what: &str, dir: &Path, fill: F) -> Result<bool>
where
    F: FnOnce(&Path) -> Result<()>,
{
    let marker = dir.join(COMPLETE_MARKER);

    let guard = dir_guard(dir);
    let _held = guard.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

    if marker.exists() {
        debug!("{} already cached at {}", what, dir.display());
        return Ok(false);
    }

    fs::create_dir_all(dir).map_err(|e| NeError::download(what, e.to_string()))?;
    let _lock = LockFile::acquire(what, &dir.with_extension("lock"))?;

    // Another process may have finished while we waited for the lock.
    if marker.exists() {
        return Ok(false);
    }

    fill(dir)?;

    fs::write(&marker, chrono::Local::now().to_rfc3339())
        .map_err(|e| NeError::download(what, e.to_string()))?;
    info!("Cached {} at {}", what, dir.display());
    Ok(true)
}

/// An exclusive on-disk lock, released on drop.
struct LockFile {
    path: PathBuf,
}

impl LockFile {
    fn acquire(what: &str, path: &Path) -> Result<Self> {
        let started = Instant::now();
        let mut warned = false;

        loop {
            match OpenOptions::new().write(true).create_new(true).open(path) {
                Ok(_) => {
                    return Ok(Self {
                        path: path.to_path_buf(),
                    })
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    if started.elapsed() > LOCK_TIMEOUT {
                        return Err(NeError::download(
                            what,
                            format!("timed out waiting for lock {}", path.display()),
                        ));
                    }
                    if !warned {
                        warn!(
                            "Waiting for another process to finish {} ({})",
                            what,
                            path.display()
                        );
                        warned = true;
                    }
                    thread::sleep(LOCK_POLL);
                }
                Err(e) => return Err(NeError::download(what, e.to_string())),
            }
        }
    }
}

impl Drop for LockFile {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_cache_layout() {
        let cache = DownloadCache::new("/data/cache");
        assert_eq!(
            cache.genetic_map_marker("HomSap", "HapMapII_GRCh37"),
            PathBuf::from("/data/cache/genetic_maps/HomSap/HapMapII_GRCh37/.complete")
        );
        assert_eq!(cache.msmc_binary(), PathBuf::from("/data/cache/tools/msmc/msmc"));
        assert!(cache.stairway_classpath().ends_with("stairway_plot_es"));
        assert!(is_marker(&cache.msmc_marker()));
        assert!(!is_marker(&cache.msmc_binary()));
    }

    #[test]
    fn test_fill_once_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("entry");
        let calls = AtomicUsize::new(0);

        for _ in 0..3 {
            fill_once("test entry", &target, |d| {
                calls.fetch_add(1, Ordering::SeqCst);
                fs::write(d.join("data"), "x")?;
                Ok(())
            })
            .unwrap();
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(target.join(".complete").exists());
        assert!(!target.with_extension("lock").exists());
    }

    #[test]
    fn test_failed_fill_leaves_no_marker() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("entry");

        let result = fill_once("test entry", &target, |_| Err(NeError::download("x", "boom")));
        assert!(result.is_err());
        assert!(!target.join(".complete").exists());
        assert!(!target.with_extension("lock").exists());

        // A later attempt retries
        assert!(fill_once("test entry", &target, |_| Ok(())).unwrap());
    }

    #[test]
    fn test_concurrent_fill_happens_once() {
        let dir = tempfile::tempdir().unwrap();
        let target = Arc::new(dir.path().join("shared"));
        let calls = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let target = Arc::clone(&target);
                let calls = Arc::clone(&calls);
                thread::spawn(move || {
                    fill_once("shared entry", &target, |_| {
                        calls.fetch_add(1, Ordering::SeqCst);
                        thread::sleep(Duration::from_millis(20));
                        Ok(())
                    })
                    .unwrap();
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_distinct_directories_fill_in_parallel() {
        let dir = tempfile::tempdir().unwrap();
        let active = Arc::new(AtomicUsize::new(0));
        let overlap = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = ["genetic_map", "stairway", "msmc"]
            .iter()
            .map(|&name| {
                let target = dir.path().join(name);
                let active = Arc::clone(&active);
                let overlap = Arc::clone(&overlap);
                thread::spawn(move || {
                    fill_once(name, &target, |_| {
                        let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                        overlap.fetch_max(now, Ordering::SeqCst);
                        // Hold the fill open until the others join, or give up
                        let started = Instant::now();
                        while active.load(Ordering::SeqCst) < 3
                            && started.elapsed() < Duration::from_secs(5)
                        {
                            thread::sleep(Duration::from_millis(5));
                        }
                        overlap.fetch_max(active.load(Ordering::SeqCst), Ordering::SeqCst);
                        thread::sleep(Duration::from_millis(20));
                        active.fetch_sub(1, Ordering::SeqCst);
                        Ok(())
                    })
                    .unwrap();
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(overlap.load(Ordering::SeqCst), 3);
        for name in ["genetic_map", "stairway", "msmc"] {
            assert!(dir.path().join(name).join(".complete").exists());
        }
    }
}
