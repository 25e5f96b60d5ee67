use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock, OnceLock};

use regex::Regex;

/// The kernel registry of character and block device majors.
pub const PROC_DEVICES_PATH: &str = "/proc/devices";

/// Only this many lines are inspected; the driver registers early in the list.
const MAX_SEARCH_LINES: usize = 512;

static DRIVER_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[0-9]{1,3}\s[v]?devdrv-cdev$").expect("valid devdrv-cdev pattern")
});

static SYSTEM: LazyLock<Arc<MajorIdRegistry>> =
    LazyLock::new(|| Arc::new(MajorIdRegistry::new(PROC_DEVICES_PATH)));

/// Lazily loaded list of device majors registered by the NPU driver.
///
/// The registry file is read on the first call to [`MajorIdRegistry::major_ids`] and the result
/// is kept for the lifetime of the registry, even if reading failed.
#[derive(Debug)]
pub struct MajorIdRegistry {
    path: PathBuf,
    ids: OnceLock<Vec<u32>>,
}

impl MajorIdRegistry {
    /// Creates a registry reading from `path` on first use.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ids: OnceLock::new(),
        }
    }

    /// Creates an already initialized registry.
    pub fn with_ids(ids: Vec<u32>) -> Self {
        Self {
            path: PathBuf::new(),
            ids: OnceLock::from(ids),
        }
    }

    /// Returns the process-wide registry backed by [`PROC_DEVICES_PATH`].
    pub fn system() -> Arc<MajorIdRegistry> {
        Arc::clone(&SYSTEM)
    }

    /// Returns the cached device majors, reading the registry file on first use.
    ///
    /// An unreadable registry results in an empty list.
    pub fn major_ids(&self) -> &[u32] {
        self.ids.get_or_init(|| match read_major_ids(&self.path) {
            Ok(ids) => {
                log::debug!(
                    "Found NPU device majors {:?} in `{}`",
                    ids,
                    self.path.display()
                );
                ids
            }
            Err(err) => {
                log::warn!(
                    "failed to read NPU device majors from `{}`: {}",
                    self.path.display(),
                    err
                );
                Vec::new()
            }
        })
    }

    /// Returns true if `major` is one of the NPU device majors.
    pub fn contains(&self, major: i64) -> bool {
        self.major_ids().iter().any(|&id| i64::from(id) == major)
    }
}

fn read_major_ids(path: &Path) -> std::io::Result<Vec<u32>> {
    let file = File::open(path)?;
    read_major_ids_from_reader(BufReader::new(file))
}

/// Collects the majors of all `devdrv-cdev` lines within the first [`MAX_SEARCH_LINES`] lines.
fn read_major_ids_from_reader<R: BufRead>(mut reader: R) -> std::io::Result<Vec<u32>> {
    let mut ids = Vec::with_capacity(2);
    let mut line = String::with_capacity(64);
    let mut count = 0;

    while count < MAX_SEARCH_LINES && reader.read_line(&mut line)? != 0 {
        count += 1;
        let text = line.trim_end_matches(['\n', '\r']);
        if DRIVER_LINE.is_match(text) {
            if let Some(id) = text
                .split_whitespace()
                .next()
                .and_then(|major| major.parse::<u32>().ok())
            {
                ids.push(id);
            }
        }
        line.clear();
    }

    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Write};
    use tempfile::NamedTempFile;

    const PROC_DEVICES: &str = "\
Character devices:
  1 mem
  4 /dev/vc/0
236 devdrv-cdev
237 vdevdrv-cdev
238 xdevdrv-cdev
239 devdrv-cdev-extra

Block devices:
  8 sd
";

    #[test]
    fn test_read_major_ids() {
        let ids = read_major_ids_from_reader(Cursor::new(PROC_DEVICES)).unwrap();
        assert_eq!(ids, vec![236, 237]);
    }

    #[test]
    fn test_read_major_ids_stops_after_max_lines() {
        let mut contents = "  1 mem\n".repeat(MAX_SEARCH_LINES);
        contents.push_str("236 devdrv-cdev\n");
        let ids = read_major_ids_from_reader(Cursor::new(contents)).unwrap();
        assert!(ids.is_empty());
    }

    #[test]
    fn test_missing_registry_yields_empty_list() {
        let registry = MajorIdRegistry::new("/definitely/does/not/exist");
        assert!(registry.major_ids().is_empty());
        assert!(!registry.contains(236));
    }

    #[test]
    fn test_registry_caches_first_read() {
        let mut tmp = NamedTempFile::new().unwrap();
        write!(tmp, "{PROC_DEVICES}").unwrap();

        let registry = MajorIdRegistry::new(tmp.path());
        assert_eq!(registry.major_ids(), &[236, 237]);

        writeln!(tmp, "240 devdrv-cdev").unwrap();
        assert_eq!(registry.major_ids(), &[236, 237]);
        assert!(registry.contains(237));
        assert!(!registry.contains(240));
    }
}
