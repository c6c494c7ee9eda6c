//! On-disk record of the managed process.
//!
//! The file holds a single decimal PID followed by a newline. It exists only
//! while this supervisor tracks a live (or not yet reaped) child.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::{Result, SupervisorError};

#[derive(Debug, Clone)]
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replace the file contents with `pid`.
    ///
    /// Written to a sibling temp file and renamed, so readers never see a
    /// half-written number.
    pub fn write(&self, pid: i32) -> Result<()> {
        let err = |source| SupervisorError::PidFile {
            path: self.path.clone(),
            source,
        };
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(err)?;
        }
        let tmp = self.path.with_extension("pid.tmp");
        let mut file = fs::File::create(&tmp).map_err(err)?;
        writeln!(file, "{pid}").map_err(err)?;
        file.sync_all().map_err(err)?;
        fs::rename(&tmp, &self.path).map_err(err)?;
        Ok(())
    }

    /// `Ok(None)` when the file is absent.
    pub fn read(&self) -> Result<Option<i32>> {
        match fs::read_to_string(&self.path) {
            Ok(raw) => raw.trim().parse::<i32>().map(Some).map_err(|e| {
                SupervisorError::PidFile {
                    path: self.path.clone(),
                    source: std::io::Error::new(std::io::ErrorKind::InvalidData, e),
                }
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(SupervisorError::PidFile {
                path: self.path.clone(),
                source,
            }),
        }
    }

    /// Removing an absent file is not an error.
    pub fn remove(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(SupervisorError::PidFile {
                path: self.path.clone(),
                source,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_read_remove() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = PidFile::new(dir.path().join("run").join("app.pid"));

        assert_eq!(pid_file.read().unwrap(), None);

        pid_file.write(4242).unwrap();
        assert_eq!(fs::read_to_string(pid_file.path()).unwrap(), "4242\n");
        assert_eq!(pid_file.read().unwrap(), Some(4242));

        pid_file.write(17).unwrap();
        assert_eq!(pid_file.read().unwrap(), Some(17));

        pid_file.remove().unwrap();
        assert!(!pid_file.path().exists());
        pid_file.remove().unwrap();
    }

    #[test]
    fn garbage_contents_are_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.pid");
        fs::write(&path, "not-a-pid").unwrap();
        assert!(matches!(
            PidFile::new(&path).read(),
            Err(SupervisorError::PidFile { .. })
        ));
    }
}
