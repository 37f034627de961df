//! Advisory file locking for the universe storage directory.

use crate::error::{Error, Result};
use crate::types::time::monotonic_milliseconds;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

const MAX_SLEEP_MILLIS: u64 = 25;

/// Holds an exclusive advisory lock on a file for its lifetime. A second
/// live holder anywhere on the system makes acquisition fail, which is how
/// concurrent universe servers on one storage directory are prevented.
pub struct LockFile {
    path: PathBuf,
    file: Option<File>,
}

impl LockFile {
    /// Tries to acquire the lock, retrying until `timeout_millis` elapses.
    /// A zero timeout means a single attempt; a negative timeout retries
    /// forever.
    pub fn acquire(path: impl AsRef<Path>, timeout_millis: i64) -> Result<LockFile> {
        let mut lock = LockFile {
            path: path.as_ref().to_path_buf(),
            file: None,
        };

        let start = monotonic_milliseconds();
        loop {
            match lock.try_lock()? {
                true => return Ok(lock),
                false => {
                    if timeout_millis == 0
                        || (timeout_millis > 0
                            && monotonic_milliseconds() - start > timeout_millis)
                    {
                        return Err(Error::LockFile(format!(
                            "could not acquire lock on {}, already held",
                            lock.path.display()
                        )));
                    }
                    std::thread::sleep(std::time::Duration::from_millis(MAX_SLEEP_MILLIS));
                }
            }
        }
    }

    fn try_lock(&mut self) -> Result<bool> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.path)
            .map_err(|e| {
                Error::LockFile(format!("could not open lock file {}: {e}", self.path.display()))
            })?;

        if flock_exclusive(&file)? {
            self.file = Some(file);
            Ok(true)
        } else {
            Ok(false)
        }
    }

    pub fn is_locked(&self) -> bool {
        self.file.is_some()
    }

    pub fn unlock(&mut self) {
        if self.file.take().is_some() {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

impl Drop for LockFile {
    fn drop(&mut self) {
        self.unlock();
    }
}

#[cfg(unix)]
fn flock_exclusive(file: &File) -> Result<bool> {
    use std::os::unix::io::AsRawFd;

    // LOCK_EX | LOCK_NB
    let result = unsafe { libc_flock(file.as_raw_fd(), 2 | 4) };
    if result == 0 {
        Ok(true)
    } else {
        let errno = std::io::Error::last_os_error();
        match errno.raw_os_error() {
            Some(code) if code == 11 || code == 35 => Ok(false), // EWOULDBLOCK
            _ => Err(Error::LockFile(format!("flock failed: {errno}"))),
        }
    }
}

#[cfg(unix)]
extern "C" {
    #[link_name = "flock"]
    fn libc_flock(fd: i32, operation: i32) -> i32;
}

#[cfg(not(unix))]
fn flock_exclusive(_file: &File) -> Result<bool> {
    // Non-unix fallback: rely on create-exclusive semantics only.
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_round_trip() {
        let dir = std::env::temp_dir().join(format!("skyward-lock-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("universe.lock");

        let first = LockFile::acquire(&path, 0).unwrap();
        assert!(first.is_locked());

        // A second acquisition in the same process fails immediately.
        assert!(LockFile::acquire(&path, 0).is_err());

        drop(first);
        let second = LockFile::acquire(&path, 0).unwrap();
        assert!(second.is_locked());
    }
}
