//! Host-filesystem helpers used around the queue: directory listings,
//! recursive copies, advisory locks, atomic replacement, path expansion.
//!
//! These serve the embedding process and admin flows; the queue engine never
//! calls them.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant, SystemTime};

use fs2::FileExt;
use thiserror::Error;
use uuid::Uuid;

const WAIT_POLL: Duration = Duration::from_millis(50);

#[derive(Debug, Error)]
pub enum FsUtilError {
    #[error("io error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("not a directory: {0:?}")]
    NotADirectory(PathBuf),
    #[error("lock already held: {0:?}")]
    LockHeld(PathBuf),
    #[error("file {path:?} did not appear within {waited:?}")]
    Timeout { path: PathBuf, waited: Duration },
}

fn io_at(path: &Path) -> impl FnOnce(io::Error) -> FsUtilError + '_ {
    move |source| FsUtilError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Last-modified time of a path.
pub fn modified_time(path: &Path) -> Result<SystemTime, FsUtilError> {
    let meta = fs::symlink_metadata(path).map_err(io_at(path))?;
    meta.modified().map_err(io_at(path))
}

/// Entries of `dir` sorted by modification time, oldest first; ties break by
/// path so the order is deterministic.
pub fn ls_lt(dir: &Path) -> Result<Vec<PathBuf>, FsUtilError> {
    if !dir.is_dir() {
        return Err(FsUtilError::NotADirectory(dir.to_path_buf()));
    }

    let mut stamped = Vec::new();
    for entry in fs::read_dir(dir).map_err(io_at(dir))? {
        let entry = entry.map_err(io_at(dir))?;
        let path = entry.path();
        let mtime = modified_time(&path)?;
        stamped.push((mtime, path));
    }
    stamped.sort();

    Ok(stamped.into_iter().map(|(_, path)| path).collect())
}

/// Copy `src` into `dst` recursively, creating `dst` if needed.
///
/// Symlinks are recreated as links and never followed, so a link cycle cannot
/// turn the copy into an infinite walk.
pub fn copy_tree(src: &Path, dst: &Path) -> Result<(), FsUtilError> {
    if !src.is_dir() {
        return Err(FsUtilError::NotADirectory(src.to_path_buf()));
    }
    fs::create_dir_all(dst).map_err(io_at(dst))?;

    for entry in fs::read_dir(src).map_err(io_at(src))? {
        let entry = entry.map_err(io_at(src))?;
        let source = entry.path();
        let target = dst.join(entry.file_name());
        let file_type = entry.file_type().map_err(io_at(&source))?;

        if file_type.is_symlink() {
            let link = fs::read_link(&source).map_err(io_at(&source))?;
            let _ = fs::remove_file(&target);
            #[cfg(unix)]
            std::os::unix::fs::symlink(&link, &target).map_err(io_at(&target))?;
            #[cfg(not(unix))]
            let _ = link;
        } else if file_type.is_dir() {
            copy_tree(&source, &target)?;
        } else {
            fs::copy(&source, &target).map_err(io_at(&target))?;
        }
    }
    Ok(())
}

/// Whole-file advisory lock, exclusive for the lifetime of the value.
///
/// Backed by the kernel's advisory locking, so a crashed holder releases the
/// lock automatically. The holder's pid is written into the file for
/// operators; the file is removed again on orderly release.
#[derive(Debug)]
pub struct LockFile {
    file: File,
    path: PathBuf,
}

impl LockFile {
    /// Take the lock without blocking; fails with [`FsUtilError::LockHeld`]
    /// when another process (or another handle) holds it.
    pub fn acquire(path: &Path) -> Result<Self, FsUtilError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)
            .map_err(io_at(path))?;

        if let Err(err) = file.try_lock_exclusive() {
            return if err.raw_os_error() == fs2::lock_contended_error().raw_os_error() {
                Err(FsUtilError::LockHeld(path.to_path_buf()))
            } else {
                Err(io_at(path)(err))
            };
        }

        file.set_len(0).map_err(io_at(path))?;
        (&file)
            .write_all(format!("{}\n", std::process::id()).as_bytes())
            .map_err(io_at(path))?;

        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for LockFile {
    fn drop(&mut self) {
        let _ = fs2::FileExt::unlock(&self.file);
        let _ = fs::remove_file(&self.path);
    }
}

/// Replace the contents of `path` atomically: write a uniquely-suffixed
/// sibling, flush it, then rename over the target.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), FsUtilError> {
    let tmp = temp_sibling(path);

    let mut file = File::create(&tmp).map_err(io_at(&tmp))?;
    file.write_all(bytes).map_err(io_at(&tmp))?;
    file.sync_all().map_err(io_at(&tmp))?;
    drop(file);

    fs::rename(&tmp, path).map_err(|source| {
        let _ = fs::remove_file(&tmp);
        FsUtilError::Io {
            path: path.to_path_buf(),
            source,
        }
    })
}

fn temp_sibling(path: &Path) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    let name = format!("{stem}.{}.tmp{ext}", Uuid::new_v4());
    path.parent().unwrap_or_else(|| Path::new("")).join(name)
}

/// Expand a leading `~` and `$VAR` / `${VAR}` references the way a shell
/// word would. Unset variables expand to the empty string.
pub fn expand_path(input: &str) -> PathBuf {
    let expanded = expand_vars(input);

    if expanded == "~" {
        return dirs::home_dir().unwrap_or_else(|| PathBuf::from("~"));
    }
    if let Some(rest) = expanded.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(expanded)
}

fn expand_vars(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '$' {
            out.push(c);
            continue;
        }
        let mut name = String::new();
        let braced = chars.peek() == Some(&'{');
        if braced {
            chars.next();
            while let Some(&c) = chars.peek() {
                if c == '}' {
                    chars.next();
                    break;
                }
                name.push(c);
                chars.next();
            }
        } else {
            while let Some(&c) = chars.peek() {
                if c.is_alphanumeric() || c == '_' {
                    name.push(c);
                    chars.next();
                } else {
                    break;
                }
            }
        }
        if name.is_empty() {
            out.push('$');
        } else {
            out.push_str(&std::env::var(&name).unwrap_or_default());
        }
    }
    out
}

/// Block until `path` exists, polling until `timeout` runs out.
pub fn wait_for_file(path: &Path, timeout: Duration) -> Result<(), FsUtilError> {
    let start = Instant::now();
    while !path.exists() {
        if start.elapsed() >= timeout {
            return Err(FsUtilError::Timeout {
                path: path.to_path_buf(),
                waited: timeout,
            });
        }
        thread::sleep(WAIT_POLL);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn ls_lt_sorts_by_modification_time() {
        let temp = TempDir::new().unwrap();
        let older = temp.path().join("older");
        let newer = temp.path().join("a-newer");
        fs::write(&older, b"1").unwrap();
        thread::sleep(Duration::from_millis(100));
        fs::write(&newer, b"2").unwrap();

        let listed = ls_lt(temp.path()).unwrap();
        assert_eq!(listed, vec![older, newer]);
    }

    #[test]
    fn ls_lt_rejects_non_directories() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("plain");
        fs::write(&file, b"x").unwrap();
        assert!(matches!(
            ls_lt(&file),
            Err(FsUtilError::NotADirectory(_))
        ));
    }

    #[test]
    fn copy_tree_replicates_nested_content() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("src");
        fs::create_dir_all(src.join("nested")).unwrap();
        fs::write(src.join("top.txt"), b"top").unwrap();
        fs::write(src.join("nested").join("deep.txt"), b"deep").unwrap();

        let dst = temp.path().join("dst");
        copy_tree(&src, &dst).unwrap();

        assert_eq!(fs::read(dst.join("top.txt")).unwrap(), b"top");
        assert_eq!(fs::read(dst.join("nested").join("deep.txt")).unwrap(), b"deep");
    }

    #[cfg(unix)]
    #[test]
    fn copy_tree_recreates_symlinks_without_following() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("src");
        fs::create_dir_all(&src).unwrap();
        fs::write(src.join("real.txt"), b"real").unwrap();
        std::os::unix::fs::symlink("real.txt", src.join("link.txt")).unwrap();

        let dst = temp.path().join("dst");
        copy_tree(&src, &dst).unwrap();

        let copied = dst.join("link.txt");
        assert!(fs::symlink_metadata(&copied).unwrap().file_type().is_symlink());
        assert_eq!(fs::read_link(&copied).unwrap(), PathBuf::from("real.txt"));
    }

    #[test]
    fn lock_file_is_exclusive_until_dropped() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("queue.lock");

        let held = LockFile::acquire(&path).unwrap();
        assert!(matches!(
            LockFile::acquire(&path),
            Err(FsUtilError::LockHeld(_))
        ));

        drop(held);
        let reacquired = LockFile::acquire(&path).unwrap();
        drop(reacquired);
    }

    #[test]
    fn write_atomic_replaces_content_and_leaves_no_droppings() {
        let temp = TempDir::new().unwrap();
        let target = temp.path().join("state.json");
        fs::write(&target, b"old").unwrap();

        write_atomic(&target, b"new").unwrap();

        assert_eq!(fs::read(&target).unwrap(), b"new");
        let leftovers: Vec<_> = fs::read_dir(temp.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(leftovers.len(), 1);
    }

    #[test]
    fn expand_path_resolves_env_vars() {
        std::env::set_var("MAILDROP_TEST_DIR", "/var/queues");
        assert_eq!(
            expand_path("$MAILDROP_TEST_DIR/orders"),
            PathBuf::from("/var/queues/orders")
        );
        assert_eq!(
            expand_path("${MAILDROP_TEST_DIR}/orders"),
            PathBuf::from("/var/queues/orders")
        );
    }

    #[test]
    fn expand_path_resolves_home() {
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_path("~/queues"), home.join("queues"));
        }
    }

    #[test]
    fn wait_for_file_times_out_then_succeeds() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("flag");

        let err = wait_for_file(&path, Duration::from_millis(120)).unwrap_err();
        assert!(matches!(err, FsUtilError::Timeout { .. }));

        fs::write(&path, b"").unwrap();
        wait_for_file(&path, Duration::from_millis(120)).unwrap();
    }
}
