use std::ffi::OsString;
use std::fs;
use std::io;
use std::os::unix::ffi::OsStringExt;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

use log::trace;
use nix::unistd::Pid;
use path_dedot::ParseDot;
use serde::{Deserialize, Serialize};

use crate::error::PathResolutionError;
use crate::process_state::files::FdKind;
use crate::process_state::ProcessState;

const PAGE_SIZE: usize = 4096;

/// A (device, inode) pair naming one concrete filesystem object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FileIdentity {
    pub dev: u64,
    pub ino: u64,
}

impl From<&fs::Metadata> for FileIdentity {
    fn from(meta: &fs::Metadata) -> Self {
        Self {
            dev: meta.dev(),
            ino: meta.ino(),
        }
    }
}

/// An absolute path together with the identity it had when it was resolved
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    pub path: PathBuf,
    pub identity: FileIdentity,
}

/// Read access to the address space of a traced process
pub trait MemoryReader {
    /// Reads up to `len` bytes at `addr`. A short read is not an error.
    fn read_bytes(&self, pid: Pid, addr: usize, len: usize) -> io::Result<Vec<u8>>;

    /// Reads a nul-terminated string of at most `max_len` bytes (terminator excluded).
    ///
    /// Reads never cross a page boundary in one request so that a string ending just before an
    /// unmapped page can still be read.
    fn read_cstr(&self, pid: Pid, addr: usize, max_len: usize) -> Result<Vec<u8>, PathResolutionError> {
        let mut buf: Vec<u8> = Vec::with_capacity(256);
        let mut current = addr;
        while buf.len() <= max_len {
            let chunk = PAGE_SIZE - (current % PAGE_SIZE);
            let bytes = self
                .read_bytes(pid, current, chunk)
                .map_err(|_| PathResolutionError::Memory { pid, addr: current })?;
            if bytes.is_empty() {
                return Err(PathResolutionError::Memory { pid, addr: current });
            }
            if let Some(nul) = bytes.iter().position(|&b| b == 0) {
                buf.extend_from_slice(&bytes[..nul]);
                return if buf.len() <= max_len {
                    Ok(buf)
                } else {
                    Err(PathResolutionError::NotNulTerminated { addr, max_len })
                };
            }
            buf.extend_from_slice(&bytes);
            current += bytes.len();
        }
        Err(PathResolutionError::NotNulTerminated { addr, max_len })
    }
}

/// Filesystem metadata queries used to compute identities
pub trait FileSystem {
    fn identity(&self, path: &Path, follow: bool) -> io::Result<FileIdentity>;
    fn canonicalize(&self, path: &Path) -> io::Result<PathBuf>;
}

/// `FileSystem` backed by the host's filesystem
#[derive(Debug, Default)]
pub struct HostFileSystem;

impl FileSystem for HostFileSystem {
    fn identity(&self, path: &Path, follow: bool) -> io::Result<FileIdentity> {
        let meta = if follow {
            fs::metadata(path)?
        } else {
            fs::symlink_metadata(path)?
        };
        Ok(FileIdentity::from(&meta))
    }

    fn canonicalize(&self, path: &Path) -> io::Result<PathBuf> {
        fs::canonicalize(path)
    }
}

/// Turns path arguments of a syscall into absolute paths and file identities
pub struct Resolver<'a> {
    memory: &'a dyn MemoryReader,
    fs: &'a dyn FileSystem,
    max_path_len: usize,
}

impl<'a> Resolver<'a> {
    pub fn new(memory: &'a dyn MemoryReader, fs: &'a dyn FileSystem, max_path_len: usize) -> Self {
        Self {
            memory,
            fs,
            max_path_len,
        }
    }

    /// Reads a path argument out of the traced process's memory
    pub fn read_path(&self, pid: Pid, addr: u64) -> Result<PathBuf, PathResolutionError> {
        let bytes = self.memory.read_cstr(pid, addr as usize, self.max_path_len)?;
        Ok(PathBuf::from(OsString::from_vec(bytes)))
    }

    /// Reads `len` raw bytes from the traced process
    pub fn read_bytes(&self, pid: Pid, addr: u64, len: usize) -> Result<Vec<u8>, PathResolutionError> {
        match self.memory.read_bytes(pid, addr as usize, len) {
            Ok(bytes) if bytes.len() == len => Ok(bytes),
            _ => Err(PathResolutionError::Memory {
                pid,
                addr: addr as usize,
            }),
        }
    }

    /// Makes `raw` absolute: against the path of `dirfd` if one is given, otherwise against the
    /// process's working directory
    pub fn absolute(
        &self,
        process: &ProcessState,
        raw: &Path,
        dirfd: Option<i32>,
    ) -> Result<PathBuf, PathResolutionError> {
        if raw.is_absolute() {
            return dedot(raw);
        }
        let base = match dirfd {
            None | Some(libc::AT_FDCWD) => process.cwd.clone(),
            Some(fd) => self.dirfd_path(process, fd)?,
        };
        dedot(&base.join(raw))
    }

    /// Path associated with an open descriptor of `process`
    pub fn dirfd_path(&self, process: &ProcessState, fd: i32) -> Result<PathBuf, PathResolutionError> {
        match process.fd(fd).map(|entry| entry.kind) {
            Some(FdKind::File { path, .. }) => Ok(path),
            _ => Err(PathResolutionError::BadDirFd {
                pid: process.pid,
                fd,
            }),
        }
    }

    /// Point-in-time identity of `path`
    pub fn identity(&self, path: &Path, follow: bool) -> Result<FileIdentity, PathResolutionError> {
        self.fs
            .identity(path, follow)
            .map_err(|source| PathResolutionError::Metadata {
                path: path.to_path_buf(),
                source,
            })
    }

    /// Reads the path at `addr` and makes it absolute, without touching the filesystem
    pub fn locate(
        &self,
        process: &ProcessState,
        addr: u64,
        dirfd: Option<i32>,
    ) -> Result<PathBuf, PathResolutionError> {
        let raw = self.read_path(process.pid, addr)?;
        self.absolute(process, &raw, dirfd)
    }

    /// Reads, locates and stats the path argument at `addr`
    pub fn resolve(
        &self,
        process: &ProcessState,
        addr: u64,
        dirfd: Option<i32>,
        follow: bool,
    ) -> Result<Resolved, PathResolutionError> {
        let path = self.locate(process, addr, dirfd)?;
        let identity = self.identity(&path, follow)?;
        trace!("Resolved {:?} to {:?}", path, identity);
        Ok(Resolved { path, identity })
    }

    /// Directory a process changes into. Symlinks in the path are resolved when possible so that
    /// later `..` components behave as in the kernel.
    pub fn directory(&self, path: &Path) -> PathBuf {
        self.fs
            .canonicalize(path)
            .or_else(|_| dedot(path))
            .unwrap_or_else(|_| path.to_path_buf())
    }
}

/// Lexically removes `.` and `..` components of an absolute path
fn dedot(path: &Path) -> Result<PathBuf, PathResolutionError> {
    path.parse_dot()
        .map(|p| p.into_owned())
        .map_err(|source| PathResolutionError::Metadata {
            path: path.to_path_buf(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct Regions(HashMap<usize, Vec<u8>>);

    impl MemoryReader for Regions {
        fn read_bytes(&self, _pid: Pid, addr: usize, len: usize) -> io::Result<Vec<u8>> {
            for (base, data) in &self.0 {
                if addr >= *base && addr < base + data.len() {
                    let start = addr - base;
                    let end = (start + len).min(data.len());
                    return Ok(data[start..end].to_vec());
                }
            }
            Err(io::Error::from_raw_os_error(libc::EFAULT))
        }
    }

    #[test]
    fn dedot_collapses_dots() {
        assert_eq!(dedot(Path::new("/a/./b/../c")).unwrap(), PathBuf::from("/a/c"));
        assert_eq!(dedot(Path::new("/..")).unwrap(), PathBuf::from("/"));
    }

    #[test]
    fn read_cstr_stops_at_nul() {
        let mem = Regions(HashMap::from([(0x1000, b"hello\0world".to_vec())]));
        let s = mem.read_cstr(Pid::from_raw(1), 0x1000, 64).unwrap();
        assert_eq!(s, b"hello");
    }

    #[test]
    fn read_cstr_spans_pages() {
        let mut data = vec![b'x'; PAGE_SIZE + 10];
        data.push(0);
        let mem = Regions(HashMap::from([(0x10_000 - 5, data)]));
        let s = mem.read_cstr(Pid::from_raw(1), 0x10_000 - 5, 8192).unwrap();
        assert_eq!(s.len(), PAGE_SIZE + 10);
    }

    #[test]
    fn read_cstr_is_bounded() {
        let mem = Regions(HashMap::from([(0x1000, vec![b'a'; 100])]));
        let err = mem.read_cstr(Pid::from_raw(1), 0x1000, 16).unwrap_err();
        assert!(matches!(err, PathResolutionError::NotNulTerminated { .. }));
    }

    #[test]
    fn read_cstr_reports_bad_pointer() {
        let mem = Regions(HashMap::new());
        let err = mem.read_cstr(Pid::from_raw(7), 0, 16).unwrap_err();
        assert!(matches!(err, PathResolutionError::Memory { addr: 0, .. }));
    }
}
