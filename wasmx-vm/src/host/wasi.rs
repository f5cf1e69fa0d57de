//! `wasi_snapshot_preview1` / `wasi_unstable` over an in-memory filesystem.
//!
//! Nothing here touches the host: files live in [`WasiState`], clocks
//! report the block time and `random_get` draws from a stream seeded by the
//! block and the contract. Sockets are not supported.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;

use tracing::{debug, info, warn};

use wasmx_crypto::hash::{sha256, sha256_multi};

use super::{HostCall, HostFnSpec};
use crate::error::VmError;
use crate::value::{HostOutcome, HostVal, Kind};

const I: Kind = Kind::I32;
const L: Kind = Kind::I64;

pub type Errno = u16;

/// WASI error numbers.
pub mod errno {
    use super::Errno;

    pub const SUCCESS: Errno = 0;
    pub const BADF: Errno = 8;
    pub const EXIST: Errno = 20;
    pub const INVAL: Errno = 28;
    pub const ISDIR: Errno = 31;
    pub const NOENT: Errno = 44;
    pub const NOSYS: Errno = 52;
    pub const NOTDIR: Errno = 54;
    pub const NOTEMPTY: Errno = 55;
    pub const SPIPE: Errno = 70;
    pub const NOTCAPABLE: Errno = 76;
}

const FILETYPE_CHARACTER_DEVICE: u8 = 2;
const FILETYPE_DIRECTORY: u8 = 3;
const FILETYPE_REGULAR_FILE: u8 = 4;

const OFLAGS_CREAT: u32 = 1;
const OFLAGS_DIRECTORY: u32 = 2;
const OFLAGS_EXCL: u32 = 4;
const OFLAGS_TRUNC: u32 = 8;
const FDFLAGS_APPEND: u32 = 1;

const WHENCE_SET: i32 = 0;
const WHENCE_CUR: i32 = 1;
const WHENCE_END: i32 = 2;

const RIGHTS_ALL: u64 = u64::MAX;
const DIRENT_HEADER_SIZE: usize = 24;
const SUBSCRIPTION_SIZE: usize = 48;
const EVENT_SIZE: usize = 32;

/// First descriptor handed out after stdin, stdout and stderr.
pub const FIRST_PREOPEN_FD: u32 = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Descriptor {
    Stdin,
    Stdout,
    Stderr,
    Dir {
        path: String,
        preopen: Option<String>,
    },
    File {
        path: String,
        pos: u64,
        append: bool,
    },
}

/// Join `rel` onto the directory `base`. Paths are kept without a leading
/// slash; the root is the empty string.
fn join_path(base: &str, rel: &str) -> Result<String, Errno> {
    let mut parts: Vec<&str> = if rel.starts_with('/') {
        Vec::new()
    } else {
        base.split('/').filter(|p| !p.is_empty()).collect()
    };
    for segment in rel.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if parts.pop().is_none() {
                    return Err(errno::NOTCAPABLE);
                }
            }
            name => parts.push(name),
        }
    }
    Ok(parts.join("/"))
}

fn parent_of(path: &str) -> &str {
    path.rsplit_once('/').map(|(parent, _)| parent).unwrap_or("")
}

fn inode(path: &str) -> u64 {
    let digest = sha256(path.as_bytes());
    u64::from_le_bytes([
        digest[0], digest[1], digest[2], digest[3], digest[4], digest[5], digest[6], digest[7],
    ])
}

/// Filesystem, descriptors and process data of one WASI guest.
#[derive(Debug, Clone)]
pub struct WasiState {
    files: BTreeMap<String, Vec<u8>>,
    dirs: BTreeSet<String>,
    fds: HashMap<u32, Descriptor>,
    next_fd: u32,
    args: Vec<String>,
    env: Vec<(String, String)>,
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    random_counter: u64,
}

impl Default for WasiState {
    fn default() -> Self {
        let fds = HashMap::from([
            (0, Descriptor::Stdin),
            (1, Descriptor::Stdout),
            (2, Descriptor::Stderr),
        ]);
        Self {
            files: BTreeMap::new(),
            dirs: BTreeSet::from([String::new()]),
            fds,
            next_fd: FIRST_PREOPEN_FD,
            args: Vec::new(),
            env: Vec::new(),
            stdout: Vec::new(),
            stderr: Vec::new(),
            random_counter: 0,
        }
    }
}

impl WasiState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_args(&mut self, args: Vec<String>) {
        self.args = args;
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn set_env(&mut self, env: Vec<(String, String)>) {
        self.env = env;
    }

    pub fn stdout(&self) -> &[u8] {
        &self.stdout
    }

    pub fn stderr(&self) -> &[u8] {
        &self.stderr
    }

    /// Expose the directory `guest_path` to the guest and return its fd.
    pub fn preopen(&mut self, guest_path: &str) -> u32 {
        let path = join_path("", guest_path).unwrap_or_default();
        self.create_dir_all(&path);
        let fd = self.allocate_fd();
        self.fds.insert(
            fd,
            Descriptor::Dir {
                path,
                preopen: Some(guest_path.to_string()),
            },
        );
        fd
    }

    /// Preopen `guest_path` seeded with a snapshot of the host directory
    /// `host_dir`. Unreadable entries are skipped.
    pub fn preopen_host_dir(&mut self, guest_path: &str, host_dir: &Path) -> u32 {
        let fd = self.preopen(guest_path);
        let root = join_path("", guest_path).unwrap_or_default();
        self.snapshot_dir(&root, host_dir);
        fd
    }

    fn snapshot_dir(&mut self, guest_dir: &str, host_dir: &Path) {
        let Ok(entries) = std::fs::read_dir(host_dir) else {
            warn!(dir = %host_dir.display(), "preopen directory not readable");
            return;
        };
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            let Ok(guest) = join_path(guest_dir, &name) else {
                continue;
            };
            let host = entry.path();
            if host.is_dir() {
                self.create_dir_all(&guest);
                self.snapshot_dir(&guest, &host);
            } else if let Ok(data) = std::fs::read(&host) {
                self.files.insert(guest, data);
            }
        }
    }

    /// Create or replace a file, creating missing parent directories.
    pub fn write_file(&mut self, path: &str, data: Vec<u8>) {
        let path = join_path("", path).unwrap_or_default();
        self.create_dir_all(parent_of(&path));
        self.files.insert(path, data);
    }

    pub fn read_file(&self, path: &str) -> Option<&[u8]> {
        let path = join_path("", path).ok()?;
        self.files.get(&path).map(Vec::as_slice)
    }

    fn create_dir_all(&mut self, path: &str) {
        let mut current = String::new();
        for part in path.split('/').filter(|p| !p.is_empty()) {
            if !current.is_empty() {
                current.push('/');
            }
            current.push_str(part);
            self.dirs.insert(current.clone());
        }
    }

    fn allocate_fd(&mut self) -> u32 {
        while self.fds.contains_key(&self.next_fd) {
            self.next_fd += 1;
        }
        let fd = self.next_fd;
        self.next_fd += 1;
        fd
    }

    fn descriptor(&self, fd: u32) -> Result<&Descriptor, Errno> {
        self.fds.get(&fd).ok_or(errno::BADF)
    }

    fn dir_path(&self, fd: u32) -> Result<String, Errno> {
        match self.descriptor(fd)? {
            Descriptor::Dir { path, .. } => Ok(path.clone()),
            _ => Err(errno::NOTDIR),
        }
    }

    fn resolve(&self, dir_fd: u32, rel: &str) -> Result<String, Errno> {
        join_path(&self.dir_path(dir_fd)?, rel)
    }

    fn is_dir(&self, path: &str) -> bool {
        self.dirs.contains(path)
    }

    /// Open `rel` relative to `dir_fd`.
    fn open(&mut self, dir_fd: u32, rel: &str, oflags: u32, fdflags: u32) -> Result<u32, Errno> {
        let path = self.resolve(dir_fd, rel)?;
        if self.is_dir(&path) {
            if oflags & (OFLAGS_CREAT | OFLAGS_EXCL) == (OFLAGS_CREAT | OFLAGS_EXCL) {
                return Err(errno::EXIST);
            }
            let fd = self.allocate_fd();
            self.fds.insert(fd, Descriptor::Dir { path, preopen: None });
            return Ok(fd);
        }
        if oflags & OFLAGS_DIRECTORY != 0 {
            return Err(if self.files.contains_key(&path) {
                errno::NOTDIR
            } else {
                errno::NOENT
            });
        }
        match self.files.get_mut(&path) {
            Some(_) if oflags & OFLAGS_EXCL != 0 => return Err(errno::EXIST),
            Some(data) => {
                if oflags & OFLAGS_TRUNC != 0 {
                    data.clear();
                }
            }
            None => {
                if oflags & OFLAGS_CREAT == 0 {
                    return Err(errno::NOENT);
                }
                if !self.is_dir(parent_of(&path)) {
                    return Err(errno::NOENT);
                }
                self.files.insert(path.clone(), Vec::new());
            }
        }
        let fd = self.allocate_fd();
        self.fds.insert(
            fd,
            Descriptor::File {
                path,
                pos: 0,
                append: fdflags & FDFLAGS_APPEND != 0,
            },
        );
        Ok(fd)
    }

    fn close(&mut self, fd: u32) -> Result<(), Errno> {
        self.fds.remove(&fd).map(|_| ()).ok_or(errno::BADF)
    }

    fn renumber(&mut self, from: u32, to: u32) -> Result<(), Errno> {
        let descriptor = self.fds.remove(&from).ok_or(errno::BADF)?;
        self.fds.insert(to, descriptor);
        Ok(())
    }

    /// Read up to `max` bytes. `offset` reads positionally without moving
    /// the cursor.
    fn read(&mut self, fd: u32, max: usize, offset: Option<u64>) -> Result<Vec<u8>, Errno> {
        let (path, pos) = match self.fds.get(&fd).ok_or(errno::BADF)? {
            Descriptor::Stdin => return Ok(Vec::new()),
            Descriptor::Stdout | Descriptor::Stderr => return Err(errno::BADF),
            Descriptor::Dir { .. } => return Err(errno::ISDIR),
            Descriptor::File { path, pos, .. } => (path.clone(), *pos),
        };
        let data = self.files.get(&path).ok_or(errno::NOENT)?;
        let start = offset.unwrap_or(pos).min(data.len() as u64) as usize;
        let end = start.saturating_add(max).min(data.len());
        let chunk = data[start..end].to_vec();
        if offset.is_none() {
            if let Some(Descriptor::File { pos, .. }) = self.fds.get_mut(&fd) {
                *pos = end as u64;
            }
        }
        Ok(chunk)
    }

    /// Write `data`, returning the byte count. `offset` writes positionally.
    fn write(&mut self, fd: u32, data: &[u8], offset: Option<u64>) -> Result<usize, Errno> {
        let (path, pos, append) = match self.fds.get(&fd).ok_or(errno::BADF)? {
            Descriptor::Stdout => {
                self.stdout.extend_from_slice(data);
                return Ok(data.len());
            }
            Descriptor::Stderr => {
                self.stderr.extend_from_slice(data);
                return Ok(data.len());
            }
            Descriptor::Stdin => return Err(errno::BADF),
            Descriptor::Dir { .. } => return Err(errno::ISDIR),
            Descriptor::File { path, pos, append } => (path.clone(), *pos, *append),
        };
        let file = self.files.get_mut(&path).ok_or(errno::NOENT)?;
        let start = match offset {
            Some(at) => at as usize,
            None if append => file.len(),
            None => pos as usize,
        };
        let end = start + data.len();
        if file.len() < end {
            file.resize(end, 0);
        }
        file[start..end].copy_from_slice(data);
        if offset.is_none() {
            if let Some(Descriptor::File { pos, .. }) = self.fds.get_mut(&fd) {
                *pos = end as u64;
            }
        }
        Ok(data.len())
    }

    fn seek(&mut self, fd: u32, delta: i64, whence: i32) -> Result<u64, Errno> {
        let size = match self.fds.get(&fd).ok_or(errno::BADF)? {
            Descriptor::File { path, .. } => self.files.get(path).map_or(0, Vec::len) as i64,
            Descriptor::Dir { .. } => return Err(errno::ISDIR),
            _ => return Err(errno::SPIPE),
        };
        let Some(Descriptor::File { pos, .. }) = self.fds.get_mut(&fd) else {
            return Err(errno::BADF);
        };
        let base = match whence {
            WHENCE_SET => 0,
            WHENCE_CUR => *pos as i64,
            WHENCE_END => size,
            _ => return Err(errno::INVAL),
        };
        let target = base.checked_add(delta).filter(|t| *t >= 0).ok_or(errno::INVAL)?;
        *pos = target as u64;
        Ok(*pos)
    }

    fn set_size(&mut self, fd: u32, size: u64) -> Result<(), Errno> {
        let path = match self.descriptor(fd)? {
            Descriptor::File { path, .. } => path.clone(),
            Descriptor::Dir { .. } => return Err(errno::ISDIR),
            _ => return Err(errno::INVAL),
        };
        let file = self.files.get_mut(&path).ok_or(errno::NOENT)?;
        file.resize(size as usize, 0);
        Ok(())
    }

    /// File type and size of a descriptor.
    fn stat_fd(&self, fd: u32) -> Result<(u8, u64, u64), Errno> {
        match self.descriptor(fd)? {
            Descriptor::Stdin | Descriptor::Stdout | Descriptor::Stderr => {
                Ok((FILETYPE_CHARACTER_DEVICE, 0, fd as u64))
            }
            Descriptor::Dir { path, .. } => Ok((FILETYPE_DIRECTORY, 0, inode(path))),
            Descriptor::File { path, .. } => self.stat_path(path),
        }
    }

    fn stat_path(&self, path: &str) -> Result<(u8, u64, u64), Errno> {
        if self.is_dir(path) {
            return Ok((FILETYPE_DIRECTORY, 0, inode(path)));
        }
        let data = self.files.get(path).ok_or(errno::NOENT)?;
        Ok((FILETYPE_REGULAR_FILE, data.len() as u64, inode(path)))
    }

    /// Direct children of `dir`, in name order.
    fn list_dir(&self, dir: &str) -> Vec<(String, u8, u64)> {
        let is_child = |path: &str| !path.is_empty() && parent_of(path) == dir;
        let name = |path: &str| path.rsplit('/').next().unwrap_or(path).to_string();
        let mut entries: Vec<(String, u8, u64)> = self
            .dirs
            .iter()
            .filter(|p| is_child(p))
            .map(|p| (name(p), FILETYPE_DIRECTORY, inode(p)))
            .chain(
                self.files
                    .keys()
                    .filter(|p| is_child(p))
                    .map(|p| (name(p), FILETYPE_REGULAR_FILE, inode(p))),
            )
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    fn create_dir(&mut self, path: String) -> Result<(), Errno> {
        if self.is_dir(&path) || self.files.contains_key(&path) {
            return Err(errno::EXIST);
        }
        if !self.is_dir(parent_of(&path)) {
            return Err(errno::NOENT);
        }
        self.dirs.insert(path);
        Ok(())
    }

    fn remove_dir(&mut self, path: &str) -> Result<(), Errno> {
        if !self.is_dir(path) {
            return Err(if self.files.contains_key(path) {
                errno::NOTDIR
            } else {
                errno::NOENT
            });
        }
        if path.is_empty() || !self.list_dir(path).is_empty() {
            return Err(errno::NOTEMPTY);
        }
        self.dirs.remove(path);
        Ok(())
    }

    fn unlink(&mut self, path: &str) -> Result<(), Errno> {
        if self.is_dir(path) {
            return Err(errno::ISDIR);
        }
        self.files.remove(path).map(|_| ()).ok_or(errno::NOENT)
    }

    fn rename(&mut self, from: &str, to: String) -> Result<(), Errno> {
        if !self.is_dir(parent_of(&to)) {
            return Err(errno::NOENT);
        }
        if let Some(data) = self.files.remove(from) {
            self.files.insert(to, data);
            return Ok(());
        }
        if self.is_dir(from) {
            if !self.list_dir(from).is_empty() {
                return Err(errno::NOTEMPTY);
            }
            self.dirs.remove(from);
            self.dirs.insert(to);
            return Ok(());
        }
        Err(errno::NOENT)
    }

    /// Next `len` bytes of the deterministic random stream for `seed`.
    fn random_bytes(&mut self, seed: &[u8], len: usize) -> Vec<u8> {
        let mut out = Vec::with_capacity(len);
        while out.len() < len {
            let block = sha256_multi(&[seed, &self.random_counter.to_le_bytes()]);
            self.random_counter += 1;
            let take = (len - out.len()).min(block.len());
            out.extend_from_slice(&block[..take]);
        }
        out
    }
}

pub static FUNCTIONS: &[HostFnSpec] = &[
    HostFnSpec::new("args_get", &[I, I], &[I], args_get),
    HostFnSpec::new("args_sizes_get", &[I, I], &[I], args_sizes_get),
    HostFnSpec::new("environ_get", &[I, I], &[I], environ_get),
    HostFnSpec::new("environ_sizes_get", &[I, I], &[I], environ_sizes_get),
    HostFnSpec::new("clock_res_get", &[I, I], &[I], clock_res_get),
    HostFnSpec::new("clock_time_get", &[I, L, I], &[I], clock_time_get),
    HostFnSpec::new("fd_advise", &[I, L, L, I], &[I], fd_noop),
    HostFnSpec::new("fd_allocate", &[I, L, L], &[I], fd_allocate),
    HostFnSpec::new("fd_close", &[I], &[I], fd_close),
    HostFnSpec::new("fd_datasync", &[I], &[I], fd_noop),
    HostFnSpec::new("fd_fdstat_get", &[I, I], &[I], fd_fdstat_get),
    HostFnSpec::new("fd_fdstat_set_flags", &[I, I], &[I], fd_noop),
    HostFnSpec::new("fd_fdstat_set_rights", &[I, L, L], &[I], fd_noop),
    HostFnSpec::new("fd_filestat_get", &[I, I], &[I], fd_filestat_get),
    HostFnSpec::new("fd_filestat_set_size", &[I, L], &[I], fd_filestat_set_size),
    HostFnSpec::new("fd_filestat_set_times", &[I, L, L, I], &[I], fd_noop),
    HostFnSpec::new("fd_pread", &[I, I, I, L, I], &[I], fd_pread),
    HostFnSpec::new("fd_prestat_get", &[I, I], &[I], fd_prestat_get),
    HostFnSpec::new("fd_prestat_dir_name", &[I, I, I], &[I], fd_prestat_dir_name),
    HostFnSpec::new("fd_pwrite", &[I, I, I, L, I], &[I], fd_pwrite),
    HostFnSpec::new("fd_read", &[I, I, I, I], &[I], fd_read),
    HostFnSpec::new("fd_readdir", &[I, I, I, L, I], &[I], fd_readdir),
    HostFnSpec::new("fd_renumber", &[I, I], &[I], fd_renumber),
    HostFnSpec::new("fd_seek", &[I, L, I, I], &[I], fd_seek),
    HostFnSpec::new("fd_sync", &[I], &[I], fd_noop),
    HostFnSpec::new("fd_tell", &[I, I], &[I], fd_tell),
    HostFnSpec::new("fd_write", &[I, I, I, I], &[I], fd_write),
    HostFnSpec::new("path_create_directory", &[I, I, I], &[I], path_create_directory),
    HostFnSpec::new("path_filestat_get", &[I, I, I, I, I], &[I], path_filestat_get),
    HostFnSpec::new("path_filestat_set_times", &[I, I, I, I, L, L, I], &[I], path_noop),
    HostFnSpec::new("path_link", &[I, I, I, I, I, I, I], &[I], unsupported),
    HostFnSpec::new("path_open", &[I, I, I, I, I, L, L, I, I], &[I], path_open),
    HostFnSpec::new("path_readlink", &[I, I, I, I, I, I], &[I], unsupported),
    HostFnSpec::new("path_remove_directory", &[I, I, I], &[I], path_remove_directory),
    HostFnSpec::new("path_rename", &[I, I, I, I, I, I], &[I], path_rename),
    HostFnSpec::new("path_symlink", &[I, I, I, I, I], &[I], unsupported),
    HostFnSpec::new("path_unlink_file", &[I, I, I], &[I], path_unlink_file),
    HostFnSpec::new("poll_oneoff", &[I, I, I, I], &[I], poll_oneoff),
    HostFnSpec::new("proc_exit", &[I], &[], proc_exit),
    HostFnSpec::new("proc_raise", &[I], &[I], unsupported),
    HostFnSpec::new("sched_yield", &[], &[I], sched_yield),
    HostFnSpec::new("random_get", &[I, I], &[I], random_get),
    HostFnSpec::new("sock_accept", &[I, I, I], &[I], unsupported),
    HostFnSpec::new("sock_recv", &[I, I, I, I, I, I], &[I], unsupported),
    HostFnSpec::new("sock_send", &[I, I, I, I, I], &[I], unsupported),
    HostFnSpec::new("sock_shutdown", &[I, I], &[I], unsupported),
];

// ─── Helpers ────────────────────────────────────────────────────────────────

fn u32_arg(value: HostVal) -> Result<u32, VmError> {
    Ok(value.as_i32()? as u32)
}

fn ret(code: Errno) -> Result<HostOutcome, VmError> {
    Ok(HostOutcome::i32(code as i32))
}

fn ret_result(result: Result<(), Errno>) -> Result<HostOutcome, VmError> {
    ret(result.err().unwrap_or(errno::SUCCESS))
}

fn read_path(call: &mut HostCall<'_, '_>, ptr: HostVal, len: HostVal) -> Result<String, VmError> {
    let bytes = call.mem().read(u32_arg(ptr)? as usize, u32_arg(len)? as usize)?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// `(buf, len)` pairs of an iovec array.
fn read_iovecs(
    call: &mut HostCall<'_, '_>,
    ptr: HostVal,
    count: HostVal,
) -> Result<Vec<(usize, usize)>, VmError> {
    let base = u32_arg(ptr)? as usize;
    let count = u32_arg(count)? as usize;
    let raw = call.mem().read(base, count * 8)?;
    Ok(raw
        .chunks_exact(8)
        .map(|c| {
            let buf = u32::from_le_bytes([c[0], c[1], c[2], c[3]]) as usize;
            let len = u32::from_le_bytes([c[4], c[5], c[6], c[7]]) as usize;
            (buf, len)
        })
        .collect())
}

fn gather(call: &mut HostCall<'_, '_>, iovecs: &[(usize, usize)]) -> Result<Vec<u8>, VmError> {
    let mut data = Vec::new();
    for (buf, len) in iovecs {
        data.extend(call.mem().read(*buf, *len)?);
    }
    Ok(data)
}

fn scatter(
    call: &mut HostCall<'_, '_>,
    iovecs: &[(usize, usize)],
    data: &[u8],
) -> Result<(), VmError> {
    let mut rest = data;
    for (buf, len) in iovecs {
        if rest.is_empty() {
            break;
        }
        let take = rest.len().min(*len);
        call.mem().write(*buf, &rest[..take])?;
        rest = &rest[take..];
    }
    Ok(())
}

fn write_u32(call: &mut HostCall<'_, '_>, ptr: HostVal, value: u32) -> Result<(), VmError> {
    call.mem().write_u32_le(u32_arg(ptr)? as usize, value)
}

fn write_u64(call: &mut HostCall<'_, '_>, ptr: HostVal, value: u64) -> Result<(), VmError> {
    call.mem().write_u64_le(u32_arg(ptr)? as usize, value)
}

/// Write NUL-terminated `items` into `buf` and their addresses into `list`.
fn write_string_list(
    call: &mut HostCall<'_, '_>,
    items: &[String],
    list: HostVal,
    buf: HostVal,
) -> Result<HostOutcome, VmError> {
    let list = u32_arg(list)? as usize;
    let mut cursor = u32_arg(buf)? as usize;
    for (i, item) in items.iter().enumerate() {
        call.mem().write_u32_le(list + i * 4, cursor as u32)?;
        let mut bytes = item.as_bytes().to_vec();
        bytes.push(0);
        call.mem().write(cursor, &bytes)?;
        cursor += bytes.len();
    }
    ret(errno::SUCCESS)
}

fn write_sizes(
    call: &mut HostCall<'_, '_>,
    items: &[String],
    count_ptr: HostVal,
    size_ptr: HostVal,
) -> Result<HostOutcome, VmError> {
    let size: usize = items.iter().map(|s| s.len() + 1).sum();
    write_u32(call, count_ptr, items.len() as u32)?;
    write_u32(call, size_ptr, size as u32)?;
    ret(errno::SUCCESS)
}

fn environ(call: &HostCall<'_, '_>) -> Vec<String> {
    call.state()
        .wasi
        .env
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect()
}

/// Layout of `filestat`: dev, ino, filetype, nlink, size, atim, mtim, ctim.
fn filestat_bytes(filetype: u8, size: u64, ino: u64, time_ns: u64) -> Vec<u8> {
    let mut out = vec![0u8; 64];
    out[8..16].copy_from_slice(&ino.to_le_bytes());
    out[16] = filetype;
    out[24..32].copy_from_slice(&1u64.to_le_bytes());
    out[32..40].copy_from_slice(&size.to_le_bytes());
    for offset in [40, 48, 56] {
        out[offset..offset + 8].copy_from_slice(&time_ns.to_le_bytes());
    }
    out
}

// ─── Args, Environment, Clocks ──────────────────────────────────────────────

fn args_get(call: &mut HostCall<'_, '_>, args: &[HostVal]) -> Result<HostOutcome, VmError> {
    let items = call.state().wasi.args.clone();
    write_string_list(call, &items, args[0], args[1])
}

fn args_sizes_get(call: &mut HostCall<'_, '_>, args: &[HostVal]) -> Result<HostOutcome, VmError> {
    let items = call.state().wasi.args.clone();
    write_sizes(call, &items, args[0], args[1])
}

fn environ_get(call: &mut HostCall<'_, '_>, args: &[HostVal]) -> Result<HostOutcome, VmError> {
    let items = environ(call);
    write_string_list(call, &items, args[0], args[1])
}

fn environ_sizes_get(
    call: &mut HostCall<'_, '_>,
    args: &[HostVal],
) -> Result<HostOutcome, VmError> {
    let items = environ(call);
    write_sizes(call, &items, args[0], args[1])
}

fn clock_res_get(call: &mut HostCall<'_, '_>, args: &[HostVal]) -> Result<HostOutcome, VmError> {
    write_u64(call, args[1], 1)?;
    ret(errno::SUCCESS)
}

/// Every clock reads the block time.
fn clock_time_get(call: &mut HostCall<'_, '_>, args: &[HostVal]) -> Result<HostOutcome, VmError> {
    let now = call.env().block.timestamp_ns;
    write_u64(call, args[2], now)?;
    ret(errno::SUCCESS)
}

// ─── Descriptors ────────────────────────────────────────────────────────────

fn fd_noop(call: &mut HostCall<'_, '_>, args: &[HostVal]) -> Result<HostOutcome, VmError> {
    let fd = u32_arg(args[0])?;
    ret_result(call.state().wasi.descriptor(fd).map(|_| ()))
}

fn fd_allocate(call: &mut HostCall<'_, '_>, args: &[HostVal]) -> Result<HostOutcome, VmError> {
    let fd = u32_arg(args[0])?;
    let end = (args[1].as_i64()? as u64).saturating_add(args[2].as_i64()? as u64);
    let wasi = &mut call.state_mut().wasi;
    let current = match wasi.stat_fd(fd) {
        Ok((_, size, _)) => size,
        Err(code) => return ret(code),
    };
    if end <= current {
        return ret(errno::SUCCESS);
    }
    ret_result(wasi.set_size(fd, end))
}

fn fd_close(call: &mut HostCall<'_, '_>, args: &[HostVal]) -> Result<HostOutcome, VmError> {
    let fd = u32_arg(args[0])?;
    ret_result(call.state_mut().wasi.close(fd))
}

fn fd_fdstat_get(call: &mut HostCall<'_, '_>, args: &[HostVal]) -> Result<HostOutcome, VmError> {
    let fd = u32_arg(args[0])?;
    let wasi = &call.state().wasi;
    let (filetype, _, _) = match wasi.stat_fd(fd) {
        Ok(stat) => stat,
        Err(code) => return ret(code),
    };
    let flags: u16 = match wasi.descriptor(fd) {
        Ok(Descriptor::File { append: true, .. }) => FDFLAGS_APPEND as u16,
        _ => 0,
    };
    let mut out = vec![0u8; 24];
    out[0] = filetype;
    out[2..4].copy_from_slice(&flags.to_le_bytes());
    out[8..16].copy_from_slice(&RIGHTS_ALL.to_le_bytes());
    out[16..24].copy_from_slice(&RIGHTS_ALL.to_le_bytes());
    call.mem().write(u32_arg(args[1])? as usize, &out)?;
    ret(errno::SUCCESS)
}

fn fd_filestat_get(call: &mut HostCall<'_, '_>, args: &[HostVal]) -> Result<HostOutcome, VmError> {
    let fd = u32_arg(args[0])?;
    let (filetype, size, ino) = match call.state().wasi.stat_fd(fd) {
        Ok(stat) => stat,
        Err(code) => return ret(code),
    };
    let time = call.env().block.timestamp_ns;
    let out = filestat_bytes(filetype, size, ino, time);
    call.mem().write(u32_arg(args[1])? as usize, &out)?;
    ret(errno::SUCCESS)
}

fn fd_filestat_set_size(
    call: &mut HostCall<'_, '_>,
    args: &[HostVal],
) -> Result<HostOutcome, VmError> {
    let fd = u32_arg(args[0])?;
    let size = args[1].as_i64()? as u64;
    ret_result(call.state_mut().wasi.set_size(fd, size))
}

fn fd_prestat_get(call: &mut HostCall<'_, '_>, args: &[HostVal]) -> Result<HostOutcome, VmError> {
    let fd = u32_arg(args[0])?;
    let name_len = match call.state().wasi.descriptor(fd) {
        Ok(Descriptor::Dir {
            preopen: Some(name),
            ..
        }) => name.len() as u32,
        Ok(_) => return ret(errno::BADF),
        Err(code) => return ret(code),
    };
    let mut out = [0u8; 8];
    out[4..8].copy_from_slice(&name_len.to_le_bytes());
    call.mem().write(u32_arg(args[1])? as usize, &out)?;
    ret(errno::SUCCESS)
}

fn fd_prestat_dir_name(
    call: &mut HostCall<'_, '_>,
    args: &[HostVal],
) -> Result<HostOutcome, VmError> {
    let fd = u32_arg(args[0])?;
    let name = match call.state().wasi.descriptor(fd) {
        Ok(Descriptor::Dir {
            preopen: Some(name),
            ..
        }) => name.clone(),
        Ok(_) => return ret(errno::BADF),
        Err(code) => return ret(code),
    };
    let max = u32_arg(args[2])? as usize;
    if name.len() > max {
        return ret(errno::INVAL);
    }
    call.mem().write(u32_arg(args[1])? as usize, name.as_bytes())?;
    ret(errno::SUCCESS)
}

fn read_into(
    call: &mut HostCall<'_, '_>,
    args: &[HostVal],
    offset: Option<u64>,
    nread_ptr: HostVal,
) -> Result<HostOutcome, VmError> {
    let fd = u32_arg(args[0])?;
    let iovecs = read_iovecs(call, args[1], args[2])?;
    let capacity = iovecs.iter().map(|(_, len)| len).sum();
    let data = match call.state_mut().wasi.read(fd, capacity, offset) {
        Ok(data) => data,
        Err(code) => return ret(code),
    };
    scatter(call, &iovecs, &data)?;
    write_u32(call, nread_ptr, data.len() as u32)?;
    ret(errno::SUCCESS)
}

fn fd_read(call: &mut HostCall<'_, '_>, args: &[HostVal]) -> Result<HostOutcome, VmError> {
    read_into(call, args, None, args[3])
}

fn fd_pread(call: &mut HostCall<'_, '_>, args: &[HostVal]) -> Result<HostOutcome, VmError> {
    let offset = args[3].as_i64()? as u64;
    read_into(call, args, Some(offset), args[4])
}

fn write_from(
    call: &mut HostCall<'_, '_>,
    args: &[HostVal],
    offset: Option<u64>,
    nwritten_ptr: HostVal,
) -> Result<HostOutcome, VmError> {
    let fd = u32_arg(args[0])?;
    let iovecs = read_iovecs(call, args[1], args[2])?;
    let data = gather(call, &iovecs)?;
    let written = match call.state_mut().wasi.write(fd, &data, offset) {
        Ok(n) => n,
        Err(code) => return ret(code),
    };
    if fd == 1 || fd == 2 {
        let contract = hex::encode(call.env().contract.address);
        let text = String::from_utf8_lossy(&data);
        if fd == 1 {
            info!(%contract, stream = "stdout", "{}", text.trim_end());
        } else {
            warn!(%contract, stream = "stderr", "{}", text.trim_end());
        }
    }
    write_u32(call, nwritten_ptr, written as u32)?;
    ret(errno::SUCCESS)
}

fn fd_write(call: &mut HostCall<'_, '_>, args: &[HostVal]) -> Result<HostOutcome, VmError> {
    write_from(call, args, None, args[3])
}

fn fd_pwrite(call: &mut HostCall<'_, '_>, args: &[HostVal]) -> Result<HostOutcome, VmError> {
    let offset = args[3].as_i64()? as u64;
    write_from(call, args, Some(offset), args[4])
}

fn fd_readdir(call: &mut HostCall<'_, '_>, args: &[HostVal]) -> Result<HostOutcome, VmError> {
    let fd = u32_arg(args[0])?;
    let buf = u32_arg(args[1])? as usize;
    let buf_len = u32_arg(args[2])? as usize;
    let cookie = args[3].as_i64()? as u64;
    let wasi = &call.state().wasi;
    let dir = match wasi.dir_path(fd) {
        Ok(dir) => dir,
        Err(code) => return ret(code),
    };
    let mut out = Vec::new();
    for (index, (name, filetype, ino)) in wasi.list_dir(&dir).into_iter().enumerate() {
        if (index as u64) < cookie {
            continue;
        }
        let mut entry = vec![0u8; DIRENT_HEADER_SIZE];
        entry[0..8].copy_from_slice(&(index as u64 + 1).to_le_bytes());
        entry[8..16].copy_from_slice(&ino.to_le_bytes());
        entry[16..20].copy_from_slice(&(name.len() as u32).to_le_bytes());
        entry[20] = filetype;
        entry.extend_from_slice(name.as_bytes());
        out.extend(entry);
        if out.len() >= buf_len {
            break;
        }
    }
    out.truncate(buf_len);
    call.mem().write(buf, &out)?;
    write_u32(call, args[4], out.len() as u32)?;
    ret(errno::SUCCESS)
}

fn fd_renumber(call: &mut HostCall<'_, '_>, args: &[HostVal]) -> Result<HostOutcome, VmError> {
    let from = u32_arg(args[0])?;
    let to = u32_arg(args[1])?;
    ret_result(call.state_mut().wasi.renumber(from, to))
}

fn fd_seek(call: &mut HostCall<'_, '_>, args: &[HostVal]) -> Result<HostOutcome, VmError> {
    let fd = u32_arg(args[0])?;
    let delta = args[1].as_i64()?;
    let whence = args[2].as_i32()?;
    match call.state_mut().wasi.seek(fd, delta, whence) {
        Ok(pos) => {
            write_u64(call, args[3], pos)?;
            ret(errno::SUCCESS)
        }
        Err(code) => ret(code),
    }
}

fn fd_tell(call: &mut HostCall<'_, '_>, args: &[HostVal]) -> Result<HostOutcome, VmError> {
    let fd = u32_arg(args[0])?;
    match call.state_mut().wasi.seek(fd, 0, WHENCE_CUR) {
        Ok(pos) => {
            write_u64(call, args[1], pos)?;
            ret(errno::SUCCESS)
        }
        Err(code) => ret(code),
    }
}

// ─── Paths ──────────────────────────────────────────────────────────────────

fn resolve_arg(
    call: &mut HostCall<'_, '_>,
    fd: HostVal,
    ptr: HostVal,
    len: HostVal,
) -> Result<Result<String, Errno>, VmError> {
    let rel = read_path(call, ptr, len)?;
    Ok(call.state().wasi.resolve(u32_arg(fd)?, &rel))
}

fn path_create_directory(
    call: &mut HostCall<'_, '_>,
    args: &[HostVal],
) -> Result<HostOutcome, VmError> {
    match resolve_arg(call, args[0], args[1], args[2])? {
        Ok(path) => ret_result(call.state_mut().wasi.create_dir(path)),
        Err(code) => ret(code),
    }
}

fn path_filestat_get(
    call: &mut HostCall<'_, '_>,
    args: &[HostVal],
) -> Result<HostOutcome, VmError> {
    let path = match resolve_arg(call, args[0], args[2], args[3])? {
        Ok(path) => path,
        Err(code) => return ret(code),
    };
    let (filetype, size, ino) = match call.state().wasi.stat_path(&path) {
        Ok(stat) => stat,
        Err(code) => return ret(code),
    };
    let time = call.env().block.timestamp_ns;
    let out = filestat_bytes(filetype, size, ino, time);
    call.mem().write(u32_arg(args[4])? as usize, &out)?;
    ret(errno::SUCCESS)
}

fn path_noop(call: &mut HostCall<'_, '_>, args: &[HostVal]) -> Result<HostOutcome, VmError> {
    let path = match resolve_arg(call, args[0], args[2], args[3])? {
        Ok(path) => path,
        Err(code) => return ret(code),
    };
    ret_result(call.state().wasi.stat_path(&path).map(|_| ()))
}

fn path_open(call: &mut HostCall<'_, '_>, args: &[HostVal]) -> Result<HostOutcome, VmError> {
    let dir_fd = u32_arg(args[0])?;
    let rel = read_path(call, args[2], args[3])?;
    let oflags = u32_arg(args[4])?;
    let fdflags = u32_arg(args[7])?;
    match call.state_mut().wasi.open(dir_fd, &rel, oflags, fdflags) {
        Ok(fd) => {
            debug!(path = %rel, fd, "wasi open");
            write_u32(call, args[8], fd)?;
            ret(errno::SUCCESS)
        }
        Err(code) => ret(code),
    }
}

fn path_remove_directory(
    call: &mut HostCall<'_, '_>,
    args: &[HostVal],
) -> Result<HostOutcome, VmError> {
    match resolve_arg(call, args[0], args[1], args[2])? {
        Ok(path) => ret_result(call.state_mut().wasi.remove_dir(&path)),
        Err(code) => ret(code),
    }
}

fn path_rename(call: &mut HostCall<'_, '_>, args: &[HostVal]) -> Result<HostOutcome, VmError> {
    let from = match resolve_arg(call, args[0], args[1], args[2])? {
        Ok(path) => path,
        Err(code) => return ret(code),
    };
    let to = match resolve_arg(call, args[3], args[4], args[5])? {
        Ok(path) => path,
        Err(code) => return ret(code),
    };
    ret_result(call.state_mut().wasi.rename(&from, to))
}

fn path_unlink_file(
    call: &mut HostCall<'_, '_>,
    args: &[HostVal],
) -> Result<HostOutcome, VmError> {
    match resolve_arg(call, args[0], args[1], args[2])? {
        Ok(path) => ret_result(call.state_mut().wasi.unlink(&path)),
        Err(code) => ret(code),
    }
}

// ─── Process, Scheduling, Randomness ────────────────────────────────────────

/// Every subscription fires at once: clocks read block time, so waiting
/// cannot advance them.
fn poll_oneoff(call: &mut HostCall<'_, '_>, args: &[HostVal]) -> Result<HostOutcome, VmError> {
    let input = u32_arg(args[0])? as usize;
    let output = u32_arg(args[1])? as usize;
    let count = u32_arg(args[2])? as usize;
    if count == 0 {
        return ret(errno::INVAL);
    }
    let subscriptions = call.mem().read(input, count * SUBSCRIPTION_SIZE)?;
    for (i, sub) in subscriptions.chunks_exact(SUBSCRIPTION_SIZE).enumerate() {
        let mut event = vec![0u8; EVENT_SIZE];
        event[0..8].copy_from_slice(&sub[0..8]);
        event[10] = sub[8];
        call.mem().write(output + i * EVENT_SIZE, &event)?;
    }
    write_u32(call, args[3], count as u32)?;
    ret(errno::SUCCESS)
}

/// Exit code 0 finishes the invocation; anything else reverts.
fn proc_exit(call: &mut HostCall<'_, '_>, args: &[HostVal]) -> Result<HostOutcome, VmError> {
    let code = args[0].as_i32()?;
    let finish_data = call.state().effects.finish_data.clone();
    debug!(code, "wasi proc_exit");
    if code == 0 {
        return Ok(HostOutcome::Finish(finish_data));
    }
    let data = if finish_data.is_empty() {
        format!("exit code {code}").into_bytes()
    } else {
        finish_data
    };
    call.state_mut().effects.finish_data = data.clone();
    Ok(HostOutcome::Revert(data))
}

fn sched_yield(_call: &mut HostCall<'_, '_>, _args: &[HostVal]) -> Result<HostOutcome, VmError> {
    ret(errno::SUCCESS)
}

fn random_get(call: &mut HostCall<'_, '_>, args: &[HostVal]) -> Result<HostOutcome, VmError> {
    let ptr = u32_arg(args[0])? as usize;
    let len = u32_arg(args[1])? as usize;
    let env = call.env();
    let seed = sha256_multi(&[
        env.block.hash.as_slice(),
        &env.block.height.to_be_bytes(),
        env.contract.address.as_slice(),
    ]);
    let bytes = call.state_mut().wasi.random_bytes(&seed, len);
    call.mem().write(ptr, &bytes)?;
    ret(errno::SUCCESS)
}

fn unsupported(_call: &mut HostCall<'_, '_>, _args: &[HostVal]) -> Result<HostOutcome, VmError> {
    ret(errno::NOSYS)
}
