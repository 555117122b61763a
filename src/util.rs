//! Filesystem helpers: recursive copy, tree sizing, and error filtering.

use std::{
    ffi::CStr,
    fs::{create_dir_all, File},
    io::{ErrorKind, Result as IoResult},
    os::fd::{AsFd, OwnedFd},
    path::Path,
};

use anyhow::{bail, Context, Result};
use rustix::{
    fs::{
        fchmod, fstat, mkdirat, openat, readlinkat, statat, symlinkat, unlinkat, AtFlags, Dir,
        FileType, Mode, OFlags, CWD,
    },
    io::{Errno, Result as ErrnoResult},
};

pub(crate) trait ErrnoFilter<T> {
    fn filter_errno(self, ignored: Errno) -> ErrnoResult<Option<T>>;
}

impl<T> ErrnoFilter<T> for ErrnoResult<T> {
    fn filter_errno(self, ignored: Errno) -> ErrnoResult<Option<T>> {
        match self {
            Ok(result) => Ok(Some(result)),
            Err(err) if err == ignored => Ok(None),
            Err(err) => Err(err),
        }
    }
}

/// Same as [`ErrnoFilter`], for `std::io` results: a missing file becomes `Ok(None)`.
pub(crate) trait NotFoundFilter<T> {
    fn filter_not_found(self) -> IoResult<Option<T>>;
}

impl<T> NotFoundFilter<T> for IoResult<T> {
    fn filter_not_found(self) -> IoResult<Option<T>> {
        match self {
            Ok(result) => Ok(Some(result)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err),
        }
    }
}

fn is_dot(name: &CStr) -> bool {
    name == c"." || name == c".."
}

fn permissions(st_mode: u32) -> Mode {
    Mode::from_raw_mode(st_mode & 0o7777)
}

fn open_dir(dirfd: impl AsFd, name: impl rustix::path::Arg) -> ErrnoResult<OwnedFd> {
    openat(
        dirfd,
        name,
        OFlags::RDONLY | OFlags::DIRECTORY | OFlags::CLOEXEC,
        Mode::empty(),
    )
}

/// Copies one regular file, truncating any existing destination and giving it the source's
/// permission bits.  Returns the number of bytes copied.
fn copy_regular(
    src_dirfd: impl AsFd,
    src_name: &CStr,
    dst_dirfd: impl AsFd,
    dst_name: &CStr,
) -> Result<u64> {
    let src = openat(
        src_dirfd,
        src_name,
        OFlags::RDONLY | OFlags::CLOEXEC,
        Mode::empty(),
    )?;
    let mode = permissions(fstat(&src)?.st_mode);
    let dst = openat(
        dst_dirfd,
        dst_name,
        OFlags::CREATE | OFlags::WRONLY | OFlags::TRUNC | OFlags::CLOEXEC,
        mode,
    )?;
    // CREATE is subject to umask and doesn't touch existing files
    fchmod(&dst, mode)?;

    let mut dst = File::from(dst);
    let bytes = std::io::copy(&mut File::from(src), &mut dst)?;
    dst.sync_data()?;
    Ok(bytes)
}

fn copy_symlink(
    src_dirfd: impl AsFd,
    src_name: &CStr,
    dst_dirfd: impl AsFd,
    dst_name: &CStr,
) -> Result<()> {
    let target = readlinkat(src_dirfd, src_name, Vec::new())?;
    match symlinkat(target.as_c_str(), &dst_dirfd, dst_name) {
        Ok(()) => {}
        Err(Errno::EXIST) => {
            unlinkat(&dst_dirfd, dst_name, AtFlags::empty())?;
            symlinkat(target.as_c_str(), &dst_dirfd, dst_name)?;
        }
        Err(e) => Err(e)?,
    }
    Ok(())
}

fn copy_directory_contents(src: &OwnedFd, dst: &OwnedFd) -> Result<u64> {
    let mut bytes = 0;
    for item in Dir::read_from(src).context("Reading source directory")? {
        let entry = item.context("Reading source directory entry")?;
        let name = entry.file_name();
        if is_dot(name) {
            continue;
        }

        let file_type = match entry.file_type() {
            FileType::Unknown => {
                FileType::from_raw_mode(statat(src, name, AtFlags::SYMLINK_NOFOLLOW)?.st_mode)
            }
            other => other,
        };

        match file_type {
            FileType::Directory => {
                match mkdirat(dst, name, Mode::from_raw_mode(0o700)) {
                    Ok(()) | Err(Errno::EXIST) => {}
                    Err(e) => Err(e).with_context(|| format!("Creating directory {name:?}"))?,
                }
                let src_child = open_dir(src, name)?;
                let dst_child = open_dir(dst, name)?;
                bytes += copy_directory_contents(&src_child, &dst_child)
                    .with_context(|| format!("Copying directory {name:?}"))?;
                fchmod(&dst_child, permissions(fstat(&src_child)?.st_mode))?;
            }
            FileType::RegularFile => {
                bytes += copy_regular(src, name, dst, name)
                    .with_context(|| format!("Copying file {name:?}"))?;
            }
            FileType::Symlink => {
                copy_symlink(src, name, dst, name)
                    .with_context(|| format!("Copying symlink {name:?}"))?;
            }
            other => bail!("Unexpected file type {other:?} for {name:?}"),
        }
    }
    Ok(bytes)
}

/// Recursively copies the directory `src` to `dst`, creating `dst` and its parents as needed.
///
/// File contents, permission bits and symlinks are preserved.  Anything already present at the
/// destination is overwritten, so copying the same tree twice is harmless.  Returns the total
/// number of bytes of regular file data copied.
pub fn copy_tree(src: impl AsRef<Path>, dst: impl AsRef<Path>) -> Result<u64> {
    let (src, dst) = (src.as_ref(), dst.as_ref());

    let src_fd = open_dir(CWD, src).with_context(|| format!("Opening {}", src.display()))?;
    create_dir_all(dst).with_context(|| format!("Creating {}", dst.display()))?;
    let dst_fd = open_dir(CWD, dst).with_context(|| format!("Opening {}", dst.display()))?;

    let bytes = copy_directory_contents(&src_fd, &dst_fd)
        .with_context(|| format!("Copying {} to {}", src.display(), dst.display()))?;
    fchmod(&dst_fd, permissions(fstat(&src_fd)?.st_mode))?;
    Ok(bytes)
}

/// Copies a single file to `dst`, preserving its permission bits.
pub fn copy_file(src: impl AsRef<Path>, dst: impl AsRef<Path>) -> Result<u64> {
    let (src, dst) = (src.as_ref(), dst.as_ref());
    let src_c = rustix::path::Arg::into_c_str(src)?;
    let dst_c = rustix::path::Arg::into_c_str(dst)?;
    copy_regular(CWD, &src_c, CWD, &dst_c)
        .with_context(|| format!("Copying {} to {}", src.display(), dst.display()))
}

fn directory_size(fd: &OwnedFd) -> Result<u64> {
    let mut bytes = 0;
    for item in Dir::read_from(fd)? {
        let entry = item?;
        let name = entry.file_name();
        if is_dot(name) {
            continue;
        }
        let stat = statat(fd, name, AtFlags::SYMLINK_NOFOLLOW)?;
        match FileType::from_raw_mode(stat.st_mode) {
            FileType::Directory => bytes += directory_size(&open_dir(fd, name)?)?,
            FileType::RegularFile => bytes += stat.st_size as u64,
            _ => {}
        }
    }
    Ok(bytes)
}

/// Total size of the regular files below `path`, symlinks not followed.
pub fn tree_size(path: impl AsRef<Path>) -> Result<u64> {
    let path = path.as_ref();
    let fd = open_dir(CWD, path).with_context(|| format!("Opening {}", path.display()))?;
    directory_size(&fd).with_context(|| format!("Measuring {}", path.display()))
}
