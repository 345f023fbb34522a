// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Non-blocking reads and writes on the PTY master.

use std::io;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd, RawFd};

use nix::errno::Errno;
use nix::fcntl::{fcntl, FcntlArg, OFlag};
use tokio::io::unix::AsyncFd;

/// PTY master fd, registered with the reactor through `AsyncFd`.
#[derive(Debug)]
pub struct MasterFd(pub OwnedFd);

impl AsRawFd for MasterFd {
    fn as_raw_fd(&self) -> RawFd {
        self.0.as_raw_fd()
    }
}

impl AsFd for MasterFd {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.0.as_fd()
    }
}

pub fn set_nonblocking(fd: &impl AsFd) -> io::Result<()> {
    let flags = OFlag::from_bits_truncate(fcntl(fd, FcntlArg::F_GETFL).map_err(io_err)?);
    fcntl(fd, FcntlArg::F_SETFL(flags | OFlag::O_NONBLOCK)).map_err(io_err)?;
    Ok(())
}

/// Wait for readability and read one chunk. `Ok(0)` is end of stream.
pub async fn read_chunk(afd: &AsyncFd<MasterFd>, buf: &mut [u8]) -> io::Result<usize> {
    loop {
        let mut guard = afd.readable().await?;
        if let Ok(result) =
            guard.try_io(|inner| nix::unistd::read(inner, buf).map_err(io_err))
        {
            return result;
        }
    }
}

/// Write every byte of `data`, waiting for writability as needed.
pub async fn write_all(afd: &AsyncFd<MasterFd>, mut data: &[u8]) -> io::Result<()> {
    while !data.is_empty() {
        let mut guard = afd.writable().await?;
        match guard.try_io(|inner| nix::unistd::write(inner, data).map_err(io_err)) {
            Ok(Ok(n)) => data = &data[n..],
            Ok(Err(e)) => return Err(e),
            Err(_would_block) => {}
        }
    }
    Ok(())
}

/// Whether an I/O error means the terminal's other side has gone away.
pub fn is_hangup(e: &io::Error) -> bool {
    e.raw_os_error() == Some(Errno::EIO as i32)
}

fn io_err(e: Errno) -> io::Error {
    io::Error::from_raw_os_error(e as i32)
}
