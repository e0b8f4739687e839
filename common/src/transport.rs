//! The FTP transport capability consumed by the engine
//!
//! Opening connections, logging in and driving the control channel are the transport's job.
//! The engine only asks it for raw listing lines, data channels and a few single-shot
//! commands. Every call owns its own request and carries the [`RequestOptions`] it has to be
//! made with, so implementations are free to open a fresh connection per call or to pool them.

use std::future::Future;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

use crate::config::{Endpoint, TransferBehavior, TransferMode};
use crate::error::Error;

/// Buffer used when copying a file body over a data channel.
pub const COPY_BUFFER_SIZE: usize = 8192;

/// Where and how a single request is made: the resolved server and login, the data
/// representation (`TYPE I` or `TYPE A`) and who opens the data connection (`PASV` or `PORT`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestOptions {
    pub endpoint: Endpoint,
    pub transfer_mode: TransferMode,
    pub transfer_behavior: TransferBehavior,
}

pub type ReadChannel = Box<dyn AsyncRead + Send + Unpin>;

/// Writable data channel of an upload. Dropping it without calling
/// [`finalize`](UploadChannel::finalize) aborts the transfer.
#[async_trait::async_trait]
pub trait UploadChannel: AsyncWrite + Send + Unpin {
    /// Close the data channel and wait for the server to confirm the transfer.
    async fn finalize(self: Box<Self>) -> Result<(), Error>;
}

#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// Raw `LIST` output for `path`, one entry per line.
    async fn list_directory(
        &self,
        path: &str,
        options: &RequestOptions,
    ) -> Result<Vec<String>, Error>;
    async fn open_upload(
        &self,
        path: &str,
        options: &RequestOptions,
    ) -> Result<Box<dyn UploadChannel>, Error>;
    async fn open_download(
        &self,
        path: &str,
        options: &RequestOptions,
    ) -> Result<ReadChannel, Error>;
    async fn make_directory(&self, path: &str, options: &RequestOptions) -> Result<(), Error>;
    /// `RMD` when `is_directory` is set, `DELE` otherwise.
    async fn delete(
        &self,
        path: &str,
        is_directory: bool,
        options: &RequestOptions,
    ) -> Result<(), Error>;
}

/// Run one transport request, giving up on it as soon as `cancel` fires.
///
/// The request future is dropped on cancellation, which is how a transport learns that the
/// command it has in flight is abandoned.
pub async fn abortable<T, F>(cancel: &CancellationToken, request: F) -> Result<T, Error>
where
    F: Future<Output = Result<T, Error>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Error::OperationCanceled),
        res = request => res,
    }
}

/// Copy `reader` into `writer`, reporting the cumulative byte count after every chunk.
///
/// Cancellation is checked around every read and write; on cancellation the copy stops
/// immediately and the caller is expected to drop both channels.
pub async fn copy_with_progress<R, W, F>(
    reader: &mut R,
    writer: &mut W,
    cancel: &CancellationToken,
    path: &str,
    mut on_progress: F,
) -> Result<u64, Error>
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
    F: FnMut(u64),
{
    let mut buffer = vec![0u8; COPY_BUFFER_SIZE];
    let mut copied: u64 = 0;
    loop {
        let read = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::OperationCanceled),
            read = reader.read(&mut buffer) => read.map_err(|err| Error::io(path, err))?,
        };
        if read == 0 {
            break;
        }
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::OperationCanceled),
            written = writer.write_all(&buffer[..read]) => written.map_err(|err| Error::io(path, err))?,
        }
        copied += read as u64;
        on_progress(copied);
    }
    writer.flush().await.map_err(|err| Error::io(path, err))?;
    Ok(copied)
}
