//! TCP client for the sync server.

use mangahub_core::ProgressUpdate;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, ToSocketAddrs};

use super::ClientError;
use crate::protocol::{decode_line, encode_line, ProtocolError};

/// One device's connection to the sync server.
pub struct SyncClient {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    line: Vec<u8>,
}

impl SyncClient {
    pub async fn connect(addr: impl ToSocketAddrs) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        let (read_half, writer) = stream.into_split();
        Ok(Self {
            reader: BufReader::new(read_half),
            writer,
            line: Vec::new(),
        })
    }

    /// Send one update as a JSON line.
    pub async fn send_update(&mut self, update: &ProgressUpdate) -> Result<(), ClientError> {
        let line = encode_line(update)?;
        self.writer.write_all(line.as_bytes()).await?;
        Ok(())
    }

    /// Next broadcast update. Malformed lines are skipped; `None` on EOF.
    pub async fn next_update(&mut self) -> Result<Option<ProgressUpdate>, ClientError> {
        loop {
            self.line.clear();
            if self.reader.read_until(b'\n', &mut self.line).await? == 0 {
                return Ok(None);
            }
            match decode_line(&self.line) {
                Ok(update) => return Ok(Some(update)),
                Err(ProtocolError::EmptyFrame) => continue,
                Err(e) => log::warn!("Skipping malformed sync line: {e}"),
            }
        }
    }

    /// Close the write side; the server sees EOF and unregisters us.
    pub async fn close(mut self) -> Result<(), ClientError> {
        self.writer.shutdown().await?;
        Ok(())
    }
}
