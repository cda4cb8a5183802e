//! Streaming database dump and restore.
//!
//! # Container format
//!
//! ```text
//! \xFF "EDGEDB\0" "DUMP\0"        magic, 13 bytes
//! u64  version (currently 1)
//! u32  header length, header bytes
//! repeated until EOF:
//!   u32 record length, 20-byte SHA-1 of the block payload, payload
//! ```
//!
//! Header and block payloads are the server's `DumpHeader`/`DumpBlock`
//! message payloads, carried opaquely; restore verifies each block's
//! checksum before replaying it.

use sha1::{Digest, Sha1};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Error, Result};
use crate::proto::messages::{
    encode_dump, encode_restore, encode_restore_block, encode_restore_eof,
};
use crate::proto::{Cardinality, ServerMessage};

use super::connection::Connection;
use super::pool::Pool;
use super::query::QueryRequest;

const MAGIC: &[u8] = b"\xFFEDGEDB\0DUMP\0";
const VERSION: u64 = 1;
const SHA1_LEN: usize = 20;

/// Query deciding whether restore may proceed: anything user-created
/// makes the target non-empty.
const EMPTINESS_CHECK: &str = "\
    select count((select schema::Module filter not .builtin)) \
    + count((select schema::Object filter .name like 'default::%'))";

impl Connection {
    /// Stream a full dump of the database into `out`.
    pub async fn dump<W>(&self, out: &mut W) -> Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        let _command = self.command_lock.lock().await;

        let mut sub = self.duplex.subscribe();
        let mark = self.duplex.ready_mark();
        self.mark_pipeline_start();
        self.duplex
            .send(&[encode_dump(), crate::proto::messages::encode_sync()])
            .await?;

        out.write_all(MAGIC).await?;
        out.write_all(&VERSION.to_be_bytes()).await?;

        let mut header_seen = false;
        loop {
            let msg = sub.recv().await.ok_or_else(|| {
                Error::ConnectionLost("connection lost during dump".into())
            })?;
            match msg {
                ServerMessage::DumpHeader { raw } => {
                    if header_seen {
                        return Err(Error::Protocol("second DumpHeader in one dump".into()));
                    }
                    header_seen = true;
                    out.write_all(&(raw.len() as u32).to_be_bytes()).await?;
                    out.write_all(&raw).await?;
                }
                ServerMessage::DumpBlock { raw } => {
                    if !header_seen {
                        return Err(Error::Protocol("DumpBlock before DumpHeader".into()));
                    }
                    let digest = Sha1::digest(&raw);
                    let record_len = SHA1_LEN + raw.len();
                    out.write_all(&(record_len as u32).to_be_bytes()).await?;
                    out.write_all(&digest).await?;
                    out.write_all(&raw).await?;
                }
                ServerMessage::CommandComplete { .. } => break,
                ServerMessage::ErrorResponse(err) => {
                    if self.duplex.wait_ready(mark).await.is_ok() {
                        self.mark_pipeline_clean();
                    }
                    return Err(err.into());
                }
                _ => {}
            }
        }
        drop(sub);

        self.duplex.wait_ready(mark).await?;
        self.mark_pipeline_clean();
        if !header_seen {
            return Err(Error::Protocol("dump completed without a header".into()));
        }
        out.flush().await?;
        Ok(())
    }

    /// Replay a dump produced by [`Connection::dump`] into an empty
    /// database.
    pub async fn restore<R>(&self, input: &mut R) -> Result<()>
    where
        R: AsyncRead + Unpin,
    {
        // Precondition outside the command lock: it is an ordinary
        // query.
        let populated: i64 = {
            let request =
                QueryRequest::new(EMPTINESS_CHECK).cardinality(Cardinality::One);
            let value = self.query_required_single(&request).await?;
            crate::codec::FromValue::from_value(value)?
        };
        if populated != 0 {
            return Err(Error::DatabaseNotEmpty);
        }

        let mut magic = [0u8; MAGIC.len()];
        input.read_exact(&mut magic).await?;
        if magic != *MAGIC {
            return Err(Error::Protocol("input is not a dump container".into()));
        }
        let mut version = [0u8; 8];
        input.read_exact(&mut version).await?;
        let version = u64::from_be_bytes(version);
        if version != VERSION {
            return Err(Error::Protocol(format!(
                "unsupported dump container version: {version}"
            )));
        }

        let header = read_record(input)
            .await?
            .ok_or_else(|| Error::Protocol("dump container has no header".into()))?;

        let _command = self.command_lock.lock().await;
        let mark = self.duplex.ready_mark();
        self.mark_pipeline_start();

        let ready = self
            .duplex
            .duplex_and_sync(&[encode_restore(&header)], |m| {
                matches!(m, ServerMessage::RestoreReady { .. })
            })
            .await?;
        debug_assert!(matches!(ready, ServerMessage::RestoreReady { .. }));

        while let Some(record) = read_record(input).await? {
            if record.len() < SHA1_LEN {
                return Err(Error::Protocol("dump block record too short".into()));
            }
            let (checksum, payload) = record.split_at(SHA1_LEN);
            let digest = Sha1::digest(payload);
            if digest.as_slice() != checksum {
                return Err(Error::Protocol("dump block checksum mismatch".into()));
            }
            self.duplex.send(&[encode_restore_block(payload)]).await?;
        }

        let done = self
            .duplex
            .duplex_and_sync(&[encode_restore_eof()], |m| {
                matches!(m, ServerMessage::CommandComplete { .. })
            })
            .await;
        // Two Syncs went out (after Restore, after RestoreEOF), so two
        // ReadyForCommand replies must come back before the connection
        // is in a known state again.
        let ready = self.duplex.wait_ready(mark + 1).await;
        if ready.is_ok() {
            self.mark_pipeline_clean();
        }
        done?;
        ready?;
        Ok(())
    }
}

impl Pool {
    /// Dump the database on a pooled connection.
    pub async fn dump<W>(&self, out: &mut W) -> Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        let conn = self.acquire().await?;
        conn.dump(out).await
    }

    /// Restore a dump on a pooled connection.
    pub async fn restore<R>(&self, input: &mut R) -> Result<()>
    where
        R: AsyncRead + Unpin,
    {
        let conn = self.acquire().await?;
        conn.restore(input).await
    }
}

/// One u32-length-prefixed record; `None` on clean EOF at a record
/// boundary.
async fn read_record<R>(input: &mut R) -> Result<Option<Vec<u8>>>
where
    R: AsyncRead + Unpin,
{
    let mut len = [0u8; 4];
    match input.read_exact(&mut len).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    let len = u32::from_be_bytes(len) as usize;
    let mut record = vec![0u8; len];
    input.read_exact(&mut record).await?;
    Ok(Some(record))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Build a container in memory the way dump() writes one.
    async fn build_container(header: &[u8], blocks: &[&[u8]]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(MAGIC);
        out.extend_from_slice(&VERSION.to_be_bytes());
        out.extend_from_slice(&(header.len() as u32).to_be_bytes());
        out.extend_from_slice(header);
        for block in blocks {
            let digest = Sha1::digest(block);
            out.extend_from_slice(&((SHA1_LEN + block.len()) as u32).to_be_bytes());
            out.extend_from_slice(&digest);
            out.extend_from_slice(block);
        }
        out
    }

    #[tokio::test]
    async fn container_records_round_trip() {
        let container = build_container(b"schema", &[b"block one", b"block two"]).await;
        let mut cursor = std::io::Cursor::new(container);

        let mut magic = [0u8; MAGIC.len()];
        cursor.read_exact(&mut magic).await.unwrap();
        assert_eq!(&magic, MAGIC);
        let mut version = [0u8; 8];
        cursor.read_exact(&mut version).await.unwrap();
        assert_eq!(u64::from_be_bytes(version), VERSION);

        let header = read_record(&mut cursor).await.unwrap().unwrap();
        assert_eq!(header, b"schema");

        let first = read_record(&mut cursor).await.unwrap().unwrap();
        let (checksum, payload) = first.split_at(SHA1_LEN);
        assert_eq!(payload, b"block one");
        assert_eq!(Sha1::digest(payload).as_slice(), checksum);

        let second = read_record(&mut cursor).await.unwrap().unwrap();
        assert_eq!(&second[SHA1_LEN..], b"block two");

        assert!(read_record(&mut cursor).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn truncated_record_is_an_error() {
        let mut container = build_container(b"h", &[b"block"]).await;
        container.truncate(container.len() - 2);
        let mut cursor = std::io::Cursor::new(container);

        let mut skip = [0u8; MAGIC.len() + 8];
        cursor.read_exact(&mut skip).await.unwrap();
        read_record(&mut cursor).await.unwrap().unwrap(); // header
        assert!(read_record(&mut cursor).await.is_err());
    }
}
