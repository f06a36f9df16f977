//! Length-prefixed message framing for the post-handshake peer wire
//! protocol (spec §4.D).
use super::{PeerError, PeerResult};
use byteorder::{BigEndian, ByteOrder};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Message type IDs used by the core. Any other type received from a peer
/// is a protocol error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Choke,
    Unchoke,
    Interested,
    Have,
    Bitfield,
    Request,
    Piece,
    Cancel,
}

impl MessageType {
    fn from_id(id: u8) -> PeerResult<Self> {
        match id {
            0 => Ok(MessageType::Choke),
            1 => Ok(MessageType::Unchoke),
            2 => Ok(MessageType::Interested),
            4 => Ok(MessageType::Have),
            5 => Ok(MessageType::Bitfield),
            6 => Ok(MessageType::Request),
            7 => Ok(MessageType::Piece),
            8 => Ok(MessageType::Cancel),
            other => Err(PeerError::UnknownMessageType(other)),
        }
    }

    fn id(self) -> u8 {
        match self {
            MessageType::Choke => 0,
            MessageType::Unchoke => 1,
            MessageType::Interested => 2,
            MessageType::Have => 4,
            MessageType::Bitfield => 5,
            MessageType::Request => 6,
            MessageType::Piece => 7,
            MessageType::Cancel => 8,
        }
    }
}

/// A decoded post-handshake message. `KeepAlive` corresponds to a
/// zero-length frame and carries no type byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    KeepAlive,
    Choke,
    Unchoke,
    Interested,
    Have { index: u32 },
    Bitfield(Vec<u8>),
    Request { index: u32, begin: u32, length: u32 },
    Piece { index: u32, begin: u32, block: Vec<u8> },
    Cancel { index: u32, begin: u32, length: u32 },
}

impl Message {
    /// Serializes this message into a length-prefixed frame.
    pub fn encode(&self) -> Vec<u8> {
        let (msg_type, payload): (Option<MessageType>, Vec<u8>) = match self {
            Message::KeepAlive => (None, Vec::new()),
            Message::Choke => (Some(MessageType::Choke), Vec::new()),
            Message::Unchoke => (Some(MessageType::Unchoke), Vec::new()),
            Message::Interested => (Some(MessageType::Interested), Vec::new()),
            Message::Have { index } => {
                let mut p = vec![0u8; 4];
                BigEndian::write_u32(&mut p, *index);
                (Some(MessageType::Have), p)
            }
            Message::Bitfield(bits) => (Some(MessageType::Bitfield), bits.clone()),
            Message::Request { index, begin, length } => {
                let mut p = vec![0u8; 12];
                BigEndian::write_u32(&mut p[0..4], *index);
                BigEndian::write_u32(&mut p[4..8], *begin);
                BigEndian::write_u32(&mut p[8..12], *length);
                (Some(MessageType::Request), p)
            }
            Message::Piece { index, begin, block } => {
                let mut p = vec![0u8; 8 + block.len()];
                BigEndian::write_u32(&mut p[0..4], *index);
                BigEndian::write_u32(&mut p[4..8], *begin);
                p[8..].copy_from_slice(block);
                (Some(MessageType::Piece), p)
            }
            Message::Cancel { index, begin, length } => {
                let mut p = vec![0u8; 12];
                BigEndian::write_u32(&mut p[0..4], *index);
                BigEndian::write_u32(&mut p[4..8], *begin);
                BigEndian::write_u32(&mut p[8..12], *length);
                (Some(MessageType::Cancel), p)
            }
        };

        match msg_type {
            None => {
                let mut frame = vec![0u8; 4];
                BigEndian::write_u32(&mut frame, 0);
                frame
            }
            Some(t) => {
                let len = 1 + payload.len();
                let mut frame = Vec::with_capacity(4 + len);
                let mut len_buf = [0u8; 4];
                BigEndian::write_u32(&mut len_buf, len as u32);
                frame.extend_from_slice(&len_buf);
                frame.push(t.id());
                frame.extend_from_slice(&payload);
                frame
            }
        }
    }

    /// Writes this message's frame to `writer`.
    pub async fn write<W: AsyncWrite + Unpin>(&self, writer: &mut W) -> PeerResult<()> {
        writer.write_all(&self.encode()).await?;
        Ok(())
    }

    /// Reads one frame from `reader`. `L == 0` is a keep-alive (no type
    /// byte); every length prefix and payload is read with a read-fully
    /// primitive so a short read never silently truncates a message.
    pub async fn read<R: AsyncRead + Unpin>(reader: &mut R) -> PeerResult<Message> {
        let mut len_buf = [0u8; 4];
        reader.read_exact(&mut len_buf).await?;
        let len = BigEndian::read_u32(&len_buf) as usize;

        if len == 0 {
            return Ok(Message::KeepAlive);
        }

        let mut body = vec![0u8; len];
        reader.read_exact(&mut body).await?;

        let id = body[0];
        let payload = &body[1..];
        let msg_type = MessageType::from_id(id)?;

        match msg_type {
            MessageType::Choke => Ok(Message::Choke),
            MessageType::Unchoke => Ok(Message::Unchoke),
            MessageType::Interested => Ok(Message::Interested),
            MessageType::Have => {
                if payload.len() != 4 {
                    return Err(PeerError::FrameTruncated { expected: 4, got: payload.len() });
                }
                Ok(Message::Have { index: BigEndian::read_u32(payload) })
            }
            MessageType::Bitfield => Ok(Message::Bitfield(payload.to_vec())),
            MessageType::Request => {
                if payload.len() != 12 {
                    return Err(PeerError::FrameTruncated { expected: 12, got: payload.len() });
                }
                Ok(Message::Request {
                    index: BigEndian::read_u32(&payload[0..4]),
                    begin: BigEndian::read_u32(&payload[4..8]),
                    length: BigEndian::read_u32(&payload[8..12]),
                })
            }
            MessageType::Piece => {
                if payload.len() < 8 {
                    return Err(PeerError::FrameTruncated { expected: 8, got: payload.len() });
                }
                Ok(Message::Piece {
                    index: BigEndian::read_u32(&payload[0..4]),
                    begin: BigEndian::read_u32(&payload[4..8]),
                    block: payload[8..].to_vec(),
                })
            }
            MessageType::Cancel => {
                if payload.len() != 12 {
                    return Err(PeerError::FrameTruncated { expected: 12, got: payload.len() });
                }
                Ok(Message::Cancel {
                    index: BigEndian::read_u32(&payload[0..4]),
                    begin: BigEndian::read_u32(&payload[4..8]),
                    length: BigEndian::read_u32(&payload[8..12]),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trips_interested() {
        let mut buf = Vec::new();
        Message::Interested.write(&mut buf).await.unwrap();

        let mut cursor = std::io::Cursor::new(buf);
        let decoded = Message::read(&mut cursor).await.unwrap();
        assert_eq!(decoded, Message::Interested);
    }

    #[tokio::test]
    async fn round_trips_request() {
        let msg = Message::Request { index: 3, begin: 16384, length: 16384 };
        let mut buf = Vec::new();
        msg.write(&mut buf).await.unwrap();

        let mut cursor = std::io::Cursor::new(buf);
        let decoded = Message::read(&mut cursor).await.unwrap();
        assert_eq!(decoded, msg);
    }

    #[tokio::test]
    async fn keep_alive_is_a_zero_length_frame() {
        let mut buf = Vec::new();
        Message::KeepAlive.write(&mut buf).await.unwrap();
        assert_eq!(buf, vec![0, 0, 0, 0]);

        let mut cursor = std::io::Cursor::new(buf);
        let decoded = Message::read(&mut cursor).await.unwrap();
        assert_eq!(decoded, Message::KeepAlive);
    }

    #[tokio::test]
    async fn unknown_type_is_an_error() {
        let mut buf = vec![0, 0, 0, 1];
        buf.push(42);
        let mut cursor = std::io::Cursor::new(buf);
        assert!(matches!(
            Message::read(&mut cursor).await,
            Err(PeerError::UnknownMessageType(42))
        ));
    }

    #[tokio::test]
    async fn round_trips_piece_with_payload() {
        let msg = Message::Piece { index: 1, begin: 0, block: vec![1, 2, 3, 4] };
        let mut buf = Vec::new();
        msg.write(&mut buf).await.unwrap();

        let mut cursor = std::io::Cursor::new(buf);
        let decoded = Message::read(&mut cursor).await.unwrap();
        assert_eq!(decoded, msg);
    }
}
