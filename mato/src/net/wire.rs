//! Inter-node wire protocol (spec §6) — framing and (de)serialization for
//! the eight message kinds a node-to-node TCP connection carries.
//!
//! Grounded directly in `original_source/mato/mato_net.h`'s packet-format
//! doc comments for each `net_send_*` function. Every message starts with a
//! 4-byte little-endian `i32` type tag (`MSG_*`); integer fields are
//! little-endian `i32`; byte strings are length-prefixed (`i32` length then
//! raw bytes); the two name/type strings in `MSG_NEW_MODULE_INSTANCE` are
//! C strings, so their length field counts the trailing NUL.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Read, Write};
use tokio::io::{AsyncRead, AsyncReadExt};

use mato_common::Error;

const MSG_NEW_MODULE_INSTANCE: i32 = 1;
const MSG_DELETED_MODULE_INSTANCE: i32 = 2;
const MSG_SUBSCRIBE: i32 = 3;
const MSG_UNSUBSCRIBE: i32 = 4;
const MSG_GET_DATA: i32 = 5;
const MSG_DATA: i32 = 6;
const MSG_SUBSCRIBED_DATA: i32 = 7;
const MSG_GLOBAL_MESSAGE: i32 = 8;

/// One parsed inter-node protocol frame. Module/channel/node ids here are
/// always the sender's *local* id for the field named `module_id` — the
/// receiver must combine it with the sending node's id (known from the
/// connection) to get a global id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Frame {
    NewModuleInstance {
        local_module_id: u32,
        name: String,
        type_name: String,
        number_of_channels: u32,
    },
    DeletedModuleInstance {
        local_module_id: u32,
    },
    Subscribe {
        local_module_id: u32,
        channel: u32,
    },
    Unsubscribe {
        local_module_id: u32,
        channel: u32,
    },
    GetData {
        local_module_id: u32,
        channel: u32,
        get_data_id: u32,
    },
    Data {
        get_data_id: u32,
        data: Vec<u8>,
    },
    SubscribedData {
        local_module_id: u32,
        channel: u32,
        data: Vec<u8>,
    },
    GlobalMessage {
        sending_global_module_id: u32,
        /// `MATO_BROADCAST` for `send_global_message`, or a specific
        /// receiving module's global id for `send_message`.
        receiver_global_module_id: u32,
        message_id: i32,
        data: Vec<u8>,
    },
}

/// A zero-terminated C string field: `length = strlen + 1`, bytes include
/// the trailing NUL.
fn write_cstr_field<W: Write>(w: &mut W, s: &str) -> io::Result<()> {
    let len = s.len() as i32 + 1;
    w.write_i32::<LittleEndian>(len)?;
    w.write_all(s.as_bytes())?;
    w.write_u8(0)?;
    Ok(())
}

fn read_cstr_field<R: Read>(r: &mut R) -> mato_common::Result<String> {
    let len = r.read_i32::<LittleEndian>()?;
    if len < 1 {
        return Err(Error::Protocol(format!("invalid string field length {len}")));
    }
    let mut buf = vec![0u8; len as usize];
    r.read_exact(&mut buf)?;
    // Drop the trailing NUL the length field counted.
    buf.pop();
    String::from_utf8(buf).map_err(|e| Error::Protocol(format!("non-utf8 string field: {e}")))
}

fn write_bytes_field<W: Write>(w: &mut W, data: &[u8]) -> io::Result<()> {
    w.write_i32::<LittleEndian>(data.len() as i32)?;
    w.write_all(data)?;
    Ok(())
}

fn read_bytes_field<R: Read>(r: &mut R) -> mato_common::Result<Vec<u8>> {
    let len = r.read_i32::<LittleEndian>()?;
    if len < 0 {
        return Err(Error::Protocol(format!("negative data length {len}")));
    }
    let mut buf = vec![0u8; len as usize];
    r.read_exact(&mut buf)?;
    Ok(buf)
}

impl Frame {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        match self {
            Frame::NewModuleInstance {
                local_module_id,
                name,
                type_name,
                number_of_channels,
            } => {
                buf.write_i32::<LittleEndian>(MSG_NEW_MODULE_INSTANCE).unwrap();
                buf.write_i32::<LittleEndian>(*local_module_id as i32).unwrap();
                write_cstr_field(&mut buf, name).unwrap();
                write_cstr_field(&mut buf, type_name).unwrap();
                buf.write_i32::<LittleEndian>(*number_of_channels as i32).unwrap();
            }
            Frame::DeletedModuleInstance { local_module_id } => {
                buf.write_i32::<LittleEndian>(MSG_DELETED_MODULE_INSTANCE).unwrap();
                buf.write_i32::<LittleEndian>(*local_module_id as i32).unwrap();
            }
            Frame::Subscribe {
                local_module_id,
                channel,
            } => {
                buf.write_i32::<LittleEndian>(MSG_SUBSCRIBE).unwrap();
                buf.write_i32::<LittleEndian>(*local_module_id as i32).unwrap();
                buf.write_i32::<LittleEndian>(*channel as i32).unwrap();
            }
            Frame::Unsubscribe {
                local_module_id,
                channel,
            } => {
                buf.write_i32::<LittleEndian>(MSG_UNSUBSCRIBE).unwrap();
                buf.write_i32::<LittleEndian>(*local_module_id as i32).unwrap();
                buf.write_i32::<LittleEndian>(*channel as i32).unwrap();
            }
            Frame::GetData {
                local_module_id,
                channel,
                get_data_id,
            } => {
                buf.write_i32::<LittleEndian>(MSG_GET_DATA).unwrap();
                buf.write_i32::<LittleEndian>(*local_module_id as i32).unwrap();
                buf.write_i32::<LittleEndian>(*channel as i32).unwrap();
                buf.write_i32::<LittleEndian>(*get_data_id as i32).unwrap();
            }
            Frame::Data { get_data_id, data } => {
                buf.write_i32::<LittleEndian>(MSG_DATA).unwrap();
                buf.write_i32::<LittleEndian>(*get_data_id as i32).unwrap();
                write_bytes_field(&mut buf, data).unwrap();
            }
            Frame::SubscribedData {
                local_module_id,
                channel,
                data,
            } => {
                buf.write_i32::<LittleEndian>(MSG_SUBSCRIBED_DATA).unwrap();
                buf.write_i32::<LittleEndian>(*local_module_id as i32).unwrap();
                buf.write_i32::<LittleEndian>(*channel as i32).unwrap();
                write_bytes_field(&mut buf, data).unwrap();
            }
            Frame::GlobalMessage {
                sending_global_module_id,
                receiver_global_module_id,
                message_id,
                data,
            } => {
                buf.write_i32::<LittleEndian>(MSG_GLOBAL_MESSAGE).unwrap();
                buf.write_i32::<LittleEndian>(*sending_global_module_id as i32).unwrap();
                buf.write_i32::<LittleEndian>(*receiver_global_module_id as i32).unwrap();
                buf.write_i32::<LittleEndian>(*message_id).unwrap();
                write_bytes_field(&mut buf, data).unwrap();
            }
        }
        buf
    }

    /// Reads exactly one frame from a synchronous reader. Used directly by
    /// tests; [`Frame::decode_async`] is the version the connection reader
    /// tasks actually drive.
    pub fn decode<R: Read>(r: &mut R) -> mato_common::Result<Frame> {
        let tag = r.read_i32::<LittleEndian>()?;
        match tag {
            MSG_NEW_MODULE_INSTANCE => {
                let local_module_id = r.read_i32::<LittleEndian>()? as u32;
                let name = read_cstr_field(r)?;
                let type_name = read_cstr_field(r)?;
                let number_of_channels = r.read_i32::<LittleEndian>()? as u32;
                Ok(Frame::NewModuleInstance {
                    local_module_id,
                    name,
                    type_name,
                    number_of_channels,
                })
            }
            MSG_DELETED_MODULE_INSTANCE => Ok(Frame::DeletedModuleInstance {
                local_module_id: r.read_i32::<LittleEndian>()? as u32,
            }),
            MSG_SUBSCRIBE => Ok(Frame::Subscribe {
                local_module_id: r.read_i32::<LittleEndian>()? as u32,
                channel: r.read_i32::<LittleEndian>()? as u32,
            }),
            MSG_UNSUBSCRIBE => Ok(Frame::Unsubscribe {
                local_module_id: r.read_i32::<LittleEndian>()? as u32,
                channel: r.read_i32::<LittleEndian>()? as u32,
            }),
            MSG_GET_DATA => Ok(Frame::GetData {
                local_module_id: r.read_i32::<LittleEndian>()? as u32,
                channel: r.read_i32::<LittleEndian>()? as u32,
                get_data_id: r.read_i32::<LittleEndian>()? as u32,
            }),
            MSG_DATA => {
                let get_data_id = r.read_i32::<LittleEndian>()? as u32;
                let data = read_bytes_field(r)?;
                Ok(Frame::Data { get_data_id, data })
            }
            MSG_SUBSCRIBED_DATA => {
                let local_module_id = r.read_i32::<LittleEndian>()? as u32;
                let channel = r.read_i32::<LittleEndian>()? as u32;
                let data = read_bytes_field(r)?;
                Ok(Frame::SubscribedData {
                    local_module_id,
                    channel,
                    data,
                })
            }
            MSG_GLOBAL_MESSAGE => {
                let sending_global_module_id = r.read_i32::<LittleEndian>()? as u32;
                let receiver_global_module_id = r.read_i32::<LittleEndian>()? as u32;
                let message_id = r.read_i32::<LittleEndian>()?;
                let data = read_bytes_field(r)?;
                Ok(Frame::GlobalMessage {
                    sending_global_module_id,
                    receiver_global_module_id,
                    message_id,
                    data,
                })
            }
            other => Err(Error::Protocol(format!("unknown message tag {other}"))),
        }
    }

    /// Async twin of [`Frame::decode`], read directly off a connection's
    /// read half by `net::receiver`'s per-connection task.
    pub async fn decode_async<R: AsyncRead + Unpin>(r: &mut R) -> mato_common::Result<Frame> {
        let tag = r.read_i32_le().await?;
        match tag {
            MSG_NEW_MODULE_INSTANCE => {
                let local_module_id = r.read_i32_le().await? as u32;
                let name = read_cstr_field_async(r).await?;
                let type_name = read_cstr_field_async(r).await?;
                let number_of_channels = r.read_i32_le().await? as u32;
                Ok(Frame::NewModuleInstance {
                    local_module_id,
                    name,
                    type_name,
                    number_of_channels,
                })
            }
            MSG_DELETED_MODULE_INSTANCE => Ok(Frame::DeletedModuleInstance {
                local_module_id: r.read_i32_le().await? as u32,
            }),
            MSG_SUBSCRIBE => Ok(Frame::Subscribe {
                local_module_id: r.read_i32_le().await? as u32,
                channel: r.read_i32_le().await? as u32,
            }),
            MSG_UNSUBSCRIBE => Ok(Frame::Unsubscribe {
                local_module_id: r.read_i32_le().await? as u32,
                channel: r.read_i32_le().await? as u32,
            }),
            MSG_GET_DATA => Ok(Frame::GetData {
                local_module_id: r.read_i32_le().await? as u32,
                channel: r.read_i32_le().await? as u32,
                get_data_id: r.read_i32_le().await? as u32,
            }),
            MSG_DATA => {
                let get_data_id = r.read_i32_le().await? as u32;
                let data = read_bytes_field_async(r).await?;
                Ok(Frame::Data { get_data_id, data })
            }
            MSG_SUBSCRIBED_DATA => {
                let local_module_id = r.read_i32_le().await? as u32;
                let channel = r.read_i32_le().await? as u32;
                let data = read_bytes_field_async(r).await?;
                Ok(Frame::SubscribedData {
                    local_module_id,
                    channel,
                    data,
                })
            }
            MSG_GLOBAL_MESSAGE => {
                let sending_global_module_id = r.read_i32_le().await? as u32;
                let receiver_global_module_id = r.read_i32_le().await? as u32;
                let message_id = r.read_i32_le().await?;
                let data = read_bytes_field_async(r).await?;
                Ok(Frame::GlobalMessage {
                    sending_global_module_id,
                    receiver_global_module_id,
                    message_id,
                    data,
                })
            }
            other => Err(Error::Protocol(format!("unknown message tag {other}"))),
        }
    }
}

async fn read_cstr_field_async<R: AsyncRead + Unpin>(r: &mut R) -> mato_common::Result<String> {
    let len = r.read_i32_le().await?;
    if len < 1 {
        return Err(Error::Protocol(format!("invalid string field length {len}")));
    }
    let mut buf = vec![0u8; len as usize];
    r.read_exact(&mut buf).await?;
    buf.pop();
    String::from_utf8(buf).map_err(|e| Error::Protocol(format!("non-utf8 string field: {e}")))
}

async fn read_bytes_field_async<R: AsyncRead + Unpin>(r: &mut R) -> mato_common::Result<Vec<u8>> {
    let len = r.read_i32_le().await?;
    if len < 0 {
        return Err(Error::Protocol(format!("negative data length {len}")));
    }
    let mut buf = vec![0u8; len as usize];
    r.read_exact(&mut buf).await?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn roundtrip(frame: Frame) {
        let encoded = frame.encode();
        let decoded = Frame::decode(&mut Cursor::new(encoded)).unwrap();
        assert_eq!(frame, decoded);
    }

    #[test]
    fn new_module_instance_roundtrips() {
        roundtrip(Frame::NewModuleInstance {
            local_module_id: 7,
            name: "sensor".into(),
            type_name: "Lidar".into(),
            number_of_channels: 2,
        });
    }

    #[test]
    fn subscribed_data_roundtrips_with_empty_payload() {
        roundtrip(Frame::SubscribedData {
            local_module_id: 3,
            channel: 0,
            data: Vec::new(),
        });
    }

    #[test]
    fn global_message_roundtrips() {
        roundtrip(Frame::GlobalMessage {
            sending_global_module_id: 0,
            receiver_global_module_id: mato_common::MATO_BROADCAST,
            message_id: 42,
            data: vec![1, 2, 3, 4],
        });
    }

    #[test]
    fn unknown_tag_is_protocol_error() {
        let mut buf = Vec::new();
        buf.write_i32::<LittleEndian>(99).unwrap();
        assert!(matches!(
            Frame::decode(&mut Cursor::new(buf)),
            Err(Error::Protocol(_))
        ));
    }
}
