/**
 * @file
 * @brief Frame codec for the coordination protocol. Every message is a
 * 16 byte header followed by a length-prefixed body; the body starts
 * with a presence mask and carries only the fields the mask names, in
 * ascending bit order.
 */
use std::io::{Cursor, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use zerocopy::byteorder::{LE, U16, U32};
use zerocopy::{AsBytes, FromBytes, FromZeroes};

use crate::constants::{MAX_BODY_SIZE, WIRE_MAGIC, WIRE_VERSION};
use crate::errors::{ExceptionKind, FederationError};
use crate::federation_time::{LogicalTime, Lookahead};
use crate::message::{FederateHandle, FederationHandle, Message, MessageKind};

////////////////  Type definitions

/**
 * Fixed-size frame prefix. All multi-byte fields are little-endian and
 * byte-aligned so the struct maps directly onto the wire bytes.
 */
#[derive(FromZeroes, FromBytes, AsBytes, Clone, Copy, Debug)]
#[repr(C)]
pub struct FrameHeader {
    magic: U16<LE>,
    version: u8,
    kind: u8,
    federation: U32<LE>,
    federate: U32<LE>,
    body_len: U32<LE>,
}

impl FrameHeader {
    pub const SIZE: usize = std::mem::size_of::<FrameHeader>();
}

// Body fields follow the mask in ascending bit order. The two boolean
// flags live in the mask itself and occupy no body bytes.
const FLAG_DATE: u16 = 1 << 0;
const FLAG_LOOKAHEAD: u16 = 1 << 1;
const FLAG_GALT: u16 = 1 << 2;
const FLAG_LITS: u16 = 1 << 3;
const FLAG_STRICT: u16 = 1 << 4;
const FLAG_ON: u16 = 1 << 5;
const FLAG_COUNT: u16 = 1 << 6;
const FLAG_LABEL: u16 = 1 << 7;
const FLAG_TAG: u16 = 1 << 8;
const FLAG_NAME: u16 = 1 << 9;
const FLAG_MODEL_PATH: u16 = 1 << 10;
const FLAG_TARGETS: u16 = 1 << 11;
const FLAG_EXCEPTION: u16 = 1 << 12;

const FLAG_KNOWN: u16 = FLAG_DATE
    | FLAG_LOOKAHEAD
    | FLAG_GALT
    | FLAG_LITS
    | FLAG_STRICT
    | FLAG_ON
    | FLAG_COUNT
    | FLAG_LABEL
    | FLAG_TAG
    | FLAG_NAME
    | FLAG_MODEL_PATH
    | FLAG_TARGETS
    | FLAG_EXCEPTION;

////////////////  Functions

/// Encode one message onto the writer and flush it.
pub fn write_message<W: Write>(writer: &mut W, msg: &Message) -> Result<(), FederationError> {
    let mut mask: u16 = 0;
    if msg.date().is_some() {
        mask |= FLAG_DATE;
    }
    if msg.lookahead().is_some() {
        mask |= FLAG_LOOKAHEAD;
    }
    if msg.galt().is_some() {
        mask |= FLAG_GALT;
    }
    if msg.lits().is_some() {
        mask |= FLAG_LITS;
    }
    if msg.is_strict() {
        mask |= FLAG_STRICT;
    }
    if msg.on() {
        mask |= FLAG_ON;
    }
    if msg.count() != 0 {
        mask |= FLAG_COUNT;
    }
    if !msg.label().is_empty() {
        mask |= FLAG_LABEL;
    }
    if !msg.tag().is_empty() {
        mask |= FLAG_TAG;
    }
    if !msg.name().is_empty() {
        mask |= FLAG_NAME;
    }
    if !msg.model_path().is_empty() {
        mask |= FLAG_MODEL_PATH;
    }
    if !msg.targets().is_empty() {
        mask |= FLAG_TARGETS;
    }
    if msg.exception().is_some() {
        mask |= FLAG_EXCEPTION;
    }

    let mut body: Vec<u8> = Vec::new();
    body.write_u16::<LittleEndian>(mask)?;
    if let Some(date) = msg.date() {
        body.write_f64::<LittleEndian>(date.value())?;
    }
    if let Some(lookahead) = msg.lookahead() {
        body.write_f64::<LittleEndian>(lookahead.value())?;
    }
    if let Some(galt) = msg.galt() {
        body.write_f64::<LittleEndian>(galt.value())?;
    }
    if let Some(lits) = msg.lits() {
        body.write_f64::<LittleEndian>(lits.value())?;
    }
    if msg.count() != 0 {
        body.write_u32::<LittleEndian>(msg.count())?;
    }
    if !msg.label().is_empty() {
        write_string(&mut body, msg.label())?;
    }
    if !msg.tag().is_empty() {
        write_string(&mut body, msg.tag())?;
    }
    if !msg.name().is_empty() {
        write_string(&mut body, msg.name())?;
    }
    if !msg.model_path().is_empty() {
        write_string(&mut body, msg.model_path())?;
    }
    if !msg.targets().is_empty() {
        if msg.targets().len() > u16::MAX as usize {
            return Err(FederationError::Protocol(format!(
                "{} targets exceed the frame limit",
                msg.targets().len()
            )));
        }
        body.write_u16::<LittleEndian>(msg.targets().len() as u16)?;
        for target in msg.targets() {
            body.write_u32::<LittleEndian>(target.to_raw())?;
        }
    }
    if let Some(exception) = msg.exception() {
        body.write_u8(exception.to_byte())?;
        write_string(&mut body, msg.reason())?;
    }

    if body.len() > MAX_BODY_SIZE as usize {
        return Err(FederationError::Protocol(format!(
            "encoded body of {} bytes exceeds the frame limit",
            body.len()
        )));
    }

    let header = FrameHeader {
        magic: U16::new(WIRE_MAGIC),
        version: WIRE_VERSION,
        kind: msg.kind().to_byte(),
        federation: U32::new(msg.federation().to_raw()),
        federate: U32::new(msg.federate().to_raw()),
        body_len: U32::new(body.len() as u32),
    };
    writer.write_all(header.as_bytes())?;
    writer.write_all(&body)?;
    writer.flush()?;
    Ok(())
}

/**
 * Decode one message from the reader. Any malformed frame is a
 * `Protocol` error; callers treat that as fatal for the connection.
 */
pub fn read_message<R: Read>(reader: &mut R) -> Result<Message, FederationError> {
    let mut head = [0u8; FrameHeader::SIZE];
    reader.read_exact(&mut head)?;
    let header = FrameHeader::read_from(head.as_slice())
        .ok_or_else(|| FederationError::Protocol(String::from("short frame header")))?;
    if header.magic.get() != WIRE_MAGIC {
        return Err(FederationError::Protocol(format!(
            "bad frame magic {:#06x}",
            header.magic.get()
        )));
    }
    if header.version != WIRE_VERSION {
        return Err(FederationError::Protocol(format!(
            "unsupported protocol version {}",
            header.version
        )));
    }
    let kind = MessageKind::from_byte(header.kind).ok_or_else(|| {
        FederationError::Protocol(format!("unknown message kind {}", header.kind))
    })?;
    let body_len = header.body_len.get();
    if body_len > MAX_BODY_SIZE {
        return Err(FederationError::Protocol(format!(
            "body of {} bytes exceeds the frame limit",
            body_len
        )));
    }
    let mut body = vec![0u8; body_len as usize];
    reader.read_exact(&mut body)?;

    let mut cursor = Cursor::new(body);
    let mask = cursor.read_u16::<LittleEndian>().map_err(short_body)?;
    if mask & !FLAG_KNOWN != 0 {
        return Err(FederationError::Protocol(format!(
            "unknown field bits {:#06x}",
            mask & !FLAG_KNOWN
        )));
    }

    let mut msg = Message::new(kind);
    msg.set_federation(FederationHandle::from_raw(header.federation.get()));
    msg.set_federate(FederateHandle::from_raw(header.federate.get()));
    if mask & FLAG_DATE != 0 {
        msg.set_date(read_time(&mut cursor)?);
    }
    if mask & FLAG_LOOKAHEAD != 0 {
        let value = cursor.read_f64::<LittleEndian>().map_err(short_body)?;
        if value.is_nan() {
            return Err(FederationError::Protocol(String::from(
                "lookahead field is NaN",
            )));
        }
        msg.set_lookahead(Lookahead::new(value));
    }
    if mask & FLAG_GALT != 0 {
        msg.set_galt(read_time(&mut cursor)?);
    }
    if mask & FLAG_LITS != 0 {
        msg.set_lits(read_time(&mut cursor)?);
    }
    msg.set_strict(mask & FLAG_STRICT != 0);
    msg.set_on(mask & FLAG_ON != 0);
    if mask & FLAG_COUNT != 0 {
        msg.set_count(cursor.read_u32::<LittleEndian>().map_err(short_body)?);
    }
    if mask & FLAG_LABEL != 0 {
        let label = read_string(&mut cursor)?;
        msg.set_label(&label);
    }
    if mask & FLAG_TAG != 0 {
        let tag = read_string(&mut cursor)?;
        msg.set_tag(&tag);
    }
    if mask & FLAG_NAME != 0 {
        let name = read_string(&mut cursor)?;
        msg.set_name(&name);
    }
    if mask & FLAG_MODEL_PATH != 0 {
        let model_path = read_string(&mut cursor)?;
        msg.set_model_path(&model_path);
    }
    if mask & FLAG_TARGETS != 0 {
        let count = cursor.read_u16::<LittleEndian>().map_err(short_body)?;
        let mut targets = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let raw = cursor.read_u32::<LittleEndian>().map_err(short_body)?;
            targets.push(FederateHandle::from_raw(raw));
        }
        msg.set_targets(targets);
    }
    if mask & FLAG_EXCEPTION != 0 {
        let byte = cursor.read_u8().map_err(short_body)?;
        let exception = ExceptionKind::from_byte(byte).ok_or_else(|| {
            FederationError::Protocol(format!("unknown exception kind {}", byte))
        })?;
        msg.set_exception(exception);
        let reason = read_string(&mut cursor)?;
        msg.set_reason(&reason);
    }

    let consumed = cursor.position();
    let body = cursor.into_inner();
    if consumed != body.len() as u64 {
        return Err(FederationError::Protocol(format!(
            "{} trailing bytes after body",
            body.len() as u64 - consumed
        )));
    }
    Ok(msg)
}

fn read_time(cursor: &mut Cursor<Vec<u8>>) -> Result<LogicalTime, FederationError> {
    let value = cursor.read_f64::<LittleEndian>().map_err(short_body)?;
    if value.is_nan() {
        return Err(FederationError::Protocol(String::from("time field is NaN")));
    }
    Ok(LogicalTime::new(value))
}

fn write_string(body: &mut Vec<u8>, text: &str) -> Result<(), FederationError> {
    if text.len() > u16::MAX as usize {
        return Err(FederationError::Protocol(format!(
            "string of {} bytes exceeds the frame limit",
            text.len()
        )));
    }
    body.write_u16::<LittleEndian>(text.len() as u16)?;
    body.extend_from_slice(text.as_bytes());
    Ok(())
}

fn read_string(cursor: &mut Cursor<Vec<u8>>) -> Result<String, FederationError> {
    let len = cursor.read_u16::<LittleEndian>().map_err(short_body)? as usize;
    let mut bytes = vec![0u8; len];
    cursor.read_exact(&mut bytes).map_err(|_| {
        FederationError::Protocol(format!("string of {} bytes overruns the body", len))
    })?;
    String::from_utf8(bytes)
        .map_err(|_| FederationError::Protocol(String::from("string field is not valid utf-8")))
}

// The body is fully buffered before decoding, so a read past its end is
// a malformed frame, not a transport failure.
fn short_body(_: std::io::Error) -> FederationError {
    FederationError::Protocol(String::from("body shorter than its field mask claims"))
}
