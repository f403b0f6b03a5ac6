/**
 * @file
 * @brief On-disk image of a federation used by save and restore. The
 * file is a fixed header followed by the federation name and one entry
 * per member; restore matches entries to live members by name.
 */
use std::io::{Read, Write};
use std::path::PathBuf;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use zerocopy::byteorder::{LE, U16, U32};
use zerocopy::{AsBytes, FromBytes, FromZeroes};

use crate::constants::{SNAPSHOT_EXTENSION, SNAPSHOT_MAGIC, SNAPSHOT_VERSION};
use crate::errors::FederationError;
use crate::message::{FederateHandle, FederationHandle};

////////////////  Type definitions

#[derive(FromZeroes, FromBytes, AsBytes, Clone, Copy, Debug)]
#[repr(C)]
struct SnapshotHeader {
    magic: U32<LE>,
    version: U16<LE>,
    federate_count: U16<LE>,
    federation: U32<LE>,
}

const FLAG_CONSTRAINED: u8 = 1 << 0;
const FLAG_REGULATING: u8 = 1 << 1;

/**
 * Saved image of one member.
 */
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FederateSnapshot {
    pub handle: FederateHandle,
    pub name: String,
    pub constrained: bool,
    pub regulating: bool,
}

/**
 * Saved image of one federation execution.
 */
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FederationSnapshot {
    pub federation: FederationHandle,
    pub name: String,
    pub federates: Vec<FederateSnapshot>,
}

////////////////  Functions

/// Location of the image for one federation and save label.
pub fn snapshot_path(federation_name: &str, label: &str) -> PathBuf {
    PathBuf::from(format!(
        "{}_{}.{}",
        federation_name, label, SNAPSHOT_EXTENSION
    ))
}

pub fn write_snapshot<W: Write>(
    writer: &mut W,
    snapshot: &FederationSnapshot,
) -> Result<(), FederationError> {
    if snapshot.federates.len() > u16::MAX as usize {
        return Err(FederationError::RtiInternal(format!(
            "{} members exceed the snapshot limit",
            snapshot.federates.len()
        )));
    }
    let header = SnapshotHeader {
        magic: U32::new(SNAPSHOT_MAGIC),
        version: U16::new(SNAPSHOT_VERSION),
        federate_count: U16::new(snapshot.federates.len() as u16),
        federation: U32::new(snapshot.federation.to_raw()),
    };
    writer.write_all(header.as_bytes())?;
    write_string(writer, &snapshot.name)?;
    for federate in &snapshot.federates {
        writer.write_u32::<LittleEndian>(federate.handle.to_raw())?;
        let mut flags = 0u8;
        if federate.constrained {
            flags |= FLAG_CONSTRAINED;
        }
        if federate.regulating {
            flags |= FLAG_REGULATING;
        }
        writer.write_u8(flags)?;
        write_string(writer, &federate.name)?;
    }
    writer.flush()?;
    Ok(())
}

/// Any malformed or unreadable image comes back as `CouldNotRestore`.
pub fn read_snapshot<R: Read>(reader: &mut R) -> Result<FederationSnapshot, FederationError> {
    read_snapshot_inner(reader).map_err(|e| FederationError::CouldNotRestore(e.to_string()))
}

fn read_snapshot_inner<R: Read>(reader: &mut R) -> Result<FederationSnapshot, FederationError> {
    let mut head = [0u8; std::mem::size_of::<SnapshotHeader>()];
    reader.read_exact(&mut head)?;
    let header = SnapshotHeader::read_from(head.as_slice())
        .ok_or_else(|| FederationError::Protocol(String::from("short snapshot header")))?;
    if header.magic.get() != SNAPSHOT_MAGIC {
        return Err(FederationError::Protocol(format!(
            "bad snapshot magic {:#010x}",
            header.magic.get()
        )));
    }
    if header.version.get() != SNAPSHOT_VERSION {
        return Err(FederationError::Protocol(format!(
            "unsupported snapshot version {}",
            header.version.get()
        )));
    }
    let name = read_string(reader)?;
    let mut federates = Vec::with_capacity(header.federate_count.get() as usize);
    for _ in 0..header.federate_count.get() {
        let handle = FederateHandle::from_raw(reader.read_u32::<LittleEndian>()?);
        let flags = reader.read_u8()?;
        let federate_name = read_string(reader)?;
        federates.push(FederateSnapshot {
            handle,
            name: federate_name,
            constrained: flags & FLAG_CONSTRAINED != 0,
            regulating: flags & FLAG_REGULATING != 0,
        });
    }
    Ok(FederationSnapshot {
        federation: FederationHandle::from_raw(header.federation.get()),
        name,
        federates,
    })
}

fn write_string<W: Write>(writer: &mut W, text: &str) -> Result<(), FederationError> {
    if text.len() > u16::MAX as usize {
        return Err(FederationError::RtiInternal(format!(
            "string of {} bytes exceeds the snapshot limit",
            text.len()
        )));
    }
    writer.write_u16::<LittleEndian>(text.len() as u16)?;
    writer.write_all(text.as_bytes())?;
    Ok(())
}

fn read_string<R: Read>(reader: &mut R) -> Result<String, FederationError> {
    let len = reader.read_u16::<LittleEndian>()? as usize;
    let mut bytes = vec![0u8; len];
    reader.read_exact(&mut bytes)?;
    String::from_utf8(bytes)
        .map_err(|_| FederationError::Protocol(String::from("snapshot string is not valid utf-8")))
}
