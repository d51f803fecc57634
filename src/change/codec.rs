use super::{
    Change, ChangeScope, ChangeTag, ClusterActivation, CompositeChange, SettingChange,
    SettingOperation,
};
use std::collections::BTreeMap;
use std::io::{self, Read, Write};
use thiserror::Error;

/// Deepest composite nesting the codec encodes or decodes.
pub const MAX_COMPOSITE_DEPTH: usize = 32;

/// Decodes the payload that follows a tag byte. The `usize` is the nesting
/// depth of the change being decoded; the outermost change is at depth 0.
pub type ChangeDecoder =
    fn(&mut &[u8], &ChangeCodec, usize) -> Result<Change, ChangeCodecError>;

/// Tag → decoder registry for the binary change encoding.
///
/// Layout: one tag byte followed by the variant payload. Strings are a
/// little-endian `u32` length plus UTF-8 bytes; composites carry a `u16`
/// count followed by length-prefixed nested encodings.
#[derive(Clone)]
pub struct ChangeCodec {
    decoders: BTreeMap<ChangeTag, (&'static str, ChangeDecoder)>,
}

impl Default for ChangeCodec {
    fn default() -> Self {
        let mut codec = Self::empty();
        codec.register(ChangeTag::SETTING, "setting", decode_setting);
        codec.register(
            ChangeTag::CLUSTER_ACTIVATION,
            "cluster_activation",
            decode_activation,
        );
        codec.register(ChangeTag::COMPOSITE, "composite", decode_composite);
        codec
    }
}

impl std::fmt::Debug for ChangeCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map()
            .entries(self.decoders.iter().map(|(tag, (name, _))| (tag, name)))
            .finish()
    }
}

impl ChangeCodec {
    pub fn empty() -> Self {
        Self {
            decoders: BTreeMap::new(),
        }
    }

    /// Installs (or replaces) the decoder for `tag`.
    pub fn register(&mut self, tag: ChangeTag, name: &'static str, decoder: ChangeDecoder) {
        self.decoders.insert(tag, (name, decoder));
    }

    pub fn registered(&self) -> impl Iterator<Item = (ChangeTag, &'static str)> + '_ {
        self.decoders.iter().map(|(tag, (name, _))| (*tag, *name))
    }

    pub fn encode(&self, change: &Change) -> Result<Vec<u8>, ChangeCodecError> {
        self.encode_at(change, 0)
    }

    fn encode_at(&self, change: &Change, depth: usize) -> Result<Vec<u8>, ChangeCodecError> {
        if depth > MAX_COMPOSITE_DEPTH {
            return Err(ChangeCodecError::TooDeep(MAX_COMPOSITE_DEPTH));
        }
        let mut buf = Vec::new();
        buf.write_all(&[change.tag().0])?;
        match change {
            Change::Setting(setting) => {
                let op = match setting.operation {
                    SettingOperation::Set => 0u8,
                    SettingOperation::Unset => 1u8,
                };
                buf.write_all(&[op])?;
                write_scope(&mut buf, &setting.scope)?;
                write_string(&mut buf, &setting.name)?;
                write_optional_string(&mut buf, &setting.value)?;
            }
            Change::ClusterActivation(activation) => {
                write_string(&mut buf, &activation.cluster_name)?;
            }
            Change::Composite(composite) => {
                let count = u16::try_from(composite.changes.len())
                    .map_err(|_| ChangeCodecError::TooManyChanges(composite.changes.len()))?;
                buf.write_all(&count.to_le_bytes())?;
                for nested in &composite.changes {
                    let bytes = self.encode_at(nested, depth + 1)?;
                    write_bytes(&mut buf, &bytes)?;
                }
            }
        }
        Ok(buf)
    }

    pub fn decode(&self, bytes: &[u8]) -> Result<Change, ChangeCodecError> {
        self.decode_at(bytes, 0)
    }

    fn decode_at(&self, mut bytes: &[u8], depth: usize) -> Result<Change, ChangeCodecError> {
        let change = self.decode_from(&mut bytes, depth)?;
        if !bytes.is_empty() {
            return Err(ChangeCodecError::TrailingBytes(bytes.len()));
        }
        Ok(change)
    }

    fn decode_from(&self, bytes: &mut &[u8], depth: usize) -> Result<Change, ChangeCodecError> {
        if depth > MAX_COMPOSITE_DEPTH {
            return Err(ChangeCodecError::TooDeep(MAX_COMPOSITE_DEPTH));
        }
        let mut tag = [0u8; 1];
        bytes.read_exact(&mut tag)?;
        let tag = ChangeTag(tag[0]);
        let (_, decoder) = self
            .decoders
            .get(&tag)
            .ok_or(ChangeCodecError::UnknownTag(tag))?;
        decoder(bytes, self, depth)
    }
}

fn decode_setting(bytes: &mut &[u8], _: &ChangeCodec, _: usize) -> Result<Change, ChangeCodecError> {
    let mut op = [0u8; 1];
    bytes.read_exact(&mut op)?;
    let operation = match op[0] {
        0 => SettingOperation::Set,
        1 => SettingOperation::Unset,
        other => return Err(ChangeCodecError::InvalidField("setting.operation", other)),
    };
    Ok(Change::Setting(SettingChange {
        operation,
        scope: read_scope(bytes)?,
        name: read_string(bytes)?,
        value: read_optional_string(bytes)?,
    }))
}

fn decode_activation(
    bytes: &mut &[u8],
    _: &ChangeCodec,
    _: usize,
) -> Result<Change, ChangeCodecError> {
    Ok(Change::ClusterActivation(ClusterActivation {
        cluster_name: read_string(bytes)?,
    }))
}

fn decode_composite(
    bytes: &mut &[u8],
    codec: &ChangeCodec,
    depth: usize,
) -> Result<Change, ChangeCodecError> {
    let mut count = [0u8; 2];
    bytes.read_exact(&mut count)?;
    let count = u16::from_le_bytes(count);
    let mut changes = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let nested = read_bytes(bytes)?;
        changes.push(codec.decode_at(nested, depth + 1)?);
    }
    Ok(Change::Composite(CompositeChange { changes }))
}

fn write_scope(writer: &mut Vec<u8>, scope: &ChangeScope) -> Result<(), ChangeCodecError> {
    match scope {
        ChangeScope::Cluster => Ok(writer.write_all(&[0])?),
        ChangeScope::Stripe(name) => {
            writer.write_all(&[1])?;
            write_string(writer, name)
        }
        ChangeScope::Node(name) => {
            writer.write_all(&[2])?;
            write_string(writer, name)
        }
    }
}

fn read_scope(reader: &mut &[u8]) -> Result<ChangeScope, ChangeCodecError> {
    let mut level = [0u8; 1];
    reader.read_exact(&mut level)?;
    match level[0] {
        0 => Ok(ChangeScope::Cluster),
        1 => Ok(ChangeScope::Stripe(read_string(reader)?)),
        2 => Ok(ChangeScope::Node(read_string(reader)?)),
        other => Err(ChangeCodecError::InvalidField("setting.scope", other)),
    }
}

fn length_prefix(len: usize) -> Result<[u8; 4], ChangeCodecError> {
    u32::try_from(len)
        .map(u32::to_le_bytes)
        .map_err(|_| ChangeCodecError::TooLong(len))
}

fn write_bytes(writer: &mut Vec<u8>, bytes: &[u8]) -> Result<(), ChangeCodecError> {
    writer.write_all(&length_prefix(bytes.len())?)?;
    writer.write_all(bytes)?;
    Ok(())
}

fn write_string(writer: &mut Vec<u8>, value: &str) -> Result<(), ChangeCodecError> {
    write_bytes(writer, value.as_bytes())
}

fn write_optional_string(
    writer: &mut Vec<u8>,
    value: &Option<String>,
) -> Result<(), ChangeCodecError> {
    match value {
        Some(v) => {
            writer.write_all(&[1])?;
            write_string(writer, v)?;
        }
        None => writer.write_all(&[0])?,
    }
    Ok(())
}

fn read_bytes<'a>(reader: &mut &'a [u8]) -> Result<&'a [u8], ChangeCodecError> {
    let mut len = [0u8; 4];
    reader.read_exact(&mut len)?;
    let len = u32::from_le_bytes(len) as usize;
    if reader.len() < len {
        return Err(ChangeCodecError::Truncated);
    }
    let (head, tail) = reader.split_at(len);
    *reader = tail;
    Ok(head)
}

fn read_string(reader: &mut &[u8]) -> Result<String, ChangeCodecError> {
    let head = read_bytes(reader)?;
    let value = std::str::from_utf8(head).map_err(|_| ChangeCodecError::InvalidUtf8)?;
    Ok(value.to_string())
}

fn read_optional_string(reader: &mut &[u8]) -> Result<Option<String>, ChangeCodecError> {
    let mut flag = [0u8; 1];
    reader.read_exact(&mut flag)?;
    if flag[0] == 0 {
        return Ok(None);
    }
    Ok(Some(read_string(reader)?))
}

#[derive(Debug, Error)]
pub enum ChangeCodecError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("invalid UTF-8 in change payload")]
    InvalidUtf8,
    #[error("unexpected end of change payload")]
    Truncated,
    #[error("{0} trailing bytes after change payload")]
    TrailingBytes(usize),
    #[error("no decoder registered for change tag {0}")]
    UnknownTag(ChangeTag),
    #[error("invalid value {1} for {0}")]
    InvalidField(&'static str, u8),
    #[error("composite change holds {0} sub-changes, more than the wire format allows")]
    TooManyChanges(usize),
    #[error("field of {0} bytes exceeds the u32 length prefix")]
    TooLong(usize),
    #[error("composite changes nested deeper than {0} levels")]
    TooDeep(usize),
}
