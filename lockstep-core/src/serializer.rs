//! Ordered field walk for save states
//!
//! One routine per primitive, switched on [`Direction`]: saving appends the
//! field to the blob, loading overwrites the field from the blob. Components
//! call the same walk for both, so the layout can never diverge between save
//! and load.
//!
//! All integers are little-endian on the wire.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

/// "BST1" read as a little-endian u32
pub const SIGNATURE: u32 = 0x3154_5342;

/// Version tag written into every header
pub const VERSION: &str = "lockstep-1";

pub const VERSION_LEN: usize = 16;
pub const DESCRIPTION_LEN: usize = 512;

/// `[signature:4][size:4][sync:1][version:16][description:512]`
pub const HEADER_LEN: usize = 4 + 4 + 1 + VERSION_LEN + DESCRIPTION_LEN;

/// Snapshot validation errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SnapshotError {
    #[error("snapshot is {len} bytes, shorter than its {} byte header", HEADER_LEN)]
    TooShort { len: usize },

    #[error("bad snapshot signature {found:#010x}")]
    Signature { found: u32 },

    #[error("snapshot version '{found}' does not match '{}'", VERSION)]
    Version { found: String },

    #[error("snapshot records {recorded} bytes but {actual} were supplied")]
    Size { recorded: usize, actual: usize },

    #[error("snapshot holds {found} state bytes, this system expects {expected}")]
    Layout { found: usize, expected: usize },

    #[error("snapshot ended before every field was read")]
    Truncated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Save,
    Load,
}

/// Fixed-width value the serializer knows how to walk
pub trait Primitive: Copy {
    const SIZE: usize;

    fn put(self, out: &mut BytesMut);
    fn take(input: &mut Bytes) -> Self;
}

macro_rules! primitive {
    ($($ty:ty => $put:ident, $get:ident;)*) => {
        $(
            impl Primitive for $ty {
                const SIZE: usize = std::mem::size_of::<$ty>();

                fn put(self, out: &mut BytesMut) {
                    out.$put(self);
                }

                fn take(input: &mut Bytes) -> Self {
                    input.$get()
                }
            }
        )*
    };
}

primitive! {
    u8 => put_u8, get_u8;
    i8 => put_i8, get_i8;
    u16 => put_u16_le, get_u16_le;
    i16 => put_i16_le, get_i16_le;
    u32 => put_u32_le, get_u32_le;
    i32 => put_i32_le, get_i32_le;
    u64 => put_u64_le, get_u64_le;
    i64 => put_i64_le, get_i64_le;
}

/// Anything with persistent state
pub trait Serializable {
    fn serialize(&mut self, s: &mut Serializer);
}

/// Bidirectional field walker
pub struct Serializer {
    direction: Direction,
    output: BytesMut,
    input: Bytes,
    consumed: usize,
    overrun: bool,
}

impl Serializer {
    /// Serializer that records fields
    pub fn saving() -> Self {
        Self {
            direction: Direction::Save,
            output: BytesMut::new(),
            input: Bytes::new(),
            consumed: 0,
            overrun: false,
        }
    }

    /// Serializer that restores fields from `data`
    pub fn loading(data: Bytes) -> Self {
        Self {
            direction: Direction::Load,
            output: BytesMut::new(),
            input: data,
            consumed: 0,
            overrun: false,
        }
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn is_saving(&self) -> bool {
        self.direction == Direction::Save
    }

    pub fn is_loading(&self) -> bool {
        self.direction == Direction::Load
    }

    /// Bytes written (save) or read (load) so far
    pub fn size(&self) -> usize {
        match self.direction {
            Direction::Save => self.output.len(),
            Direction::Load => self.consumed,
        }
    }

    /// Bytes left to read
    pub fn remaining(&self) -> usize {
        self.input.remaining()
    }

    /// Whether a load ran past the end of the data
    pub fn overrun(&self) -> bool {
        self.overrun
    }

    fn reserve(&mut self, len: usize) -> bool {
        if self.input.remaining() < len {
            self.overrun = true;
            return false;
        }
        self.consumed += len;
        true
    }

    pub fn integer<T: Primitive>(&mut self, value: &mut T) {
        match self.direction {
            Direction::Save => value.put(&mut self.output),
            Direction::Load => {
                if self.reserve(T::SIZE) {
                    *value = T::take(&mut self.input);
                }
            }
        }
    }

    pub fn boolean(&mut self, value: &mut bool) {
        let mut byte = u8::from(*value);
        self.integer(&mut byte);
        *value = byte != 0;
    }

    pub fn array<T: Primitive>(&mut self, values: &mut [T]) {
        for value in values {
            self.integer(value);
        }
    }

    pub fn bytes(&mut self, data: &mut [u8]) {
        match self.direction {
            Direction::Save => self.output.put_slice(data),
            Direction::Load => {
                if self.reserve(data.len()) {
                    self.input.copy_to_slice(data);
                }
            }
        }
    }

    pub fn object<S: Serializable + ?Sized>(&mut self, value: &mut S) {
        value.serialize(self);
    }

    /// Finish a save walk
    pub fn into_bytes(self) -> Bytes {
        self.output.freeze()
    }
}

/// Snapshot header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    /// Total blob length, header included
    pub size: usize,
    /// Whether every domain was at its rendezvous when the snapshot was taken
    pub synchronized: bool,
    pub version: String,
    pub description: String,
}

impl Header {
    pub fn new(body_len: usize, synchronized: bool, description: &str) -> Self {
        Self {
            size: HEADER_LEN + body_len,
            synchronized,
            version: VERSION.to_string(),
            description: description.to_string(),
        }
    }

    pub fn write(&self, out: &mut BytesMut) {
        out.put_u32_le(SIGNATURE);
        out.put_u32_le(self.size as u32);
        out.put_u8(u8::from(self.synchronized));
        put_fixed(out, &self.version, VERSION_LEN);
        put_fixed(out, &self.description, DESCRIPTION_LEN);
    }

    /// Parse and check the header of `blob`.
    ///
    /// Verifies signature, version and that the recorded size matches the
    /// blob length.
    pub fn read(blob: &[u8]) -> Result<Self, SnapshotError> {
        if blob.len() < HEADER_LEN {
            return Err(SnapshotError::TooShort { len: blob.len() });
        }

        let mut input = &blob[..HEADER_LEN];
        let signature = input.get_u32_le();
        if signature != SIGNATURE {
            return Err(SnapshotError::Signature { found: signature });
        }
        let size = input.get_u32_le() as usize;
        let synchronized = input.get_u8() != 0;
        let version = take_fixed(&mut input, VERSION_LEN);
        let description = take_fixed(&mut input, DESCRIPTION_LEN);

        if version != VERSION {
            return Err(SnapshotError::Version { found: version });
        }
        if size != blob.len() {
            return Err(SnapshotError::Size {
                recorded: size,
                actual: blob.len(),
            });
        }

        Ok(Self {
            size,
            synchronized,
            version,
            description,
        })
    }
}

/// Zero-padded, truncated to `len` bytes
fn put_fixed(out: &mut BytesMut, text: &str, len: usize) {
    let bytes = text.as_bytes();
    let used = bytes.len().min(len);
    out.put_slice(&bytes[..used]);
    out.put_bytes(0, len - used);
}

fn take_fixed(input: &mut &[u8], len: usize) -> String {
    let slice: &[u8] = *input;
    let (field, rest) = slice.split_at(len);
    *input = rest;
    let end = field.iter().position(|&b| b == 0).unwrap_or(len);
    String::from_utf8_lossy(&field[..end]).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Registers {
        a: u8,
        pc: u16,
        cycles: i64,
        halted: bool,
        ram: [u8; 4],
    }

    impl Serializable for Registers {
        fn serialize(&mut self, s: &mut Serializer) {
            s.integer(&mut self.a);
            s.integer(&mut self.pc);
            s.integer(&mut self.cycles);
            s.boolean(&mut self.halted);
            s.bytes(&mut self.ram);
        }
    }

    #[test]
    fn test_walk_restores_fields() {
        let mut original = Registers {
            a: 0x42,
            pc: 0xC000,
            cycles: -7,
            halted: true,
            ram: [1, 2, 3, 4],
        };
        let mut s = Serializer::saving();
        s.object(&mut original);
        assert_eq!(s.size(), 1 + 2 + 8 + 1 + 4);
        let data = s.into_bytes();

        let mut restored = Registers {
            a: 0,
            pc: 0,
            cycles: 0,
            halted: false,
            ram: [0; 4],
        };
        let mut s = Serializer::loading(data);
        s.object(&mut restored);
        assert!(!s.overrun());
        assert_eq!(s.remaining(), 0);
        assert_eq!(restored.a, 0x42);
        assert_eq!(restored.pc, 0xC000);
        assert_eq!(restored.cycles, -7);
        assert!(restored.halted);
        assert_eq!(restored.ram, [1, 2, 3, 4]);
    }

    #[test]
    fn test_integers_are_little_endian() {
        let mut s = Serializer::saving();
        let mut value = 0x1234_5678u32;
        s.integer(&mut value);
        assert_eq!(&s.into_bytes()[..], &[0x78u8, 0x56, 0x34, 0x12]);
    }

    #[test]
    fn test_overrun_leaves_field_alone() {
        let mut s = Serializer::loading(Bytes::from_static(&[1, 2]));
        let mut value = 99u32;
        s.integer(&mut value);
        assert!(s.overrun());
        assert_eq!(value, 99);
    }

    #[test]
    fn test_header_signature_spells_bst1() {
        let mut out = BytesMut::new();
        Header::new(0, true, "test").write(&mut out);
        assert_eq!(out.len(), HEADER_LEN);
        assert_eq!(&out[..4], b"BST1");
    }

    #[test]
    fn test_header_read_back() {
        let mut out = BytesMut::new();
        Header::new(10, false, "slot 3").write(&mut out);
        out.put_bytes(0xAA, 10);

        let header = Header::read(&out).unwrap();
        assert_eq!(header.size, HEADER_LEN + 10);
        assert!(!header.synchronized);
        assert_eq!(header.version, VERSION);
        assert_eq!(header.description, "slot 3");
    }

    #[test]
    fn test_header_rejects_bad_input() {
        assert_eq!(
            Header::read(&[0; 8]),
            Err(SnapshotError::TooShort { len: 8 })
        );

        let mut out = BytesMut::new();
        Header::new(0, true, "").write(&mut out);
        let mut bad = out.to_vec();
        bad[0] = b'X';
        assert!(matches!(
            Header::read(&bad),
            Err(SnapshotError::Signature { .. })
        ));

        let mut extended = out.to_vec();
        extended.push(0);
        assert_eq!(
            Header::read(&extended),
            Err(SnapshotError::Size {
                recorded: HEADER_LEN,
                actual: HEADER_LEN + 1
            })
        );

        let mut versioned = out.to_vec();
        versioned[9] = b'X';
        assert!(matches!(
            Header::read(&versioned),
            Err(SnapshotError::Version { .. })
        ));
    }

    #[test]
    fn test_long_description_is_truncated() {
        let long = "x".repeat(DESCRIPTION_LEN + 40);
        let mut out = BytesMut::new();
        Header::new(0, true, &long).write(&mut out);
        assert_eq!(out.len(), HEADER_LEN);
        assert_eq!(Header::read(&out).unwrap().description.len(), DESCRIPTION_LEN);
    }
}
