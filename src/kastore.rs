//! Reading and writing of the key/array binary store
//! that `.trees` files are built on.
//!
//! Layout: a 64 byte header, one 64 byte descriptor per item,
//! the packed (sorted) keys, then the arrays. Each array
//! starts on an 8 byte boundary. Everything is little-endian.

use std::collections::BTreeMap;
use std::path::Path;

use crate::error::{Error, Result};

pub const MAGIC: &[u8; 8] = b"\x89KAS\r\n\x1a\n";
pub const VERSION_MAJOR: u16 = 1;
pub const VERSION_MINOR: u16 = 0;
const HEADER_SIZE: usize = 64;
const DESCRIPTOR_SIZE: usize = 64;
const ARRAY_ALIGN: usize = 8;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ItemType {
    Int8,
    UInt8,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Int64,
    UInt64,
    Float32,
    Float64,
}

impl ItemType {
    pub fn code(self) -> u8 {
        match self {
            ItemType::Int8 => 0,
            ItemType::UInt8 => 1,
            ItemType::Int16 => 2,
            ItemType::UInt16 => 3,
            ItemType::Int32 => 4,
            ItemType::UInt32 => 5,
            ItemType::Int64 => 6,
            ItemType::UInt64 => 7,
            ItemType::Float32 => 8,
            ItemType::Float64 => 9,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        let t = match code {
            0 => ItemType::Int8,
            1 => ItemType::UInt8,
            2 => ItemType::Int16,
            3 => ItemType::UInt16,
            4 => ItemType::Int32,
            5 => ItemType::UInt32,
            6 => ItemType::Int64,
            7 => ItemType::UInt64,
            8 => ItemType::Float32,
            9 => ItemType::Float64,
            _ => return None,
        };
        Some(t)
    }

    /// Bytes per element
    pub fn size(self) -> usize {
        match self {
            ItemType::Int8 | ItemType::UInt8 => 1,
            ItemType::Int16 | ItemType::UInt16 => 2,
            ItemType::Int32 | ItemType::UInt32 | ItemType::Float32 => 4,
            ItemType::Int64 | ItemType::UInt64 | ItemType::Float64 => 8,
        }
    }
}

/// One array, kept as its raw little-endian bytes.
#[derive(Clone, Debug, PartialEq)]
pub struct Item {
    item_type: ItemType,
    data: Vec<u8>,
}

impl Item {
    pub fn item_type(&self) -> ItemType {
        self.item_type
    }

    pub fn len(&self) -> usize {
        self.data.len() / self.item_type.size()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

fn align(offset: usize) -> usize {
    offset.div_ceil(ARRAY_ALIGN) * ARRAY_ALIGN
}

fn read_u16(bytes: &[u8], offset: usize) -> u16 {
    let mut b = [0_u8; 2];
    b.copy_from_slice(&bytes[offset..offset + 2]);
    u16::from_le_bytes(b)
}

fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    let mut b = [0_u8; 4];
    b.copy_from_slice(&bytes[offset..offset + 4]);
    u32::from_le_bytes(b)
}

fn read_u64(bytes: &[u8], offset: usize) -> u64 {
    let mut b = [0_u8; 8];
    b.copy_from_slice(&bytes[offset..offset + 8]);
    u64::from_le_bytes(b)
}

// Range [start, start + len) as usize, if it fits inside `limit`.
fn checked_range(start: u64, len: u64, limit: usize) -> Option<std::ops::Range<usize>> {
    let start = usize::try_from(start).ok()?;
    let len = usize::try_from(len).ok()?;
    let stop = start.checked_add(len)?;
    if stop <= limit {
        Some(start..stop)
    } else {
        None
    }
}

macro_rules! typed_array {
    ($put:ident, $get:ident, $t:ty, $variant:ident) => {
        pub fn $put(&mut self, key: &str, values: &[$t]) {
            let mut data = Vec::with_capacity(std::mem::size_of_val(values));
            for v in values {
                data.extend_from_slice(&v.to_le_bytes());
            }
            self.insert(
                key,
                Item {
                    item_type: ItemType::$variant,
                    data,
                },
            );
        }

        pub fn $get(&self, key: &str) -> Result<Vec<$t>> {
            let item = self.require(key, &[ItemType::$variant])?;
            Ok(item
                .data
                .chunks_exact(std::mem::size_of::<$t>())
                .map(|c| {
                    let mut bytes = [0_u8; std::mem::size_of::<$t>()];
                    bytes.copy_from_slice(c);
                    <$t>::from_le_bytes(bytes)
                })
                .collect())
        }
    };
}

/// An in-memory key/array store.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Store {
    items: BTreeMap<String, Item>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.items.contains_key(key)
    }

    pub fn get(&self, key: &str) -> Option<&Item> {
        self.items.get(key)
    }

    pub fn insert(&mut self, key: &str, item: Item) {
        self.items.insert(key.to_string(), item);
    }

    pub fn remove(&mut self, key: &str) -> Option<Item> {
        self.items.remove(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Item)> {
        self.items.iter().map(|(k, v)| (k.as_str(), v))
    }

    fn require(&self, key: &str, allowed: &[ItemType]) -> Result<&Item> {
        let item = self
            .items
            .get(key)
            .ok_or_else(|| Error::kastore(format!("missing required key {key:?}")))?;
        if !allowed.contains(&item.item_type) {
            return Err(Error::kastore(format!(
                "key {key:?} has type {:?}, expected one of {allowed:?}",
                item.item_type
            )));
        }
        Ok(item)
    }

    typed_array!(put_i8, get_i8, i8, Int8);
    typed_array!(put_u8, get_u8, u8, UInt8);
    typed_array!(put_i32, get_i32, i32, Int32);
    typed_array!(put_u32, get_u32, u32, UInt32);
    typed_array!(put_i64, get_i64, i64, Int64);
    typed_array!(put_u64, get_u64, u64, UInt64);
    typed_array!(put_f64, get_f64, f64, Float64);

    /// Byte/character arrays are written as either signed or
    /// unsigned 8 bit depending on the producer.
    pub fn get_bytes(&self, key: &str) -> Result<Vec<u8>> {
        let item = self.require(key, &[ItemType::UInt8, ItemType::Int8])?;
        Ok(item.data.clone())
    }

    /// Ragged-column offsets, stored as 32 or 64 bit unsigned.
    pub fn get_offsets(&self, key: &str) -> Result<Vec<u64>> {
        let item = self.require(key, &[ItemType::UInt32, ItemType::UInt64])?;
        match item.item_type {
            ItemType::UInt32 => Ok(self.get_u32(key)?.into_iter().map(u64::from).collect()),
            _ => self.get_u64(key),
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(Error::kastore("file is shorter than the header"));
        }
        if &bytes[0..8] != MAGIC {
            return Err(Error::kastore("bad magic number"));
        }
        let major = read_u16(bytes, 8);
        if major != VERSION_MAJOR {
            return Err(Error::kastore(format!(
                "unsupported major version {major}"
            )));
        }
        let num_items = read_u32(bytes, 12) as usize;
        let file_size = read_u64(bytes, 16);
        if file_size != bytes.len() as u64 {
            return Err(Error::kastore(format!(
                "header says {file_size} bytes but file has {}",
                bytes.len()
            )));
        }
        let descriptors_end = num_items
            .checked_mul(DESCRIPTOR_SIZE)
            .and_then(|n| n.checked_add(HEADER_SIZE))
            .filter(|n| *n <= bytes.len())
            .ok_or_else(|| Error::kastore("item descriptors run past the end of the file"))?;

        let mut items = BTreeMap::new();
        for offset in (HEADER_SIZE..descriptors_end).step_by(DESCRIPTOR_SIZE) {
            let code = bytes[offset];
            let item_type = ItemType::from_code(code)
                .ok_or_else(|| Error::kastore(format!("unknown item type {code}")))?;
            let key_start = read_u64(bytes, offset + 8);
            let key_len = read_u64(bytes, offset + 16);
            let array_start = read_u64(bytes, offset + 24);
            let array_len = read_u64(bytes, offset + 32);

            let key_range = checked_range(key_start, key_len, bytes.len())
                .ok_or_else(|| Error::kastore("key runs past the end of the file"))?;
            let key = String::from_utf8(bytes[key_range].to_vec())
                .map_err(|_| Error::kastore("key is not valid utf-8"))?;
            let array_range = array_len
                .checked_mul(item_type.size() as u64)
                .and_then(|n| checked_range(array_start, n, bytes.len()))
                .ok_or_else(|| {
                    Error::kastore(format!("array for {key:?} runs past the end of the file"))
                })?;
            let data = bytes[array_range].to_vec();
            if items.insert(key.clone(), Item { item_type, data }).is_some() {
                return Err(Error::kastore(format!("duplicate key {key:?}")));
            }
        }
        Ok(Self { items })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let num_items = self.items.len();
        let keys_start = HEADER_SIZE + num_items * DESCRIPTOR_SIZE;
        let keys_len: usize = self.items.keys().map(|k| k.len()).sum();

        // (key_start, array_start) for each item, in key order
        let mut layout = Vec::with_capacity(num_items);
        let mut key_cursor = keys_start;
        let mut array_cursor = align(keys_start + keys_len);
        let mut file_size = keys_start + keys_len;
        for (key, item) in &self.items {
            layout.push((key_cursor, array_cursor));
            key_cursor += key.len();
            file_size = array_cursor + item.data.len();
            array_cursor = align(file_size);
        }

        let mut out = vec![0_u8; file_size];
        out[0..8].copy_from_slice(MAGIC);
        out[8..10].copy_from_slice(&VERSION_MAJOR.to_le_bytes());
        out[10..12].copy_from_slice(&VERSION_MINOR.to_le_bytes());
        out[12..16].copy_from_slice(&(num_items as u32).to_le_bytes());
        out[16..24].copy_from_slice(&(file_size as u64).to_le_bytes());

        for (i, ((key, item), (key_start, array_start))) in
            self.items.iter().zip(layout.iter()).enumerate()
        {
            let d = HEADER_SIZE + i * DESCRIPTOR_SIZE;
            out[d] = item.item_type.code();
            out[d + 8..d + 16].copy_from_slice(&(*key_start as u64).to_le_bytes());
            out[d + 16..d + 24].copy_from_slice(&(key.len() as u64).to_le_bytes());
            out[d + 24..d + 32].copy_from_slice(&(*array_start as u64).to_le_bytes());
            out[d + 32..d + 40].copy_from_slice(&(item.len() as u64).to_le_bytes());
            out[*key_start..*key_start + key.len()].copy_from_slice(key.as_bytes());
            out[*array_start..*array_start + item.data.len()].copy_from_slice(&item.data);
        }
        out
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        Self::from_bytes(&bytes)
    }

    pub fn dump<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        std::fs::write(path, self.to_bytes())?;
        Ok(())
    }
}
