use crate::error::IndexError;
use sha2::{Digest, Sha256};
use std::fs;
use std::io::ErrorKind;
use std::path::Path;

/// Position reported for neighbour slots the index could not fill.
pub const NO_MATCH: i64 = -1;

const MAGIC: &[u8; 8] = b"NSFLATL2";
const FORMAT_VERSION: u32 = 1;
const CHECKSUM_LEN: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub distance: f32,
    pub position: i64,
}

impl Neighbor {
    pub fn is_match(&self) -> bool {
        self.position != NO_MATCH
    }
}

/// Append-only store of fixed-dimension vectors answering k-nearest queries.
pub trait VectorIndex {
    fn dimensions(&self) -> usize;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Appends vectors; the first one lands at position `len()`.
    fn add(&mut self, vectors: &[Vec<f32>]) -> Result<(), IndexError>;

    /// Exactly `k` neighbours, nearest first. Slots beyond `len()` carry
    /// [`NO_MATCH`].
    fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>, IndexError>;
}

/// Brute-force index over squared Euclidean distance.
#[derive(Debug, Clone, PartialEq)]
pub struct FlatL2Index {
    dimensions: usize,
    data: Vec<f32>,
}

impl FlatL2Index {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions,
            data: Vec::new(),
        }
    }

    fn vector(&self, position: usize) -> &[f32] {
        let start = position * self.dimensions;
        &self.data[start..start + self.dimensions]
    }

    fn check_dimensions(&self, actual: usize) -> Result<(), IndexError> {
        if actual != self.dimensions {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimensions,
                actual,
            });
        }
        Ok(())
    }
}

impl VectorIndex for FlatL2Index {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn len(&self) -> usize {
        if self.dimensions == 0 {
            0
        } else {
            self.data.len() / self.dimensions
        }
    }

    fn add(&mut self, vectors: &[Vec<f32>]) -> Result<(), IndexError> {
        for vector in vectors {
            self.check_dimensions(vector.len())?;
        }

        self.data.reserve(vectors.len() * self.dimensions);
        for vector in vectors {
            self.data.extend_from_slice(vector);
        }
        Ok(())
    }

    fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>, IndexError> {
        self.check_dimensions(query.len())?;

        let mut scored = (0..self.len())
            .map(|position| Neighbor {
                distance: squared_l2(query, self.vector(position)),
                position: position as i64,
            })
            .collect::<Vec<_>>();

        // Stable: equal distances stay in insertion order.
        scored.sort_by(|left, right| left.distance.total_cmp(&right.distance));
        scored.truncate(k);

        while scored.len() < k {
            scored.push(Neighbor {
                distance: f32::INFINITY,
                position: NO_MATCH,
            });
        }

        Ok(scored)
    }
}

pub fn squared_l2(left: &[f32], right: &[f32]) -> f32 {
    left.iter()
        .zip(right)
        .map(|(a, b)| {
            let delta = a - b;
            delta * delta
        })
        .sum()
}

/// An index read back from disk together with the model that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredIndex {
    pub index: FlatL2Index,
    pub model_id: String,
}

/// Layout (little endian): magic, version u32, dimensions u32, count u64,
/// model id length u32 + bytes, `count * dimensions` f32, SHA-256 of all
/// preceding bytes.
pub fn write_index(index: &FlatL2Index, model_id: &str, path: &Path) -> Result<(), IndexError> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    let dimensions = u32::try_from(index.dimensions)
        .map_err(|_| IndexError::Format(format!("dimension {} too large", index.dimensions)))?;
    let model_len = u32::try_from(model_id.len())
        .map_err(|_| IndexError::Format("model id too long".to_string()))?;

    let mut bytes = Vec::with_capacity(
        MAGIC.len() + 20 + model_id.len() + index.data.len() * 4 + CHECKSUM_LEN,
    );
    bytes.extend_from_slice(MAGIC);
    bytes.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    bytes.extend_from_slice(&dimensions.to_le_bytes());
    bytes.extend_from_slice(&(index.len() as u64).to_le_bytes());
    bytes.extend_from_slice(&model_len.to_le_bytes());
    bytes.extend_from_slice(model_id.as_bytes());
    for value in &index.data {
        bytes.extend_from_slice(&value.to_le_bytes());
    }

    let checksum = Sha256::digest(&bytes);
    bytes.extend_from_slice(&checksum);

    fs::write(path, bytes)?;
    Ok(())
}

pub fn read_index(path: &Path) -> Result<StoredIndex, IndexError> {
    let bytes = fs::read(path).map_err(|error| {
        if error.kind() == ErrorKind::NotFound {
            IndexError::NotFound(path.to_path_buf())
        } else {
            IndexError::Io(error)
        }
    })?;

    if bytes.len() < MAGIC.len() + CHECKSUM_LEN || &bytes[..MAGIC.len()] != MAGIC {
        return Err(IndexError::Format(format!(
            "{} is not a flat L2 index",
            path.display()
        )));
    }

    let (body, checksum) = bytes.split_at(bytes.len() - CHECKSUM_LEN);
    if Sha256::digest(body).as_slice() != checksum {
        return Err(IndexError::Checksum(path.to_path_buf()));
    }

    let mut reader = ByteReader::new(&body[MAGIC.len()..]);
    let version = reader.read_u32()?;
    if version != FORMAT_VERSION {
        return Err(IndexError::Format(format!(
            "unsupported index format version {version}"
        )));
    }

    let dimensions = reader.read_u32()? as usize;
    let count = usize::try_from(reader.read_u64()?)
        .map_err(|_| IndexError::Format("vector count overflows usize".to_string()))?;
    let model_len = reader.read_u32()? as usize;
    let model_id = String::from_utf8(reader.take(model_len)?.to_vec())
        .map_err(|_| IndexError::Format("model id is not utf-8".to_string()))?;

    let value_count = count
        .checked_mul(dimensions)
        .ok_or_else(|| IndexError::Format("vector payload size overflows".to_string()))?;
    let payload = reader.take(value_count.saturating_mul(4))?;
    if !reader.is_empty() {
        return Err(IndexError::Format("trailing bytes after vectors".to_string()));
    }

    let data = payload
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect();

    Ok(StoredIndex {
        index: FlatL2Index { dimensions, data },
        model_id,
    })
}

struct ByteReader<'a> {
    bytes: &'a [u8],
}

impl<'a> ByteReader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], IndexError> {
        if self.bytes.len() < len {
            return Err(IndexError::Format("index file is truncated".to_string()));
        }
        let (head, tail) = self.bytes.split_at(len);
        self.bytes = tail;
        Ok(head)
    }

    fn read_u32(&mut self) -> Result<u32, IndexError> {
        let raw = self.take(4)?;
        Ok(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
    }

    fn read_u64(&mut self) -> Result<u64, IndexError> {
        let raw = self.take(8)?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(raw);
        Ok(u64::from_le_bytes(buf))
    }

    fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}
