//! Little-endian cursor reader over a borrowed byte slice.
//!
//! Every read either consumes the requested bytes or returns `None` without
//! moving the cursor past the end. Struct reads are bulk copies of `#[repr(C)]`
//! layouts via the `plain` crate; the file format is little-endian only, as is
//! every host this crate targets.

use plain::Plain;

pub struct RecordReader<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> RecordReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0 }
    }

    pub fn size_left(&self) -> usize {
        self.data.len() - self.offset
    }

    pub fn current_offset(&self) -> usize {
        self.offset
    }

    fn take(&mut self, n: usize) -> Option<&'a [u8]> {
        let end = self.offset.checked_add(n)?;
        let bytes = self.data.get(self.offset..end)?;
        self.offset = end;
        Some(bytes)
    }

    pub fn skip(&mut self, n: usize) -> Option<()> {
        self.take(n).map(|_| ())
    }

    pub fn read_bytes(&mut self, n: usize) -> Option<&'a [u8]> {
        self.take(n)
    }

    pub fn read_u8(&mut self) -> Option<u8> {
        self.take(1).map(|b| b[0])
    }

    pub fn read_u16(&mut self) -> Option<u16> {
        self.take(2).map(|b| u16::from_le_bytes(b.try_into().unwrap()))
    }

    pub fn read_u32(&mut self) -> Option<u32> {
        self.take(4).map(|b| u32::from_le_bytes(b.try_into().unwrap()))
    }

    pub fn read_i32(&mut self) -> Option<i32> {
        self.take(4).map(|b| i32::from_le_bytes(b.try_into().unwrap()))
    }

    pub fn read_u64(&mut self) -> Option<u64> {
        self.take(8).map(|b| u64::from_le_bytes(b.try_into().unwrap()))
    }

    /// Reads a u64 if at least 8 bytes remain; otherwise yields `None` and
    /// leaves the cursor alone. Unlike the other reads this is not a failure.
    pub fn read_optional_u64(&mut self) -> Option<u64> {
        if self.size_left() < 8 {
            return None;
        }
        self.read_u64()
    }

    /// Bulk-copies a POD struct from the next `size_of::<T>()` bytes.
    pub fn read_pod<T: Plain + Default>(&mut self) -> Option<T> {
        let bytes = self.take(std::mem::size_of::<T>())?;
        let mut value = T::default();
        plain::copy_from_bytes(&mut value, bytes).ok()?;
        Some(value)
    }

    /// Bulk-copies the first `min(prefix, size_of::<T>())` bytes into a
    /// zeroed `T`. Used where the on-disk struct may be an older, shorter
    /// revision of the in-memory layout.
    pub fn read_pod_prefix<T: Plain + Default>(&mut self, prefix: usize) -> Option<T> {
        let size = std::mem::size_of::<T>();
        let n = prefix.min(size);
        if n == size {
            return self.read_pod();
        }
        let bytes = self.take(n)?;
        let mut padded = vec![0u8; size];
        padded[..n].copy_from_slice(bytes);
        let mut value = T::default();
        plain::copy_from_bytes(&mut value, &padded).ok()?;
        Some(value)
    }

    pub fn read_vector_u64(&mut self, n: usize) -> Option<Vec<u64>> {
        let bytes = self.take(n.checked_mul(8)?)?;
        Some(
            bytes
                .chunks_exact(8)
                .map(|c| u64::from_le_bytes(c.try_into().unwrap()))
                .collect(),
        )
    }

    /// Reads a NUL-terminated string (or everything left, if unterminated),
    /// then advances the cursor to the next 8-byte boundary. Records pad
    /// trailing strings to keep the overall record size 8-byte aligned.
    pub fn read_c_string(&mut self) -> Option<String> {
        let rest = &self.data[self.offset..];
        let (raw, consumed) = match rest.iter().position(|&b| b == 0) {
            Some(pos) => (&rest[..pos], pos + 1),
            None => (rest, rest.len()),
        };
        let value = String::from_utf8_lossy(raw).into_owned();
        self.offset += consumed;
        let misaligned = self.offset % 8;
        if misaligned != 0 {
            let pad = (8 - misaligned).min(self.size_left());
            self.offset += pad;
        }
        Some(value)
    }
}
