use crate::error::TpmError;

/// Big-endian marshaling buffer with a read cursor
#[derive(Debug, Default, Clone)]
pub struct TpmBuffer {
    buffer: Vec<u8>,
    position: usize,
}

impl TpmBuffer {
    pub fn new() -> Self {
        TpmBuffer {
            buffer: Vec::new(),
            position: 0,
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Self {
        TpmBuffer {
            buffer: bytes.to_vec(),
            position: 0,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }

    /// Bytes not yet consumed by the read cursor
    pub fn remaining(&self) -> usize {
        self.buffer.len() - self.position
    }

    pub fn write_u8(&mut self, value: u8) {
        self.buffer.push(value);
    }

    pub fn write_u16(&mut self, value: u16) {
        self.buffer.extend_from_slice(&value.to_be_bytes());
    }

    pub fn write_u32(&mut self, value: u32) {
        self.buffer.extend_from_slice(&value.to_be_bytes());
    }

    pub fn write_u64(&mut self, value: u64) {
        self.buffer.extend_from_slice(&value.to_be_bytes());
    }

    /// Raw bytes, no size prefix
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    fn take(&mut self, len: usize) -> Result<&[u8], TpmError> {
        if len > self.remaining() {
            return Err(TpmError::BufferUnderflow);
        }
        let start = self.position;
        self.position += len;
        Ok(&self.buffer[start..self.position])
    }

    pub fn read_u8(&mut self) -> Result<u8, TpmError> {
        Ok(self.take(1)?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16, TpmError> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    pub fn read_u32(&mut self) -> Result<u32, TpmError> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn read_u64(&mut self) -> Result<u64, TpmError> {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(self.take(8)?);
        Ok(u64::from_be_bytes(raw))
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<Vec<u8>, TpmError> {
        Ok(self.take(len)?.to_vec())
    }

    pub fn reset(&mut self) {
        self.position = 0;
    }
}
