use crate::cache::MessageSignatureCache;
use crate::codec::{CodecResult, PacketReader, PacketWriter};
use crate::crypto::SignatureValidator;

/// Opaque signature over a chat message. Compared by content only.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MessageSignature([u8; MessageSignature::BYTES]);

impl MessageSignature {
    pub const BYTES: usize = 64;

    pub fn from_bytes(bytes: [u8; Self::BYTES]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; Self::BYTES] {
        &self.0
    }

    pub fn verify(&self, validator: &dyn SignatureValidator, payload: &[u8]) -> bool {
        validator.validate(payload, self)
    }

    /// Replaces the signature by its cache slot when the cache holds it.
    pub fn pack(&self, cache: &MessageSignatureCache) -> PackedSignature {
        match cache.pack(self) {
            Some(slot) => PackedSignature::Cached(slot),
            None => PackedSignature::Full(*self),
        }
    }

    pub fn write(&self, writer: &mut PacketWriter) {
        writer.write_bytes(&self.0);
    }

    pub fn read(reader: &mut PacketReader<'_>) -> CodecResult<Self> {
        Ok(Self(reader.read_array()?))
    }
}

/// A signature on the wire: either a cache slot or the raw bytes, never both.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PackedSignature {
    Cached(usize),
    Full(MessageSignature),
}

impl PackedSignature {
    pub fn unpack(&self, cache: &MessageSignatureCache) -> Option<MessageSignature> {
        match self {
            PackedSignature::Cached(slot) => cache.unpack(*slot),
            PackedSignature::Full(signature) => Some(*signature),
        }
    }

    /// Writes `slot + 1`, or `0` followed by the raw signature.
    pub fn write(&self, writer: &mut PacketWriter) {
        match self {
            PackedSignature::Cached(slot) => writer.write_var_int(*slot as u32 + 1),
            PackedSignature::Full(signature) => {
                writer.write_var_int(0);
                signature.write(writer);
            }
        }
    }

    pub fn read(reader: &mut PacketReader<'_>) -> CodecResult<Self> {
        match reader.read_var_int()? {
            0 => Ok(PackedSignature::Full(MessageSignature::read(reader)?)),
            id => Ok(PackedSignature::Cached(id as usize - 1)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_equality_by_content() {
        let a = MessageSignature::from_bytes([1u8; 64]);
        let b = MessageSignature::from_bytes([1u8; 64]);
        let c = MessageSignature::from_bytes([2u8; 64]);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_packed_wire_tags() {
        let mut writer = PacketWriter::new();
        PackedSignature::Cached(4).write(&mut writer);
        assert_eq!(writer.into_bytes(), vec![5]);

        let signature = MessageSignature::from_bytes([9u8; 64]);
        let mut writer = PacketWriter::new();
        PackedSignature::Full(signature).write(&mut writer);
        let bytes = writer.into_bytes();
        assert_eq!(bytes.len(), 1 + MessageSignature::BYTES);
        assert_eq!(bytes[0], 0);

        let mut reader = PacketReader::new(&bytes);
        assert_eq!(
            PackedSignature::read(&mut reader).unwrap(),
            PackedSignature::Full(signature)
        );
        reader.finish().unwrap();
    }

    #[test]
    fn test_pack_falls_back_to_full_bytes() {
        let cache = MessageSignatureCache::new(4);
        let signature = MessageSignature::from_bytes([3u8; 64]);
        assert_eq!(signature.pack(&cache), PackedSignature::Full(signature));
    }
}
