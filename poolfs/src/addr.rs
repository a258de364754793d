use crate::alloc::BlockNumber;
use crate::geometry::Geometry;

/// A pool-internal address: the block index in the high bits and the byte
/// offset inside that block in the low bits.
pub type Address = usize;

/// Translates between addresses and `(block, offset)` pairs.
///
/// The offset field is `log2(block_size)` bits wide, enough to name every byte
/// of a block. The block field is wide enough to name every block of the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressCodec {
    offset_bits: u32,
    block_bits: u32,
}

impl AddressCodec {
    pub fn new(geometry: &Geometry) -> Self {
        Self {
            offset_bits: geometry.block_size().trailing_zeros(),
            block_bits: geometry.block_count().next_power_of_two().trailing_zeros(),
        }
    }

    pub fn offset_bits(&self) -> u32 {
        self.offset_bits
    }

    pub fn block_bits(&self) -> u32 {
        self.block_bits
    }

    pub fn encode(&self, block: BlockNumber, offset: usize) -> Address {
        (block << self.offset_bits) | (offset & self.offset_mask())
    }

    pub fn decode(&self, addr: Address) -> (BlockNumber, usize) {
        (addr >> self.offset_bits, addr & self.offset_mask())
    }

    fn offset_mask(&self) -> usize {
        (1_usize << self.offset_bits) - 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn widths_follow_pool_geometry() {
        let codec = AddressCodec::new(&Geometry::default());
        assert_eq!(codec.offset_bits(), 6);
        assert_eq!(codec.block_bits(), 4);
    }

    #[test]
    fn whole_block_addresses_have_zero_offset() {
        let codec = AddressCodec::new(&Geometry::default());
        assert_eq!(codec.encode(0, 0), 0);
        assert_eq!(codec.encode(3, 0), 192);
        assert_eq!(codec.decode(192), (3, 0));
    }

    #[test]
    fn decode_splits_offset_from_block() {
        let codec = AddressCodec::new(&Geometry::default());
        assert_eq!(codec.decode(15 * 64 + 63), (15, 63));
        assert_eq!(codec.encode(15, 63), 15 * 64 + 63);
    }
}
