//! Wire-format primitives (component H) and the bounds-checked input stream
//! built on top of them (component G). The fast-path dispatcher
//! (`crate::fastdecode`) reads directly off a raw cursor instead of going
//! through [`eps_copy::EpsCopyInputStream`]; everything else in the
//! mini-table decoder goes through this module.

pub mod eps_copy;
pub mod reader;

pub use eps_copy::{EpsCopyInputStream, LimitDelta, SLOP_SIZE};
pub use reader::{
    make_tag, read_fixed32, read_fixed64, read_size, read_tag, read_varint, split_tag,
    write_varint, zigzag_decode_32, zigzag_decode_64, zigzag_encode_32, zigzag_encode_64, WireType,
};
