mod local_reader;
mod range_reader;

pub use local_reader::{HandlePool, LocalFileReader};
pub use range_reader::{
    read_u16_be, read_u16_le, read_u32_be, read_u32_le, read_u64_be, read_u64_le, RangeReader,
};
