pub mod stage0_normalize;
pub mod stage1_chunk;
pub mod stage2_infer;
pub mod stage3_merge;

pub use stage0_normalize::*;
pub use stage1_chunk::*;
pub use stage2_infer::*;
pub use stage3_merge::*;
