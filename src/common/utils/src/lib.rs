mod digest;
mod queue_key;

pub use digest::{combined_digest, hex_digest};
pub use queue_key::{queue_key, queue_prefix};
