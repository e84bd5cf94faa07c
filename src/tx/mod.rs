//! Transaction construction and submission: gas pricing, nonce allocation,
//! batch packing and the signing pipeline

pub mod gas;
pub mod nonce;
pub mod packer;
pub mod sender;

pub use gas::{GasModel, GasSchedule};
pub use nonce::{NonceAllocator, NonceBook};
pub use packer::{Apportionment, BatchPacker, LimitsConfig, PackRequest, PackingLimits, ValueRule};
pub use sender::{sign_with, TransactionPipeline};
