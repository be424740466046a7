//! Device identity
//!
//! Identity is pseudonymous: one random identifier per installation, kept in
//! local durable storage and never rotated automatically.

pub mod device;
pub mod storage;

pub use device::{DeviceIdentity, DEVICE_ID_KEY};
pub use storage::{FileStorage, IdentityStorage, MemoryStorage};
