//! Wire-level codec utilities shared by the gateway and voice pipelines.

pub mod aead;
pub mod rtp;
pub mod zlib;
