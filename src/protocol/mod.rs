//! Protocol module for frame extraction and construction.
//!
//! This module contains the implementations for:
//! - Decoded frame variants shared by all vendor codecs
//! - Receive-buffer reassembly with consume-from-front semantics
//! - Checksum calculation

pub mod checksum;
pub mod frame;

pub use checksum::{
    append_sum_trailer, append_xor_trailer, sum_mod256, verify_sum_trailer, verify_xor_trailer,
    xor,
};
pub use frame::{Frame, FrameBuffer};
