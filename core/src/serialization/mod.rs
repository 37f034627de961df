//! Binary serialization used for the wire protocol and world storage.
//!
//! Integers larger than a byte are big-endian; variable-length quantities
//! use base-128 VLQ with zigzag encoding for signed values, matching the
//! packet framing described in the protocol module of the server crate.

mod data_stream;

pub use data_stream::{DataReader, DataWriter, Readable, Writable};
