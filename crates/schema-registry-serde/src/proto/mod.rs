//! Runtime Protobuf support: parse `.proto` text, then encode and decode
//! messages against it without code generation.

pub mod decoder;
pub mod encoder;
pub mod parser;

pub use decoder::ProtoDecoder;
pub use encoder::{pack_any, ProtoEncoder};
pub use parser::{is_well_known_import, ProtoParser};
