//! Text codec for trading-day documents. `decode_document` and `encode_document` are
//! inverse for any record built from the grammar in [`grammar`].

mod decode;
mod encode;
pub mod grammar;

pub use decode::decode_document;
pub use encode::encode_document;
