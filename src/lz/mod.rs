mod hash234;
mod hc4;
mod lz_decoder;
mod lz_encoder;

pub(crate) use lz_decoder::*;
pub(crate) use lz_encoder::*;
