// SPDX-License-Identifier: MIT OR Apache-2.0

mod decode;
mod materialize;

pub use decode::{Decode, DecodeExt};
pub use materialize::{Materialize, MaterializeExt};
