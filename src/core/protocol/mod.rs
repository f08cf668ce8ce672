// src/core/protocol/mod.rs

pub mod resp;

pub use resp::{ParseMode, ParseOutcome, RespFrame, encode_frame, parse_frame};
