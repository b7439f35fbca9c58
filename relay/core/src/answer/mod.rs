//! Answer publishing
//!
//! [`AnswerRelay`] streams a model response to subscribers as protocol
//! envelopes; [`SentenceSplitter`] cuts the text into sentences on the way.

mod relay;
mod sentence;

pub use relay::{AnswerError, AnswerRelay};
pub use sentence::{SentenceSplitter, MAX_SENTENCE_BYTES};
