//! Folding stored batches into one window-wide view.

pub mod aggregate;
pub mod similarity;

pub use aggregate::{merge_batches, window_label, AggregateState, WindowSummary};
pub use similarity::{
    char_overlap_similarity, is_duplicate_quote, is_duplicate_topic, QUOTE_DUPLICATE_THRESHOLD,
    TOPIC_DUPLICATE_THRESHOLD,
};
