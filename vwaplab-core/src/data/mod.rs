//! Bar validation, ordering, and gap detection

pub mod normalize;

pub use normalize::{
    split_days, split_runs, split_symbols, GapWarning, MalformedBar, MalformedReason, NormalizedBars,
    Normalizer,
};
