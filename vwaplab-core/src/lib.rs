//! VwapLab Core — intraday bar domain, normalization, and feature engineering.
//!
//! This crate contains the deterministic, I/O-free half of the system:
//! - Domain types (raw and validated bars, session context, macro flags)
//! - Bar normalization: validation, ordering, last-write-wins dedupe, gap warnings
//! - Day-to-date intraday features (cumulative volume, returns, volatility, VWAP)
//! - Daily cutoff aggregation into one feature vector per (symbol, date)

pub mod data;
pub mod domain;
pub mod features;
