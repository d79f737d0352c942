//! Domain types for vwaplab

pub mod bar;
pub mod daily;
pub mod enriched;
pub mod macro_flags;
pub mod session;

pub use bar::{Bar, PriceBasis, RawBar};
pub use daily::{CutoffSnapshot, DailyFeatureVector, DailyTargets, FeatureName, TargetKind};
pub use enriched::EnrichedBar;
pub use macro_flags::{EventCalendar, MacroCalendar, MacroFlags, NoMacroEvents};
pub use session::{Session, SessionContext, SessionFilter};

/// Symbol type alias
pub type Symbol = String;
