mod generation_log;
mod report;
mod short;

pub use generation_log::{
    GenerationLogEntry, LogFilter, LogStatus, LogSummary, NewGenerationLog, Stage, StageCounts,
};
pub use report::Report;
pub use short::{NewShort, Short, ShortStatus, StatusUpdate, UnknownStatus};
