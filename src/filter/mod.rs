//! Card filtering: predicate filters, text search and grouping

mod filters;
mod grouping;
mod pipeline;
mod text;

pub use filters::{
    AckFilter, DateRange, Filter, FilterStatus, FilterType, LightCardsFilter, ProcessStatus,
    SeverityStatus,
};
pub use grouping::{tags_key, GroupedCards};
pub use pipeline::{FilterPipeline, PipelineOutputs};
pub use text::{fold, TextFilter};
