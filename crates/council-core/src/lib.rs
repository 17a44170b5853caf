pub mod config;
pub mod error;
pub mod types;

pub use config::Settings;
pub use error::{CouncilError, CouncilResult};
pub use types::{
    AnalysisKind, AnalysisParameters, AnalysisRequest, DataCategory, DataPayload, DataRecord,
    FundamentalReport, MarketType, NewsItem, PriceBar, SourceTag, StockInfo, TaskPriority,
    TaskStatus,
};
