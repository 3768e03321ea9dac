pub mod timeframe;
pub mod window;

pub use timeframe::{
    AnalysisInput, MarketAnalysis, MarketAnalyzer, MarketCondition, PriceLevel, Timeframe,
};
pub use window::TradeWindow;
