pub mod candle;
pub mod candle_fetcher;
pub mod volume_change;

pub use candle::{Candle, Interval, Period};
pub use candle_fetcher::CandleFetcher;
pub use volume_change::VolumeChangeCalculator;
