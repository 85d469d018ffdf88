pub mod candle_store;
pub mod orderbook;
pub mod tick_aggregator;

pub use candle_store::CandleStore;
pub use orderbook::OrderBookManager;
pub use tick_aggregator::TickAggregator;
