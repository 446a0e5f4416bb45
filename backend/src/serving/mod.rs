pub mod history;
pub mod selector;
pub mod types;

pub use history::{
    ChannelHistorySink, HistoryClient, HistoryRecord, HistorySink, spawn_history_forwarder,
};
pub use selector::AdSelector;
pub use types::{ServePath, ServingAd};
