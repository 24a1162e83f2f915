//! Wire protocol: untagged event union and subscription frames.

pub mod events;
pub mod subscriptions;

pub use events::{
    demux, BestBidAsk, BookSnapshot, LastTrade, MakerOrderMsg, MarketResolved, NewMarket,
    PriceChange, RtEvent, RtPayload, TickSizeChange, Topic, UserOrderKind, UserOrderMsg,
    UserTradeMsg,
};
pub use subscriptions::{AuthPayload, MarketSubscription, SubscriptionOp, UserSubscription};
