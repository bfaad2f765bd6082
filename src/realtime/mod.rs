pub mod channel;
pub mod policy;
pub mod transport;

pub use channel::{topics, ChannelState, RealtimeChannel, SubscriptionId};
pub use policy::ReconnectPolicy;
pub use transport::{BrokerConnection, BrokerTransport, ClientFrame, PushFrame, WsTransport};
