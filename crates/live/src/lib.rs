// ClinicPulse Live - STOMP-over-WebSocket live updates
//
// This crate owns the realtime side of the portal: the STOMP frame codec, the
// connection manager with fixed-delay reconnect, the topic router and the
// `LiveUpdates` facade that feeds the cache reconciler.

pub mod connection;
pub mod live;
pub mod router;
pub mod stomp;
pub mod transport;

pub use connection::{ConnectionManager, ConnectionState};
pub use live::LiveUpdates;
pub use router::{DispatchOutcome, Handler, SubscriptionHandle, TopicRouter};
pub use stomp::{Command, Frame, FrameError, HeartBeat, NegotiatedHeartBeat};
pub use transport::{Connector, Outbound, TransportLink, WsConnector};
