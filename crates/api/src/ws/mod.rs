//! Provider node socket: wire protocol, transport adapter, session loop.

pub mod handler;
pub mod link;
pub mod protocol;

pub use handler::ws_handler;
pub use link::WsLink;
