//! Client library for the mbus message bus
//!
//! The crate centers on [`MbusClient`], a protocol engine driven entirely by
//! the embedding application: every API call enqueues an intent, and a single
//! call to [`MbusClient::run`] makes one bounded step of progress. Outcomes
//! arrive through callbacks registered on [`Options`], never through return
//! values of the enqueueing calls.
//!
//! ```no_run
//! use mbus_client::{ConnectStatus, MbusClient, Options};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let options = Options::builder()
//!         .server_address("127.0.0.1")
//!         .server_port(8000)
//!         .on_connect(|status| {
//!             if status == ConnectStatus::Success {
//!                 println!("connected");
//!             }
//!         })
//!         .on_message(|message| {
//!             println!("{}: {}", message.identifier(), message.payload());
//!         })
//!         .build()?;
//!
//!     let mut client = MbusClient::new(options);
//!     client.connect();
//!     loop {
//!         client.run(None).await?;
//!     }
//! }
//! ```

mod client;
mod error;
mod message;
mod options;
mod request;
mod status;
mod subscription;

pub use client::{ClientWaker, MbusClient};
pub use error::{ClientError, Result};
pub use message::{CommandReply, EventMessage};
pub use options::{
    defaults, CommandCallback, ConnectCallback, DisconnectCallback, MessageCallback, Options,
    OptionsBuilder, PublishCallback, RegisteredCallback, ResultCallback, SubscribeCallback,
    UnregisteredCallback, UnsubscribeCallback,
};
pub use status::{
    ClientState, CommandStatus, ConnectStatus, DisconnectStatus, PublishStatus, Qos,
    RegisterStatus, SubscribeStatus, UnregisterStatus, UnsubscribeStatus,
};

/// Convenience re-exports for client applications
pub mod prelude {
    pub use crate::{
        ClientState, ClientWaker, CommandReply, ConnectStatus, DisconnectStatus, EventMessage,
        MbusClient, Options, PublishStatus, Qos, SubscribeStatus,
    };
}
