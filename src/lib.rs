pub mod config;
pub mod conversations;
pub mod events;
pub mod friends;
pub mod gateway;
pub mod logging;
pub mod messages;
pub mod presence;
pub mod registry;
pub mod storage;
