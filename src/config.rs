use std::time::Duration;

use crate::calls::CallConfig;
use crate::calls::media::{IceServer, MediaConstraints, RtcConfiguration};
use crate::directory::DirectoryConfig;

pub const DEFAULT_STUN_SERVER: &str = "stun:stun.l.google.com:19302";

#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Socket.IO URL of the signaling relay, without the identity parameter.
    /// A path selects the namespace.
    pub relay_url: String,
    pub directory: DirectoryConfig,
    pub ice_servers: Vec<IceServer>,
    pub auto_accept: bool,
    pub display_name: Option<String>,
    pub step_timeout: Option<Duration>,
    pub media: MediaConstraints,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            relay_url: "http://localhost:3000".to_string(),
            directory: DirectoryConfig::default(),
            ice_servers: vec![IceServer::stun(DEFAULT_STUN_SERVER)],
            auto_accept: true,
            display_name: None,
            step_timeout: None,
            media: MediaConstraints::default(),
        }
    }
}

impl ClientConfig {
    /// The part the call controller needs.
    pub fn call_config(&self) -> CallConfig {
        CallConfig {
            auto_accept: self.auto_accept,
            display_name: self.display_name.clone(),
            rtc: RtcConfiguration {
                ice_servers: self.ice_servers.clone(),
            },
            media: self.media,
            step_timeout: self.step_timeout,
        }
    }
}
