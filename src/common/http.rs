use std::time::Duration;

use reqwest::{Client, Error};

const USER_AGENT: &str = concat!(
    "DiscordBot (https://github.com/valkyrion/valkyrion, ",
    env!("CARGO_PKG_VERSION"),
    ")"
);

pub struct HttpClient;

impl HttpClient {
    /// Client for short REST calls against the platform API.
    pub fn api() -> Result<Client, Error> {
        Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(10))
            .build()
    }

    /// Client for long-lived radio streams: bounded connect, unbounded body.
    pub fn streaming() -> Result<Client, Error> {
        Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(Duration::from_secs(10))
            .build()
    }
}
