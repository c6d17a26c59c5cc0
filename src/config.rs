use serde::Deserialize;

/// Database URL that selects the in-process store instead of Postgres.
pub const MEMORY_DATABASE_URL: &str = "memory";

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default = "default_server_port")]
    pub server_port: u16,
    pub database_url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Buffered events per chat room before slow subscribers start lagging.
    #[serde(default = "default_chat_channel_capacity")]
    pub chat_channel_capacity: usize,
    /// Push gateway URL. Push delivery is disabled when unset.
    #[serde(default)]
    pub push_endpoint: Option<String>,
    #[serde(default)]
    pub push_api_key: Option<String>,
}

fn default_server_port() -> u16 {
    8000
}

fn default_max_connections() -> u32 {
    8
}

fn default_chat_channel_capacity() -> usize {
    256
}

impl Config {
    pub fn from_env() -> Result<Self, config::ConfigError> {
        let config = config::Config::builder()
            .add_source(config::Environment::default())
            .build()?;
        config.try_deserialize()
    }

    pub fn uses_memory_store(&self) -> bool {
        self.database_url == MEMORY_DATABASE_URL
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_port: default_server_port(),
            database_url: MEMORY_DATABASE_URL.to_string(),
            max_connections: default_max_connections(),
            chat_channel_capacity: default_chat_channel_capacity(),
            push_endpoint: None,
            push_api_key: None,
        }
    }
}
