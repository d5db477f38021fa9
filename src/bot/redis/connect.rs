use redis::{Client, Connection, RedisResult};

pub const REDIS_URL_DEFAULT: &str = "redis://127.0.0.1/";

// Opens a connection to the Redis server at the given URL.
pub fn connect(url: &str) -> RedisResult<Connection> {
    let client = Client::open(url)?;
    client.get_connection()
}
