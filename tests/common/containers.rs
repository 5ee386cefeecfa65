// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Testcontainers setup for Redis.

use redis::streams::StreamRangeReply;
use redis::AsyncCommands;
use testcontainers::{clients::Cli, core::WaitFor, Container, GenericImage};

/// Create a vanilla Redis container (streams-compatible).
///
/// Uses official redis:7 image. Waits for "Ready to accept connections".
pub fn redis_container(docker: &Cli) -> Container<'_, GenericImage> {
    let image = GenericImage::new("redis", "7-alpine")
        .with_exposed_port(6379)
        .with_wait_for(WaitFor::message_on_stdout("Ready to accept connections"));
    docker.run(image)
}

/// Get the Redis URL for a container.
pub fn redis_url(container: &Container<'_, GenericImage>) -> String {
    let port = container.get_host_port_ipv4(6379);
    format!("redis://127.0.0.1:{}", port)
}

/// One entry read back from a stream.
#[derive(Debug, Clone)]
pub struct StreamEntry {
    pub id: String,
    pub fields: std::collections::HashMap<String, String>,
}

impl StreamEntry {
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }
}

/// Read every entry of `stream`, oldest first.
pub async fn read_stream(url: &str, stream: &str) -> redis::RedisResult<Vec<StreamEntry>> {
    let client = redis::Client::open(url)?;
    let mut conn = client.get_multiplexed_async_connection().await?;
    let reply: StreamRangeReply = conn.xrange_all(stream).await?;

    let mut entries = Vec::with_capacity(reply.ids.len());
    for entry in reply.ids {
        let mut fields = std::collections::HashMap::new();
        for (key, value) in &entry.map {
            fields.insert(key.clone(), redis::from_redis_value::<String>(value)?);
        }
        entries.push(StreamEntry { id: entry.id, fields });
    }
    Ok(entries)
}

/// Stream length.
pub async fn stream_len(url: &str, stream: &str) -> redis::RedisResult<usize> {
    let client = redis::Client::open(url)?;
    let mut conn = client.get_multiplexed_async_connection().await?;
    conn.xlen(stream).await
}
