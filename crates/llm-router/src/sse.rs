use council_core::{CouncilError, CouncilResult};
use futures_util::stream::BoxStream;
use futures_util::StreamExt;

/// Parse a server-sent-event response into the JSON documents carried in
/// `data:` lines. Comment lines and keepalives are dropped; an OpenAI
/// style `[DONE]` sentinel ends the stream.
pub fn sse_json_stream(
    response: reqwest::Response,
) -> BoxStream<'static, CouncilResult<serde_json::Value>> {
    let byte_stream = response.bytes_stream();
    let state = (byte_stream, String::new(), false);

    futures_util::stream::unfold(state, |(mut bytes, mut buffer, done)| async move {
        if done {
            return None;
        }
        loop {
            if let Some(pos) = buffer.find('\n') {
                let line: String = buffer.drain(..=pos).collect();
                let line = line.trim();
                if line.is_empty() || line.starts_with(':') {
                    continue;
                }
                let Some(data) = line.strip_prefix("data:") else {
                    continue;
                };
                let data = data.trim();
                if data == "[DONE]" {
                    return None;
                }
                match serde_json::from_str::<serde_json::Value>(data) {
                    Ok(value) => return Some((Ok(value), (bytes, buffer, false))),
                    Err(err) => {
                        tracing::debug!(error = %err, "skipping non-JSON SSE data line");
                        continue;
                    }
                }
            }

            match bytes.next().await {
                Some(Ok(chunk)) => buffer.push_str(&String::from_utf8_lossy(&chunk)),
                Some(Err(err)) => {
                    let err = CouncilError::Unavailable(format!("stream interrupted: {err}"));
                    return Some((Err(err), (bytes, buffer, true)));
                }
                None => return None,
            }
        }
    })
    .boxed()
}
