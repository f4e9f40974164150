//! Best-effort conversion of a captured request payload into text.

use reprelay_common::protocol::{FormData, RawChunk, RequestBody};
use tracing::warn;
use url::form_urlencoded;

/// Decode a request body into a single string.
///
/// Raw upload chunks take precedence over form fields. Returns `None` when
/// there is no body or when any chunk is not valid UTF-8.
pub fn decode_request_body(body: Option<&RequestBody>) -> Option<String> {
    let body = body?;

    if let Some(raw) = body.raw.as_deref().filter(|chunks| !chunks.is_empty()) {
        return decode_raw(raw);
    }

    body.form_data.as_ref().map(encode_form)
}

fn decode_raw(chunks: &[RawChunk]) -> Option<String> {
    let mut text = String::new();
    for (index, chunk) in chunks.iter().enumerate() {
        // File-backed chunks carry no bytes and contribute nothing.
        let Some(bytes) = chunk.bytes.as_deref() else {
            continue;
        };
        match std::str::from_utf8(bytes) {
            Ok(s) => text.push_str(s),
            Err(e) => {
                warn!(chunk = index, error = %e, "failed to decode request body");
                return None;
            }
        }
    }
    Some(text)
}

fn encode_form(form: &FormData) -> String {
    let mut serializer = form_urlencoded::Serializer::new(String::new());
    for (key, values) in form.iter() {
        for value in values {
            serializer.append_pair(key, value);
        }
    }
    serializer.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn form(fields: &[(&str, &[&str])]) -> RequestBody {
        RequestBody {
            form_data: Some(FormData(
                fields
                    .iter()
                    .map(|(k, vs)| (k.to_string(), vs.iter().map(|v| v.to_string()).collect()))
                    .collect(),
            )),
            ..Default::default()
        }
    }

    #[test]
    fn absent_body_is_none() {
        assert_eq!(decode_request_body(None), None);
        assert_eq!(decode_request_body(Some(&RequestBody::default())), None);
    }

    #[test]
    fn raw_chunks_concatenate_in_order() {
        let body = RequestBody {
            raw: Some(vec![
                RawChunk::bytes(&b"{\"a\":"[..]),
                RawChunk {
                    bytes: None,
                    file: Some("/tmp/blob".into()),
                },
                RawChunk::bytes(&b"1}"[..]),
            ]),
            ..Default::default()
        };
        assert_eq!(decode_request_body(Some(&body)).as_deref(), Some("{\"a\":1}"));
    }

    #[test]
    fn invalid_utf8_discards_whole_body() {
        let body = RequestBody {
            raw: Some(vec![RawChunk::bytes(&b"ok"[..]), RawChunk::bytes(vec![0xff, 0xfe])]),
            ..Default::default()
        };
        assert_eq!(decode_request_body(Some(&body)), None);
    }

    #[test]
    fn form_fields_repeat_keys_per_value() {
        let body = form(&[("a", &["1", "2"]), ("b", &["x"])]);
        assert_eq!(decode_request_body(Some(&body)).as_deref(), Some("a=1&a=2&b=x"));
    }

    #[test]
    fn form_fields_are_url_encoded() {
        let body = form(&[("q", &["hello world"]), ("redirect", &["/a?b=c"])]);
        assert_eq!(
            decode_request_body(Some(&body)).as_deref(),
            Some("q=hello+world&redirect=%2Fa%3Fb%3Dc")
        );
    }

    #[test]
    fn empty_raw_falls_back_to_form() {
        let mut body = form(&[("k", &["v"])]);
        body.raw = Some(vec![]);
        assert_eq!(decode_request_body(Some(&body)).as_deref(), Some("k=v"));
    }
}
