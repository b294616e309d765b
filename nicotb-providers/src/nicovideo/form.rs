//! URL-encoded form bodies returned by the legacy watch endpoint.

use indexmap::IndexMap;
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

/// Characters `encodeURIComponent` leaves untouched.
const COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

/// Parse `k=v&k2=v2` into an ordered map.
///
/// Keys and values are percent-decoded; `+` is kept literally. A pair without
/// `=` gets an empty value and a repeated key keeps its last value.
#[must_use]
pub fn parse_form_body(body: &str) -> IndexMap<String, String> {
    body.trim()
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            (decode(key), decode(value))
        })
        .collect()
}

/// Inverse of [`parse_form_body`].
#[must_use]
pub fn encode_form_body(fields: &IndexMap<String, String>) -> String {
    fields
        .iter()
        .map(|(k, v)| format!("{}={}", utf8_percent_encode(k, COMPONENT), utf8_percent_encode(v, COMPONENT)))
        .collect::<Vec<_>>()
        .join("&")
}

fn decode(s: &str) -> String {
    percent_decode_str(s).decode_utf8_lossy().into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_thumb_watch_body() {
        let body = "thread_id=1173108780&l=319&url=http%3A%2F%2Fsmile-com00.nicovideo.jp%2Fsmile%3Fm%3D6.1&ms=http%3A%2F%2Fmsg.nicovideo.jp%2F10%2Fapi%2F";
        let map = parse_form_body(body);
        assert_eq!(map["thread_id"], "1173108780");
        assert_eq!(map["url"], "http://smile-com00.nicovideo.jp/smile?m=6.1");
        assert_eq!(map["ms"], "http://msg.nicovideo.jp/10/api/");
        assert_eq!(map.keys().collect::<Vec<_>>(), vec!["thread_id", "l", "url", "ms"]);
    }

    #[test]
    fn test_parse_edge_cases() {
        let map = parse_form_body("a=1&&flag&b=x%3Dy=z&a=2\n");
        assert_eq!(map["a"], "2");
        assert_eq!(map["flag"], "");
        assert_eq!(map["b"], "x=y=z");
        assert!(parse_form_body("").is_empty());
        assert_eq!(parse_form_body("q=a+b")["q"], "a+b");
    }

    #[test]
    fn test_encode_then_parse_recovers_pairs() {
        let mut fields = IndexMap::new();
        fields.insert("url".to_string(), "http://example.com/v?a=1&b=2".to_string());
        fields.insert("title".to_string(), "新・豪血寺一族 -煩悩解放".to_string());
        fields.insert("empty".to_string(), String::new());

        let parsed = parse_form_body(&encode_form_body(&fields));
        assert_eq!(parsed, fields);
        assert_eq!(parse_form_body(&encode_form_body(&parsed)), parsed);
    }
}
