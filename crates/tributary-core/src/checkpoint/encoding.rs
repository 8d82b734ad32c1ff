//! URL-safe encoding of topic specifications for use as a path segment.

use url::form_urlencoded;

/// Encode a topic specification as `application/x-www-form-urlencoded`.
///
/// ASCII alphanumerics and `*-._` pass through, space becomes `+`, and every
/// other byte of the UTF-8 encoding becomes `%XX`. The output never contains
/// a path separator.
pub fn encode_topic(topic: &str) -> String {
    form_urlencoded::byte_serialize(topic.as_bytes()).collect()
}

/// Invert [`encode_topic`].
pub fn decode_topic(encoded: &str) -> String {
    // An encoded segment contains no raw `&` or `=`, so it parses as a single
    // key with an empty value.
    form_urlencoded::parse(encoded.as_bytes())
        .next()
        .map(|(key, _)| key.into_owned())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_known_values() {
        assert_eq!(encode_topic("orders,payments"), "orders%2Cpayments");
        assert_eq!(encode_topic("orders"), "orders");
        assert_eq!(encode_topic("a b"), "a+b");
        assert_eq!(encode_topic("a/b"), "a%2Fb");
        assert_eq!(encode_topic("snake_case.v1-x*"), "snake_case.v1-x*");
        assert_eq!(encode_topic("ü"), "%C3%BC");
    }

    #[test]
    fn test_round_trip() {
        for topic in [
            "orders,payments",
            "with space, and comma",
            "naïve,日本語,emoji🎉",
            "a=b&c=d",
            "100%+plus",
            "../escape",
            "",
        ] {
            let encoded = encode_topic(topic);
            assert!(!encoded.contains('/'), "{encoded} contains a separator");
            assert_eq!(decode_topic(&encoded), topic, "round trip of {topic:?}");
        }
    }

    #[test]
    fn test_encoding_is_deterministic() {
        let topic = "orders, payments ,refunds";
        assert_eq!(encode_topic(topic), encode_topic(topic));
    }
}
