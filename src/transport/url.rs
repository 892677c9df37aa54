//! URL construction for negotiate and connect requests

use url::Url;

use super::TransportKind;
use crate::types::{ClientError, Result};

/// `<base path>/negotiate`, keeping the caller's query string
pub fn build_negotiate(base: &Url) -> Url {
    let mut url = base.clone();
    let path = format!("{}/negotiate", base.path().trim_end_matches('/'));
    url.set_path(&path);
    url
}

/// Connect URL for `kind`: the base URL plus `id=<connection_id>`, with the
/// scheme switched to ws/wss for WebSockets.
pub fn build_connect(base: &Url, kind: TransportKind, connection_id: &str) -> Result<Url> {
    let mut url = base.clone();
    url.set_fragment(None);
    url.query_pairs_mut().append_pair("id", connection_id);

    match kind {
        TransportKind::WebSockets => convert_to_websocket_url(url),
    }
}

fn convert_to_websocket_url(mut url: Url) -> Result<Url> {
    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(ClientError::Config(format!(
                "cannot derive a WebSocket URL from scheme '{}'",
                other
            )))
        }
    };

    url.set_scheme(scheme)
        .map_err(|_| ClientError::Config(format!("cannot switch URL scheme to '{}'", scheme)))?;
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(url: &str) -> Url {
        Url::parse(url).unwrap()
    }

    #[test]
    fn test_negotiate_url() {
        assert_eq!(
            build_negotiate(&parse("http://localhost:5000/chat")).as_str(),
            "http://localhost:5000/chat/negotiate"
        );
        assert_eq!(
            build_negotiate(&parse("http://localhost:5000/chat/?tenant=a")).as_str(),
            "http://localhost:5000/chat/negotiate?tenant=a"
        );
        assert_eq!(
            build_negotiate(&parse("https://example.com")).as_str(),
            "https://example.com/negotiate"
        );
    }

    #[test]
    fn test_connect_url_websockets() {
        let url = build_connect(
            &parse("http://localhost:5000/chat"),
            TransportKind::WebSockets,
            "abc",
        )
        .unwrap();
        assert_eq!(url.as_str(), "ws://localhost:5000/chat?id=abc");

        let url = build_connect(
            &parse("https://example.com/chat?tenant=a#frag"),
            TransportKind::WebSockets,
            "a b",
        )
        .unwrap();
        assert_eq!(url.as_str(), "wss://example.com/chat?tenant=a&id=a+b");
    }

    #[test]
    fn test_connect_url_rejects_unknown_scheme() {
        let result = build_connect(&parse("ftp://example.com/chat"), TransportKind::WebSockets, "x");
        assert!(matches!(result, Err(ClientError::Config(_))));
    }
}
