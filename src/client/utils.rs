use secrecy::ExposeSecret;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use crate::client::config::Config;
use crate::client::consts::{AUTHORIZATION_HEADER, OPENAI_BETA_HEADER};

pub fn build_request(config: &Config) -> tokio_tungstenite::tungstenite::Result<Request> {
    let url = format!("{}/realtime?model={}", config.base_url(), config.model());
    let mut request = url.into_client_request()?;
    request.headers_mut().insert(
        AUTHORIZATION_HEADER,
        format!("Bearer {}", config.api_key().expose_secret()).as_str().parse()?,
    );
    request.headers_mut().insert(OPENAI_BETA_HEADER, "realtime=v1".parse()?);
    Ok(request)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_targets_model_with_auth_headers() {
        let config = Config::builder()
            .with_base_url("wss://example.test/v1")
            .with_api_key("sk-test")
            .with_model("gpt-4o-realtime-preview")
            .build();
        let request = build_request(&config).unwrap();
        assert_eq!(
            request.uri().to_string(),
            "wss://example.test/v1/realtime?model=gpt-4o-realtime-preview"
        );
        assert_eq!(request.headers()[AUTHORIZATION_HEADER], "Bearer sk-test");
        assert_eq!(request.headers()[OPENAI_BETA_HEADER], "realtime=v1");
    }
}
