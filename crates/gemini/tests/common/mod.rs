use std::time::Duration;

use axum::Router;
use tokio::net::TcpListener;

use designlift_gemini::GeminiConfig;

/// Serve `router` on an ephemeral localhost port and return its base URL.
pub async fn spawn_fixture(router: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}/v1beta")
}

pub fn test_config(api_url: String) -> GeminiConfig {
    GeminiConfig {
        api_url,
        api_key: "test-key".to_string(),
        model: "test-model".to_string(),
        temperature: 0.4,
        timeout: Duration::from_secs(5),
    }
}
