//! Utility functions and helpers.

pub mod http;
pub mod serde_ext;

use url::Url;

use crate::error::Result;

/// Resolve a path against an API root, treating the root as a directory.
pub fn join_endpoint(base: &str, path: &str) -> Result<Url> {
    let mut base = Url::parse(base)?;
    if !base.path().ends_with('/') {
        let dir = format!("{}/", base.path());
        base.set_path(&dir);
    }
    Ok(base.join(path.trim_start_matches('/'))?)
}

/// Epoch milliseconds, the score unit of time-ordered sets.
pub fn epoch_millis(at: chrono::DateTime<chrono::Utc>) -> f64 {
    at.timestamp_millis() as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_endpoint() {
        assert_eq!(
            join_endpoint("https://crm.example.com/api/v1", "cards")
                .unwrap()
                .as_str(),
            "https://crm.example.com/api/v1/cards"
        );
        assert_eq!(
            join_endpoint("https://crm.example.com/api/v1/", "/cards/7")
                .unwrap()
                .as_str(),
            "https://crm.example.com/api/v1/cards/7"
        );
        assert_eq!(
            join_endpoint("http://127.0.0.1:9000", "cards").unwrap().as_str(),
            "http://127.0.0.1:9000/cards"
        );
    }

    #[test]
    fn test_join_endpoint_rejects_garbage() {
        assert!(join_endpoint("not a url", "cards").is_err());
    }
}
