//! HTTP surface of the configuration updater and the session protocol.
//!
//! All remote I/O goes through the [`Transport`] trait so both the scheme
//! updater and the session state machine can be driven against in-memory
//! fakes. [`HttpTransport`] is the production implementation, a thin wrapper
//! around a blocking `ureq` agent.

use crate::error::Error;
use crate::scheme::index::FileHash;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;

/// Typed HTTP I/O against one base URL.
pub trait Transport: Send + Sync {
    /// GET `base_url + path`, returning the raw body.
    fn get_bytes(&self, path: &str) -> Result<Vec<u8>, Error>;

    /// POST a JSON body to `base_url + path`, returning the response body.
    fn post_bytes(&self, path: &str, body: Vec<u8>) -> Result<Vec<u8>, Error>;

    /// DELETE the base URL itself. Used to cancel a session.
    fn delete(&self) -> Result<(), Error>;

    /// Download `path` and store it at `dest`, but only if its SHA-256 hash
    /// equals `hash`. The write is atomic (temp file + rename).
    fn get_signed_file(&self, path: &str, dest: &Path, hash: &FileHash) -> Result<(), Error> {
        let bytes = self.get_bytes(path)?;
        if FileHash::of(&bytes) != *hash {
            return Err(Error::HashMismatch(path.to_string()));
        }
        crate::fs::save_file(dest, &bytes)
    }
}

/// GET and deserialize a JSON document.
pub fn get_json<T: DeserializeOwned>(transport: &dyn Transport, path: &str) -> Result<T, Error> {
    let bytes = transport.get_bytes(path)?;
    serde_json::from_slice(&bytes)
        .map_err(|e| Error::Transport(format!("Invalid JSON response from {}: {}", path, e)))
}

/// POST a JSON document and deserialize the JSON response.
pub fn post_json<B: Serialize, T: DeserializeOwned>(
    transport: &dyn Transport,
    path: &str,
    body: &B,
) -> Result<T, Error> {
    let body = serde_json::to_vec(body)
        .map_err(|e| Error::Internal(format!("Failed to serialize request body: {}", e)))?;
    let response = transport.post_bytes(path, body)?;
    serde_json::from_slice(&response)
        .map_err(|e| Error::Transport(format!("Invalid JSON response from {}: {}", path, e)))
}

/// Normalize a remote scheme URL: default to https, strip a trailing slash
/// and a trailing `/description.xml`.
pub fn normalize_scheme_url(url: &str) -> String {
    let mut url = url.to_string();
    if !url.starts_with("http://") && !url.starts_with("https://") {
        url = format!("https://{}", url);
    }
    if let Some(stripped) = url.strip_suffix('/') {
        url = stripped.to_string();
    }
    if let Some(stripped) = url.strip_suffix("/description.xml") {
        url = stripped.to_string();
    }
    url
}

/// Blocking HTTP transport over a `ureq` agent.
pub struct HttpTransport {
    base_url: String,
    agent: ureq::Agent,
}

impl HttpTransport {
    /// Create a transport for the given base URL. A trailing slash is
    /// appended if missing so paths can be joined naively.
    pub fn new(base_url: &str) -> Self {
        let base_url = if base_url.ends_with('/') {
            base_url.to_string()
        } else {
            format!("{}/", base_url)
        };
        // Surface non-2xx statuses as responses, not errors, so bodies of
        // rejections remain readable.
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .http_status_as_error(false)
            .build()
            .into();
        HttpTransport { base_url, agent }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn read_body(response: ureq::http::Response<ureq::Body>) -> Result<(u16, Vec<u8>), Error> {
        let status = response.status().as_u16();
        let body = response
            .into_body()
            .read_to_vec()
            .map_err(|e| Error::Transport(format!("Failed to read response body: {}", e)))?;
        Ok((status, body))
    }
}

impl Transport for HttpTransport {
    fn get_bytes(&self, path: &str) -> Result<Vec<u8>, Error> {
        let url = self.url(path);
        let response = self
            .agent
            .get(&url)
            .call()
            .map_err(|e| Error::Transport(format!("GET {} failed: {}", url, e)))?;
        let (status, body) = Self::read_body(response)?;
        if status != 200 {
            return Err(Error::Transport(format!(
                "GET {} returned status {}: {}",
                url,
                status,
                String::from_utf8_lossy(&body)
            )));
        }
        Ok(body)
    }

    fn post_bytes(&self, path: &str, body: Vec<u8>) -> Result<Vec<u8>, Error> {
        let url = self.url(path);
        let response = self
            .agent
            .post(&url)
            .header("Content-Type", "application/json")
            .send(&body[..])
            .map_err(|e| Error::Transport(format!("POST {} failed: {}", url, e)))?;
        let (status, body) = Self::read_body(response)?;
        if status != 200 {
            return Err(Error::Transport(format!(
                "POST {} returned status {}: {}",
                url,
                status,
                String::from_utf8_lossy(&body)
            )));
        }
        Ok(body)
    }

    fn delete(&self) -> Result<(), Error> {
        let url = self.base_url.trim_end_matches('/').to_string();
        self.agent
            .delete(&url)
            .call()
            .map_err(|e| Error::Transport(format!("DELETE {} failed: {}", url, e)))?;
        Ok(())
    }
}

/// Constructs a [`Transport`] for a base URL. The configuration holds one of
/// these so tests can substitute in-memory remotes for real HTTP.
pub type TransportFactory = Box<dyn Fn(&str) -> Box<dyn Transport> + Send + Sync>;

/// The default factory: [`HttpTransport`].
pub fn http_transport_factory() -> TransportFactory {
    Box::new(|url| Box::new(HttpTransport::new(url)) as Box<dyn Transport>)
}

#[cfg(test)]
pub(crate) mod testing {
    //! An in-memory transport mapping paths to canned responses.

    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct MapTransport {
        files: Mutex<HashMap<String, Vec<u8>>>,
        pub posts: Mutex<Vec<(String, Vec<u8>)>>,
        pub post_responses: Mutex<HashMap<String, Vec<u8>>>,
        pub deletes: AtomicUsize,
        pub gets: AtomicUsize,
    }

    impl MapTransport {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn insert(&self, path: &str, content: impl Into<Vec<u8>>) {
            self.files
                .lock()
                .unwrap()
                .insert(path.to_string(), content.into());
        }

        pub fn respond_to_post(&self, path: &str, response: impl Into<Vec<u8>>) {
            self.post_responses
                .lock()
                .unwrap()
                .insert(path.to_string(), response.into());
        }

        pub fn delete_count(&self) -> usize {
            self.deletes.load(Ordering::SeqCst)
        }
    }

    impl Transport for std::sync::Arc<MapTransport> {
        fn get_bytes(&self, path: &str) -> Result<Vec<u8>, Error> {
            (**self).get_bytes(path)
        }

        fn post_bytes(&self, path: &str, body: Vec<u8>) -> Result<Vec<u8>, Error> {
            (**self).post_bytes(path, body)
        }

        fn delete(&self) -> Result<(), Error> {
            (**self).delete()
        }
    }

    impl Transport for MapTransport {
        fn get_bytes(&self, path: &str) -> Result<Vec<u8>, Error> {
            self.gets.fetch_add(1, Ordering::SeqCst);
            self.files
                .lock()
                .unwrap()
                .get(path)
                .cloned()
                .ok_or_else(|| Error::Transport(format!("GET {} returned status 404", path)))
        }

        fn post_bytes(&self, path: &str, body: Vec<u8>) -> Result<Vec<u8>, Error> {
            self.posts
                .lock()
                .unwrap()
                .push((path.to_string(), body));
            self.post_responses
                .lock()
                .unwrap()
                .get(path)
                .cloned()
                .ok_or_else(|| Error::Transport(format!("POST {} returned status 404", path)))
        }

        fn delete(&self) -> Result<(), Error> {
            self.deletes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::MapTransport;
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_normalize_scheme_url() {
        assert_eq!(
            normalize_scheme_url("schemes.example.com/irma-demo"),
            "https://schemes.example.com/irma-demo"
        );
        assert_eq!(
            normalize_scheme_url("https://schemes.example.com/irma-demo/"),
            "https://schemes.example.com/irma-demo"
        );
        assert_eq!(
            normalize_scheme_url("https://schemes.example.com/irma-demo/description.xml"),
            "https://schemes.example.com/irma-demo"
        );
    }

    #[test]
    fn test_get_json() {
        let transport = MapTransport::new();
        transport.insert("jwt", br#"{"jwt":"abc","nonce":12,"context":34}"#.to_vec());

        #[derive(serde::Deserialize)]
        struct Info {
            jwt: String,
            nonce: u64,
        }
        let info: Info = get_json(&transport, "jwt").unwrap();
        assert_eq!(info.jwt, "abc");
        assert_eq!(info.nonce, 12);
    }

    #[test]
    fn test_get_json_invalid_body() {
        let transport = MapTransport::new();
        transport.insert("jwt", b"not json".to_vec());
        let err = get_json::<serde_json::Value>(&transport, "jwt").unwrap_err();
        assert!(matches!(err, Error::Transport(_)));
    }

    #[test]
    fn test_get_signed_file_checks_hash() {
        let dir = TempDir::new().unwrap();
        let transport = MapTransport::new();
        transport.insert("RU/description.xml", b"<Issuer/>".to_vec());

        let dest = dir.path().join("description.xml");
        let good = FileHash::of(b"<Issuer/>");
        transport
            .get_signed_file("RU/description.xml", &dest, &good)
            .unwrap();
        assert_eq!(std::fs::read(&dest).unwrap(), b"<Issuer/>");

        let bad = FileHash::of(b"something else");
        let dest2 = dir.path().join("other.xml");
        let err = transport
            .get_signed_file("RU/description.xml", &dest2, &bad)
            .unwrap_err();
        assert!(matches!(err, Error::HashMismatch(_)));
        assert!(!dest2.exists());
    }
}
