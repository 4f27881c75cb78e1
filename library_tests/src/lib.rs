//! End to end checks run against a live library_circulation server.
//! The server url is taken from `LIBRARY_URL`, `http://127.0.0.1:8080` by default.



#[cfg(any(feature = "system_tests", feature = "load_tests"))]
pub(crate) fn server_url() -> String {
    std::env::var("LIBRARY_URL").unwrap_or("http://127.0.0.1:8080".to_string())
}
