use std::net::SocketAddr;
use structopt::StructOpt;
use url::Url;

pub const DEFAULT_DATABASE_URI: &str = "sqlite://./mlmd?mode=rwc";

#[derive(Debug, Clone, StructOpt)]
#[structopt(name = "cmf-server", about = "Metadata server for ML pipelines")]
pub struct Config {
    /// Store to serve; assembled from `POSTGRES_*` when unset.
    #[structopt(long, env = "CMF_DATABASE_URI")]
    pub database_uri: Option<String>,

    #[structopt(long, env = "CMF_BIND_ADDR", default_value = "0.0.0.0:8080")]
    pub bind: SocketAddr,

    /// Responses larger than this many bytes are streamed.
    #[structopt(long, env = "CMF_STREAM_THRESHOLD", default_value = "1048576")]
    pub stream_threshold: usize,

    #[structopt(long, env = "NEO4J_URI", hide_env_values = true)]
    pub neo4j_uri: Option<String>,
}

impl Config {
    pub fn database_uri(&self) -> String {
        resolve_database_uri(self.database_uri.as_deref(), |key| std::env::var(key).ok())
    }
}

/// Picks the store: an explicit URI, then a Postgres server described by
/// `POSTGRES_*`, then the embedded file.
pub fn resolve_database_uri<F>(explicit: Option<&str>, env: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(uri) = explicit.filter(|uri| !uri.is_empty()) {
        return uri.to_owned();
    }
    match env("POSTGRES_HOST") {
        Some(host) if !host.is_empty() => {
            let port = env("POSTGRES_PORT").unwrap_or_else(|| "5432".to_owned());
            let user = env("POSTGRES_USER").unwrap_or_default();
            let password = env("POSTGRES_PASSWORD").unwrap_or_default();
            let db = env("POSTGRES_DB").unwrap_or_default();
            let uri = format!("postgres://{}:{}/{}", host, port, db);
            let mut url = match Url::parse(&uri) {
                Ok(url) => url,
                Err(_) => return uri,
            };
            // Credentials are percent-encoded by the setters.
            if !user.is_empty() && url.set_username(&user).is_ok() && !password.is_empty() {
                url.set_password(Some(&password)).ok();
            }
            url.to_string()
        }
        _ => DEFAULT_DATABASE_URI.to_owned(),
    }
}
