use anyhow::Result;
use log::{debug, warn};
use std::path::PathBuf;

use crate::{
    api::ApiClient,
    http::ReqwestTransport,
    runtime::Runtime,
    session::{FileStore, SessionListener},
};

/// User agent sent with every request.
pub const USER_AGENT: &str = concat!("ictdesk/", env!("ICTDESK_VERSION"));

/// Tells the terminal user their session is gone.
#[derive(Debug, Default, Clone, Copy)]
pub struct ExpiredNotice;

impl SessionListener for ExpiredNotice {
    fn session_expired(&self) {
        warn!("Session expired, stored credentials were removed");
        eprintln!("Your session has expired. Run `ictdesk login` to sign in again.");
    }
}

pub type CliClient<R> = ApiClient<ReqwestTransport, FileStore<R>, ExpiredNotice>;

pub struct Config<R: Runtime> {
    pub client: CliClient<R>,
}

impl<R: Runtime> Config<R> {
    /// Builds the client from command-line options.
    ///
    /// `session_path` overrides the default `<config_dir>/ictdesk/session.json`.
    pub fn new(runtime: R, api_url: Option<String>, session_path: Option<PathBuf>) -> Result<Self> {
        let store = match session_path {
            Some(path) => FileStore::new(runtime, path),
            None => FileStore::in_config_dir(runtime)?,
        };
        debug!("Using session file {}", store.path().display());

        let transport = ReqwestTransport::with_user_agent(USER_AGENT)?;
        let client = ApiClient::new(transport, store, ExpiredNotice, api_url);
        debug!("Using API at {}", client.base_url());

        Ok(Self { client })
    }
}
