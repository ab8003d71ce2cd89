use std::sync::Arc;
use std::time::Duration;
use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::cookie::Jar;
use reqwest::header::LOCATION;
use reqwest::redirect::Policy;
use reqwest::{Client, Response};
use tracing::debug;
use crate::error::Result;
use super::{PortalResponse, Transport};

struct Clients {
    jar: Arc<Jar>,
    /// Never follows redirects; used for page and file fetches.
    direct: Client,
    /// Follows redirects; used for the login handshake.
    following: Client,
}

impl Clients {
    fn build(jar: Arc<Jar>, timeout: Duration) -> Result<Self> {
        let direct = Client::builder()
            .cookie_provider(jar.clone())
            .redirect(Policy::none())
            .timeout(timeout)
            .build()?;
        let following = Client::builder()
            .cookie_provider(jar.clone())
            .timeout(timeout)
            .build()?;
        Ok(Self {
            jar,
            direct,
            following,
        })
    }
}

/// reqwest-backed transport sharing one cookie jar between its clients.
pub struct HttpTransport {
    timeout: Duration,
    clients: RwLock<Clients>,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<Self> {
        Ok(Self {
            timeout,
            clients: RwLock::new(Clients::build(Arc::new(Jar::default()), timeout)?),
        })
    }

    /// Recreates the clients on the current cookie jar.
    ///
    /// Pooled connections belong to the runtime that opened them; call this
    /// after moving to a new runtime.
    pub fn rebuild(&self) -> Result<()> {
        let mut clients = self.clients.write();
        *clients = Clients::build(clients.jar.clone(), self.timeout)?;
        Ok(())
    }

    fn direct(&self) -> Client {
        self.clients.read().direct.clone()
    }

    fn following(&self) -> Client {
        self.clients.read().following.clone()
    }
}

async fn read_response(response: Response) -> Result<PortalResponse> {
    let url = response.url().to_string();
    let status = response.status();
    let is_redirect = status.is_redirection() && response.headers().contains_key(LOCATION);
    let body = response.bytes().await?;
    debug!("{} -> {} ({} bytes)", url, status, body.len());
    Ok(PortalResponse {
        url,
        status: status.as_u16(),
        is_redirect,
        body,
    })
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get(&self, url: &str) -> Result<PortalResponse> {
        let response = self.direct().get(url).send().await?;
        read_response(response).await
    }

    async fn post_form(&self, url: &str, form: &[(String, String)]) -> Result<PortalResponse> {
        let response = self.following().post(url).form(form).send().await?;
        read_response(response).await
    }

    fn reset(&self) -> Result<()> {
        let mut clients = self.clients.write();
        *clients = Clients::build(Arc::new(Jar::default()), self.timeout)?;
        Ok(())
    }
}
